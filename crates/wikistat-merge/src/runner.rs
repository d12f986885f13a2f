//! Parallel merge over (endpoint, project) groups

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use indicatif::ProgressBar;

use wikistat_catalog::Catalog;
use wikistat_core::{MergeError, ProgressContext, fmt_num, is_shutdown_requested};
use wikistat_store::cleanup_tmp_files;

use crate::config::Config;
use crate::group::{GroupMerger, GroupStats};
use crate::plan::{GroupPlan, plan_groups};
use crate::source::RecordSource;

/// A group stopped by a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    pub group: String,
    /// Record that triggered the error, when the error came from a record.
    pub key: Option<String>,
    pub kind: &'static str,
    pub message: String,
}

impl GroupFailure {
    fn merge(group: &GroupPlan<'_>, key: Option<&str>, e: &MergeError) -> Self {
        Self {
            group: group.name(),
            key: e.key().or(key).map(str::to_string),
            kind: e.kind(),
            message: e.to_string(),
        }
    }

    fn source(group: &GroupPlan<'_>, key: &str, e: &anyhow::Error) -> Self {
        Self {
            group: group.name(),
            key: Some(key.to_string()),
            kind: "source",
            message: format!("{e:#}"),
        }
    }
}

enum GroupEnd {
    Finished(GroupStats),
    Interrupted(GroupStats),
}

/// Merge every planned group, `config.workers` groups at a time.
///
/// Each worker claims the next unmerged group and owns its store until the
/// group finishes. A fatal error stops only its group; after a shutdown
/// request the running groups checkpoint and no new group starts.
pub fn run(
    catalog: &Catalog,
    source: &dyn RecordSource,
    config: &Config,
    progress: &ProgressContext,
) -> anyhow::Result<RunSummary> {
    let start = Instant::now();

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;
    let stale = cleanup_tmp_files(&config.output_dir)?;
    if stale > 0 {
        log::info!("Removed {stale} unfinished checkpoint(s)");
    }

    let groups = plan_groups(catalog, source, &config.endpoints, &config.projects)?;
    if groups.is_empty() {
        log::warn!("No records to merge");
        return Ok(RunSummary::empty());
    }
    let total_records: usize = groups.iter().map(|g| g.keys.len()).sum();
    log::info!(
        "Merging {} records in {} groups with {} workers",
        fmt_num(total_records),
        groups.len(),
        config.workers
    );

    let overall = progress.overall_bar(groups.len() as u64);
    let next_idx = AtomicUsize::new(0);
    let finished: Mutex<Vec<GroupStats>> = Mutex::new(Vec::new());
    let interrupted: Mutex<Vec<GroupStats>> = Mutex::new(Vec::new());
    let failures: Mutex<Vec<GroupFailure>> = Mutex::new(Vec::new());

    rayon::scope(|s| {
        for _ in 0..config.workers.max(1) {
            s.spawn(|_| {
                loop {
                    if is_shutdown_requested() {
                        break;
                    }
                    let idx = next_idx.fetch_add(1, Ordering::SeqCst);
                    if idx >= groups.len() {
                        break;
                    }
                    let group = &groups[idx];
                    let pb = progress.group_bar(&group.name(), group.keys.len() as u64);

                    match merge_group(group, source, config, &pb) {
                        Ok(GroupEnd::Finished(stats)) => {
                            log::info!(
                                "{}: {} merged, {} already processed, {} not found",
                                group.name(),
                                stats.merged,
                                stats.already_processed,
                                stats.not_found
                            );
                            finished
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(stats);
                        }
                        Ok(GroupEnd::Interrupted(stats)) => {
                            log::warn!(
                                "{}: interrupted after {} records",
                                group.name(),
                                stats.records
                            );
                            interrupted
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(stats);
                        }
                        Err(failure) => {
                            match &failure.key {
                                Some(key) => log::error!(
                                    "{}: {} at {key}: {}",
                                    failure.group,
                                    failure.kind,
                                    failure.message
                                ),
                                None => log::error!(
                                    "{}: {}: {}",
                                    failure.group,
                                    failure.kind,
                                    failure.message
                                ),
                            }
                            failures
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(failure);
                        }
                    }
                    pb.finish_and_clear();
                    overall.inc(1);
                }
            });
        }
    });

    overall.finish_and_clear();

    let finished = finished.into_inner().unwrap_or_else(PoisonError::into_inner);
    let interrupted = interrupted
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    let failures = failures.into_inner().unwrap_or_else(PoisonError::into_inner);
    let all_stats = finished.iter().chain(&interrupted);

    let mut summary = RunSummary {
        total_groups: groups.len(),
        completed_groups: finished.len(),
        interrupted_groups: interrupted.len(),
        skipped_groups: groups.len() - finished.len() - interrupted.len() - failures.len(),
        failures,
        ..RunSummary::empty()
    };
    for stats in all_stats {
        summary.records += stats.records;
        summary.merged += stats.merged;
        summary.items += stats.items;
        summary.already_processed += stats.already_processed;
        summary.not_found += stats.not_found;
        summary.checkpoints += stats.checkpoints;
    }
    summary.elapsed = start.elapsed();

    summary.log();

    Ok(summary)
}

/// Merge one group's records in key order.
fn merge_group(
    group: &GroupPlan<'_>,
    source: &dyn RecordSource,
    config: &Config,
    pb: &ProgressBar,
) -> Result<GroupEnd, GroupFailure> {
    let mut merger = GroupMerger::open(
        group.template,
        &group.project,
        &config.output_dir,
        config.time,
        config.checkpoint_every,
        config.zstd_level,
    )
    .map_err(|e| GroupFailure::merge(group, None, &e))?;

    for key in &group.keys {
        if is_shutdown_requested() {
            let stats = merger
                .suspend()
                .map_err(|e| GroupFailure::merge(group, None, &e))?;
            return Ok(GroupEnd::Interrupted(stats));
        }
        let raw = match source.get(key.as_bytes()) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log::warn!("{key} disappeared from the source");
                pb.inc(1);
                continue;
            }
            Err(e) => return Err(GroupFailure::source(group, key, &e)),
        };
        merger
            .merge(key, &raw)
            .map_err(|e| GroupFailure::merge(group, Some(key), &e))?;
        pb.inc(1);
    }

    let stats = merger
        .finish()
        .map_err(|e| GroupFailure::merge(group, None, &e))?;
    Ok(GroupEnd::Finished(stats))
}

/// Summary of a merge run
#[derive(Debug)]
pub struct RunSummary {
    pub total_groups: usize,
    pub completed_groups: usize,
    pub interrupted_groups: usize,
    /// Groups never started because of a shutdown request.
    pub skipped_groups: usize,
    pub failures: Vec<GroupFailure>,
    pub records: usize,
    pub merged: usize,
    pub items: usize,
    pub already_processed: usize,
    pub not_found: usize,
    pub checkpoints: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn empty() -> Self {
        Self {
            total_groups: 0,
            completed_groups: 0,
            interrupted_groups: 0,
            skipped_groups: 0,
            failures: Vec::new(),
            records: 0,
            merged: 0,
            items: 0,
            already_processed: 0,
            not_found: 0,
            checkpoints: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Every group finished without a fatal error.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.interrupted_groups == 0 && self.skipped_groups == 0
    }

    pub fn log(&self) {
        log::info!("=== Merge Summary ===");
        log::info!(
            "Groups: {}/{} completed ({} failed, {} interrupted, {} skipped)",
            self.completed_groups,
            self.total_groups,
            self.failures.len(),
            self.interrupted_groups,
            self.skipped_groups
        );
        log::info!(
            "Records: {} read, {} merged ({} items), {} already processed, {} not found",
            fmt_num(self.records),
            fmt_num(self.merged),
            fmt_num(self.items),
            fmt_num(self.already_processed),
            fmt_num(self.not_found)
        );
        log::info!(
            "Checkpoints: {} in {:.1}s",
            self.checkpoints,
            self.elapsed.as_secs_f64()
        );
        for failure in &self.failures {
            log::error!(
                "FAILED {} [{}] {}",
                failure.group,
                failure.kind,
                failure.key.as_deref().unwrap_or("-")
            );
        }
    }
}
