//! Per-group merge state: one store, one snapshot file

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use wikistat_catalog::Template;
use wikistat_core::MergeError;
use wikistat_store::{Dataset, TimeRange, checkpoint, open};

use crate::merge::{MergeOutcome, merge_record};

/// Lifecycle of a group's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Unseen,
    /// Freshly allocated or reopened from its last checkpoint.
    Allocated,
    Merging,
    Checkpointed,
}

/// Counts for one group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GroupStats {
    pub records: usize,
    pub merged: usize,
    pub items: usize,
    pub already_processed: usize,
    pub not_found: usize,
    pub checkpoints: usize,
}

/// Owns the store of one (endpoint, project) group while it is merged.
///
/// Checkpoints every `checkpoint_every` merged records and once more at the
/// end of the group.
#[derive(Debug)]
pub struct GroupMerger<'a> {
    template: &'a Template,
    project: String,
    path: PathBuf,
    ds: Dataset,
    state: GroupState,
    /// Snapshot file does not exist yet.
    is_new: bool,
    dirty: bool,
    since_checkpoint: usize,
    checkpoint_every: usize,
    zstd_level: i32,
    stats: GroupStats,
}

impl<'a> GroupMerger<'a> {
    /// Reopen the group's snapshot, or allocate a zero store when there is none.
    ///
    /// A reopened store must have the axes the current registry and time range
    /// would allocate.
    pub fn open(
        template: &'a Template,
        project: &str,
        output_dir: &Path,
        time: TimeRange,
        checkpoint_every: usize,
        zstd_level: i32,
    ) -> Result<Self, MergeError> {
        let path = output_dir.join(template.output_file(project));
        let (ds, is_new) = if path.exists() {
            let ds = open(&path)?;
            ds.conforms_to(&Dataset::layout(template, time))?;
            match ds.attrs().get("endpoint") {
                Some(endpoint) if endpoint != template.raw() => {
                    return Err(MergeError::mismatch(format!(
                        "{} holds {endpoint}, expected {}",
                        path.display(),
                        template.raw()
                    )));
                }
                _ => {}
            }
            log::debug!(
                "reopened {} ({} processed)",
                path.display(),
                ds.processed().len()
            );
            (ds, false)
        } else {
            (Dataset::allocate(template, project, time), true)
        };
        Ok(Self {
            template,
            project: project.to_string(),
            path,
            ds,
            state: GroupState::Allocated,
            is_new,
            dirty: false,
            since_checkpoint: 0,
            checkpoint_every: checkpoint_every.max(1),
            zstd_level,
            stats: GroupStats::default(),
        })
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn stats(&self) -> GroupStats {
        self.stats
    }

    pub fn dataset(&self) -> &Dataset {
        &self.ds
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge one record, checkpointing when the cadence is reached.
    pub fn merge(&mut self, key: &str, raw: &[u8]) -> Result<MergeOutcome, MergeError> {
        self.state = GroupState::Merging;
        self.stats.records += 1;
        let outcome = merge_record(&mut self.ds, self.template, key, raw)?;
        match &outcome {
            MergeOutcome::Merged { items } => {
                self.stats.merged += 1;
                self.stats.items += items;
                self.dirty = true;
                self.since_checkpoint += 1;
            }
            MergeOutcome::AlreadyProcessed => self.stats.already_processed += 1,
            MergeOutcome::NotFound { .. } => self.stats.not_found += 1,
        }
        if self.since_checkpoint >= self.checkpoint_every {
            self.checkpoint()?;
        }
        Ok(outcome)
    }

    /// Publish the store atomically.
    pub fn checkpoint(&mut self) -> Result<(), MergeError> {
        checkpoint(&self.ds, &self.path, self.zstd_level)?;
        log::debug!("checkpointed {}", self.path.display());
        self.stats.checkpoints += 1;
        self.since_checkpoint = 0;
        self.dirty = false;
        self.is_new = false;
        self.state = GroupState::Checkpointed;
        Ok(())
    }

    /// Checkpoint pending merges without marking the group done.
    pub fn suspend(mut self) -> Result<GroupStats, MergeError> {
        if self.dirty {
            self.checkpoint()?;
        }
        Ok(self.stats)
    }

    /// Mark the group done and write the final checkpoint, skipping the write
    /// when nothing changed since the last one.
    pub fn finish(mut self) -> Result<GroupStats, MergeError> {
        let done = format!("done-{}", self.project);
        if self.dirty || self.is_new || !self.ds.attrs().contains_key(&done) {
            self.ds
                .set_attr(done, Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
            self.checkpoint()?;
        } else {
            log::debug!("{} unchanged", self.path.display());
        }
        Ok(self.stats)
    }
}
