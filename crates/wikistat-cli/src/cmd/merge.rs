//! `wikistat merge` - fold scraped records into per-group array stores

use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::Args;

use wikistat_core::SharedProgress;
use wikistat_merge::KvStore;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Record source (SQLite database)
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Output directory for snapshots
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Endpoint short names to merge (default: all)
    #[arg(short, long = "endpoint")]
    pub endpoints: Vec<String>,

    /// Projects to merge (default: all)
    #[arg(short, long = "project")]
    pub projects: Vec<String>,

    /// Number of groups merged in parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Checkpoint after this many merged records
    #[arg(long)]
    pub checkpoint_every: Option<usize>,

    /// Zstd compression level (1-22)
    #[arg(short, long)]
    pub zstd_level: Option<i32>,

    /// First day of the time axis for new stores (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub start: Option<NaiveDate>,

    /// Last day of the time axis for new stores (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub end: Option<NaiveDate>,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date format: {e}"))
}

pub fn run(args: MergeArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let mut config = config.clone();
    if let Some(start) = args.start {
        config.time.start = start;
    }
    if let Some(end) = args.end {
        config.time.end = end;
    }

    let catalog = config.catalog()?;
    let source_path = args.source.unwrap_or_else(|| config.source.path.clone());
    let source = KvStore::open_existing(&source_path)?;
    log::info!("Reading records from {}", source.path().display());

    let merge_config = wikistat_merge::Config {
        output_dir: args.output.unwrap_or_else(|| config.output.dir.clone()),
        time: config.time_range()?,
        checkpoint_every: args.checkpoint_every.unwrap_or(config.merge.checkpoint_every),
        zstd_level: args.zstd_level.unwrap_or(config.output.compression_level),
        workers: args.workers.unwrap_or(config.merge.workers).max(1),
        endpoints: args.endpoints,
        projects: args.projects,
    };

    let summary = wikistat_merge::run(&catalog, &source, &merge_config, progress)?;

    if !summary.failures.is_empty() {
        bail!(
            "{} of {} groups failed; fix the records listed above and re-run",
            summary.failures.len(),
            summary.total_groups
        );
    }
    if summary.interrupted_groups + summary.skipped_groups > 0 {
        bail!("Interrupted; re-run to resume from the last checkpoints");
    }
    Ok(())
}
