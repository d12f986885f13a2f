//! Merge run configuration

use std::path::PathBuf;

use wikistat_store::TimeRange;

/// Runtime configuration for a merge run
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one snapshot per (endpoint, project)
    pub output_dir: PathBuf,
    /// Time axis of newly allocated stores
    pub time: TimeRange,
    /// Checkpoint a group after this many merged records
    pub checkpoint_every: usize,
    /// Zstd compression level for snapshots
    pub zstd_level: i32,
    /// Groups merged in parallel
    pub workers: usize,
    /// Endpoint short names to merge; empty means all
    pub endpoints: Vec<String>,
    /// Projects to merge; empty means all
    pub projects: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            output_dir: PathBuf::from("./data"),
            time: TimeRange::default(),
            checkpoint_every: 300,
            zstd_level: 3,
            workers: cpus.min(8),
            endpoints: Vec::new(),
            projects: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.output_dir, PathBuf::from("./data"));
        assert_eq!(config.checkpoint_every, 300);
        assert_eq!(config.zstd_level, 3);
        assert!(config.workers >= 1 && config.workers <= 8);
        assert_eq!(config.time.days(), 6210);
        assert!(config.endpoints.is_empty());
    }
}
