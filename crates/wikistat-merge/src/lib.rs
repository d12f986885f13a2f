//! Wikistat Merge - folds scraped Wikimedia metrics responses into array stores
//!
//! Records are read from an ordered key-value source, grouped by
//! (endpoint, project), and merged idempotently into one labeled array store
//! per group, checkpointed to Parquet.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use wikistat_catalog::{AxisRegistry, Catalog};
//! use wikistat_core::ProgressContext;
//! use wikistat_merge::{Config, KvStore, run};
//!
//! let catalog = Catalog::wikimedia(&AxisRegistry::wikimedia()).unwrap();
//! let source = KvStore::open_existing(Path::new("records.db")).unwrap();
//! let summary = run(&catalog, &source, &Config::default(), &ProgressContext::new()).unwrap();
//! println!("Merged {} records", summary.merged);
//! ```

pub mod config;
pub mod group;
pub mod merge;
pub mod plan;
pub mod response;
pub mod runner;
pub mod source;

pub use config::Config;
pub use group::{GroupMerger, GroupState, GroupStats};
pub use merge::{MergeOutcome, merge_record};
pub use plan::{GroupPlan, plan_groups, select_templates};
pub use runner::{GroupFailure, RunSummary, run};
pub use source::{ImportStats, KvStore, MemorySource, RecordSource, prefix_upper_bound};
