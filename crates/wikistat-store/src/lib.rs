//! wikistat-store: Dense labeled arrays for merged metrics
//!
//! One [`Dataset`] per (endpoint, project): a daily `time` axis, one
//! categorical axis per registry-known placeholder, an optional `rank` axis
//! for top-K endpoints, zero-filled integer variables sharing that shape,
//! free-form attributes and the ledger of already-merged source keys.
//! Snapshots are Parquet files published through tmp → rename.

pub mod axis;
pub mod dataset;
pub mod ledger;
pub mod snapshot;

pub use axis::{Axis, RANK_AXIS, TIME_AXIS, TimeRange};
pub use dataset::{CellWrite, DType, Dataset, Selection, Values, page_id_variable};
pub use ledger::ProcessedLedger;
pub use snapshot::{StagedSnapshot, checkpoint, cleanup_tmp_files, list_snapshots, open, stage};
