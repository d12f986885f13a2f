//! Wikistat Core - Common infrastructure for the metrics merge pipeline
//!
//! Error taxonomy, logging, progress reporting, shutdown handling and
//! hashing helpers shared by the catalog, store and merge crates.

pub mod error;
pub mod hash;
pub mod logging;
pub mod progress;
pub mod shutdown;

// Re-exports for convenience
pub use error::MergeError;
pub use hash::{record_marker, short_hash};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown};
