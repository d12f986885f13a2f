//! Wikistat Catalog - Endpoint templates and the Axis Registry
//!
//! Static description of the Wikimedia REST metrics endpoints: which
//! placeholders each template carries, which of them become labeled array
//! axes, and how a concrete request URL maps back to its template.
//!
//! # Example
//!
//! ```
//! use wikistat_catalog::{AxisRegistry, Catalog};
//!
//! let catalog = Catalog::wikimedia(&AxisRegistry::wikimedia()).unwrap();
//! let key = catalog
//!     .request_key("https://wikimedia.org/api/rest_v1/metrics/edits/aggregate/en.wikipedia/user/content/daily/20180101/20180102")
//!     .unwrap();
//! assert_eq!(key.template.short_name(), "edits");
//! assert_eq!(key.project, "en.wikipedia");
//! ```

pub mod catalog;
pub mod registry;
pub mod template;

pub use catalog::{BASE_URL, Catalog, DEFAULT_TEMPLATES, RequestKey};
pub use registry::{AxisRegistry, AxisSpec};
pub use template::{DEFAULT_TIMESTAMP_WIDTH, TOP_K_MARKER, TOP_K_SIZE, Template};
