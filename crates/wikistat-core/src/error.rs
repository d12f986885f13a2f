//! Error taxonomy for merging scraped records into array stores

use std::fmt;

/// Error raised while folding a scraped record into an array store.
///
/// Every variant is fatal for the group being merged: the runner stops that
/// (endpoint, project) group, prints the offending key and moves on to the
/// other groups. Upstream "not found" payloads are not errors; they surface
/// as a skipped merge outcome instead.
#[derive(Debug)]
pub enum MergeError {
    /// Record content does not fit the store: non-daily granularity,
    /// ambiguous coordinates, multi-field results, out-of-range timestamps.
    SchemaViolation { key: String, reason: String },
    /// Upstream returned an error other than "not found"; the scrape must be redone.
    UpstreamUnknown { key: String, detail: String },
    /// Record body is not valid JSON.
    MalformedJson { key: String, reason: String },
    /// URL maps to zero or several templates, or a label is missing from the registry.
    ConfigurationMismatch(String),
    /// `ensure_variable` on a store with no variable to copy the shape from.
    ShapeInference(String),
    /// Snapshot file is unreadable or inconsistent.
    Store(String),
    Io(std::io::Error),
}

impl MergeError {
    pub fn schema(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn mismatch(reason: impl Into<String>) -> Self {
        Self::ConfigurationMismatch(reason.into())
    }

    /// Source key of the record that triggered the error, when known.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::SchemaViolation { key, .. }
            | Self::UpstreamUnknown { key, .. }
            | Self::MalformedJson { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Short label for summaries and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaViolation { .. } => "schema-violation",
            Self::UpstreamUnknown { .. } => "upstream-unknown-error",
            Self::MalformedJson { .. } => "malformed-json",
            Self::ConfigurationMismatch(_) => "configuration-mismatch",
            Self::ShapeInference(_) => "shape-inference",
            Self::Store(_) => "store",
            Self::Io(_) => "io",
        }
    }

    /// Attach the source key to a violation raised without one.
    pub fn with_key(self, source_key: &str) -> Self {
        match self {
            Self::SchemaViolation { key, reason } if key.is_empty() => Self::SchemaViolation {
                key: source_key.to_string(),
                reason,
            },
            other => other,
        }
    }
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaViolation { key, reason } => {
                write!(f, "schema violation in {key}: {reason}")
            }
            Self::UpstreamUnknown { key, detail } => {
                write!(f, "upstream error for {key}: {detail} (re-fetch required)")
            }
            Self::MalformedJson { key, reason } => write!(f, "malformed JSON in {key}: {reason}"),
            Self::ConfigurationMismatch(reason) => write!(f, "configuration mismatch: {reason}"),
            Self::ShapeInference(reason) => write!(f, "cannot infer variable shape: {reason}"),
            Self::Store(reason) => write!(f, "store: {reason}"),
            Self::Io(e) => write!(f, "IO: {e}"),
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MergeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn schema_violation_display_names_key() {
        let err = MergeError::schema("https://x/edits", "granularity is monthly");
        let msg = err.to_string();
        assert!(msg.contains("https://x/edits"));
        assert!(msg.contains("monthly"));
    }

    #[test]
    fn key_only_for_record_errors() {
        assert_eq!(MergeError::schema("k", "r").key(), Some("k"));
        assert_eq!(MergeError::mismatch("no template").key(), None);
    }

    #[test]
    fn with_key_fills_empty_key() {
        let err = MergeError::schema("", "ambiguous").with_key("https://x/y");
        assert_eq!(err.key(), Some("https://x/y"));
    }

    #[test]
    fn with_key_keeps_existing_key() {
        let err = MergeError::schema("first", "ambiguous").with_key("second");
        assert_eq!(err.key(), Some("first"));
    }

    #[test]
    fn io_display() {
        let err = MergeError::from(std::io::Error::new(ErrorKind::NotFound, "gone"));
        assert!(err.to_string().starts_with("IO:"));
        assert_eq!(err.kind(), "io");
    }
}
