//! Endpoint templates: placeholder parsing and axis derivation

use std::fmt;

use wikistat_core::MergeError;

use crate::registry::{AxisRegistry, AxisSpec};

/// Substring marking ranked-list endpoints.
pub const TOP_K_MARKER: &str = "/top-by-edits/";

/// Fixed length of the ranked-list axis.
pub const TOP_K_SIZE: usize = 100;

/// Timestamp width (`YYYYMMDDHH`) that short timestamps are right-padded to.
pub const DEFAULT_TIMESTAMP_WIDTH: usize = 10;

/// Path segments that carry no meaning in output names.
const NOISE_SEGMENTS: &[&str] = &["metrics", "aggregate"];

/// Parsed endpoint template. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    placeholders: Vec<String>,
    prefix: String,
    axes: Vec<AxisSpec>,
    top_k: bool,
    short_name: String,
    timestamp_width: usize,
}

impl Template {
    /// Parse a template such as
    /// `/metrics/edits/aggregate/{project}/{editor-type}/{page-type}/{granularity}/{start}/{end}`.
    pub fn parse(raw: &str, registry: &AxisRegistry) -> Result<Self, MergeError> {
        let mut placeholders = Vec::new();
        let mut literals = Vec::new();
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) if !name.is_empty() && !name.contains(['{', '}']) => {
                    placeholders.push(name.to_string());
                }
                Some(_) => {
                    return Err(MergeError::mismatch(format!(
                        "template {raw}: empty or nested placeholder"
                    )));
                }
                None if segment.contains(['{', '}']) => {
                    return Err(MergeError::mismatch(format!(
                        "template {raw}: malformed segment {segment}"
                    )));
                }
                None => {
                    if placeholders.is_empty() {
                        literals.push(segment);
                    } else if !NOISE_SEGMENTS.contains(&segment) {
                        return Err(MergeError::mismatch(format!(
                            "template {raw}: literal {segment} after a placeholder"
                        )));
                    }
                }
            }
        }

        let first = raw.find('{').ok_or_else(|| {
            MergeError::mismatch(format!("template {raw} has no placeholders"))
        })?;
        let prefix = raw[..first].to_string();

        let axes = placeholders
            .iter()
            .filter_map(|p| registry.get(p).cloned())
            .collect();

        let short_name = literals
            .iter()
            .filter(|s| !NOISE_SEGMENTS.contains(s))
            .copied()
            .collect::<Vec<_>>()
            .join("_");

        Ok(Self {
            raw: raw.to_string(),
            placeholders,
            prefix,
            axes,
            top_k: raw.contains(TOP_K_MARKER),
            short_name,
            timestamp_width: DEFAULT_TIMESTAMP_WIDTH,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Placeholder names in template order.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Literal part before the first placeholder.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Registry-known placeholders of this template, in template order.
    pub fn axes(&self) -> &[AxisSpec] {
        &self.axes
    }

    pub fn is_top_k(&self) -> bool {
        self.top_k
    }

    /// Name used for output files (`edited-pages_new`, `bytes-difference_net`).
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn timestamp_width(&self) -> usize {
        self.timestamp_width
    }

    pub fn set_timestamp_width(&mut self, width: usize) {
        self.timestamp_width = width;
    }

    /// Output file name for one project.
    pub fn output_file(&self, project: &str) -> String {
        format!("{}__{project}.parquet", self.short_name)
    }

    /// Key prefix covering every request issued against this template.
    pub fn scan_prefix(&self, base_url: &str) -> String {
        format!("{base_url}{}", self.prefix)
    }

    /// Key prefix covering one (endpoint, project) group.
    pub fn group_prefix(&self, base_url: &str, project: &str) -> String {
        format!("{base_url}{}{project}/", self.prefix)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDITS: &str =
        "/metrics/edits/aggregate/{project}/{editor-type}/{page-type}/{granularity}/{start}/{end}";

    fn parse(raw: &str) -> Template {
        Template::parse(raw, &AxisRegistry::wikimedia()).unwrap()
    }

    #[test]
    fn placeholders_in_order() {
        let t = parse(EDITS);
        assert_eq!(
            t.placeholders(),
            &["project", "editor-type", "page-type", "granularity", "start", "end"]
        );
        assert_eq!(t.prefix(), "/metrics/edits/aggregate/");
    }

    #[test]
    fn only_registry_placeholders_become_axes() {
        let t = parse(EDITS);
        let axes: Vec<_> = t.axes().iter().map(|a| a.axis.as_str()).collect();
        assert_eq!(axes, vec!["editorType", "pageType"]);
        assert!(!t.is_top_k());
    }

    #[test]
    fn top_k_detected_by_marker() {
        let t = parse(
            "/metrics/edited-pages/top-by-edits/{project}/{editor-type}/{page-type}/{granularity}/{start}/{end}",
        );
        assert!(t.is_top_k());
        assert_eq!(t.short_name(), "edited-pages_top-by-edits");
    }

    #[test]
    fn short_names_drop_noise() {
        assert_eq!(parse(EDITS).short_name(), "edits");
        assert_eq!(
            parse("/metrics/bytes-difference/net/aggregate/{project}/{editor-type}/{page-type}/{granularity}/{start}/{end}")
                .short_name(),
            "bytes-difference_net"
        );
        assert_eq!(
            parse("/metrics/registered-users/new/{project}/{granularity}/{start}/{end}")
                .short_name(),
            "registered-users_new"
        );
    }

    #[test]
    fn registered_users_has_no_axes() {
        let t = parse("/metrics/registered-users/new/{project}/{granularity}/{start}/{end}");
        assert!(t.axes().is_empty());
    }

    #[test]
    fn prefixes_and_output_file() {
        let t = parse(EDITS);
        let base = "https://wikimedia.org/api/rest_v1";
        assert_eq!(
            t.scan_prefix(base),
            "https://wikimedia.org/api/rest_v1/metrics/edits/aggregate/"
        );
        assert_eq!(
            t.group_prefix(base, "en.wikipedia"),
            "https://wikimedia.org/api/rest_v1/metrics/edits/aggregate/en.wikipedia/"
        );
        assert_eq!(t.output_file("en.wikipedia"), "edits__en.wikipedia.parquet");
    }

    #[test]
    fn malformed_templates_rejected() {
        let registry = AxisRegistry::wikimedia();
        assert!(Template::parse("/metrics/edits/aggregate", &registry).is_err());
        assert!(Template::parse("/metrics/{}/x", &registry).is_err());
        assert!(Template::parse("/metrics/{project/x", &registry).is_err());
        assert!(Template::parse("/metrics/{project}/daily/{end}", &registry).is_err());
    }

    #[test]
    fn timestamp_width_configurable() {
        let mut t = parse(EDITS);
        assert_eq!(t.timestamp_width(), DEFAULT_TIMESTAMP_WIDTH);
        t.set_timestamp_width(12);
        assert_eq!(t.timestamp_width(), 12);
    }
}
