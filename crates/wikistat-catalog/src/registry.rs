//! Axis Registry: allowed label set per templated placeholder

use std::collections::BTreeMap;

use wikistat_core::MergeError;

/// One registry entry: a URL placeholder, the array axis it becomes, and its labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisSpec {
    /// Placeholder as written in templates and response items (`editor-type`).
    pub placeholder: String,
    /// Axis name in the array store (`editorType`).
    pub axis: String,
    /// Ordered label set.
    pub labels: Vec<String>,
}

impl AxisSpec {
    fn new(placeholder: &str, axis: &str, labels: &[&str]) -> Self {
        Self {
            placeholder: placeholder.to_string(),
            axis: axis.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Position of `label` on this axis.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }
}

/// Declarative table of placeholder → axis. Placeholders absent from the
/// registry (`project`, `granularity`, `start`, `end`) never become axes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisRegistry {
    entries: Vec<AxisSpec>,
}

impl AxisRegistry {
    /// Registry matching the Wikimedia metrics API.
    pub fn wikimedia() -> Self {
        Self {
            entries: vec![
                AxisSpec::new(
                    "editor-type",
                    "editorType",
                    &["anonymous", "group-bot", "name-bot", "user"],
                ),
                AxisSpec::new("page-type", "pageType", &["content", "non-content"]),
                AxisSpec::new("access-site", "accessSite", &["desktop-site", "mobile-site"]),
                AxisSpec::new("access", "access", &["desktop", "mobile-app", "mobile-web"]),
                AxisSpec::new("agent", "agent", &["user", "spider"]),
                AxisSpec::new(
                    "activity-level",
                    "activityLevel",
                    &["1..4-edits", "5..24-edits", "25..99-edits", "100..-edits"],
                ),
            ],
        }
    }

    pub fn get(&self, placeholder: &str) -> Option<&AxisSpec> {
        self.entries.iter().find(|e| e.placeholder == placeholder)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AxisSpec> {
        self.entries.iter()
    }

    /// Replace label sets from configuration (`[registry]` table keyed by placeholder).
    pub fn with_overrides(
        mut self,
        overrides: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, MergeError> {
        for (placeholder, labels) in overrides {
            let entry = self
                .entries
                .iter_mut()
                .find(|e| &e.placeholder == placeholder)
                .ok_or_else(|| {
                    MergeError::mismatch(format!(
                        "registry override for unknown placeholder {{{placeholder}}}"
                    ))
                })?;
            log::debug!("registry: {placeholder} = {labels:?}");
            entry.labels = labels.clone();
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject empty label sets and duplicate labels.
    pub fn validate(&self) -> Result<(), MergeError> {
        for entry in &self.entries {
            if entry.labels.is_empty() {
                return Err(MergeError::mismatch(format!(
                    "registry axis {} has no labels",
                    entry.axis
                )));
            }
            for (i, label) in entry.labels.iter().enumerate() {
                if entry.labels[..i].contains(label) {
                    return Err(MergeError::mismatch(format!(
                        "registry axis {} lists {label} twice",
                        entry.axis
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for AxisRegistry {
    fn default() -> Self {
        Self::wikimedia()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wikimedia_registry_is_valid() {
        let registry = AxisRegistry::wikimedia();
        registry.validate().unwrap();
        assert_eq!(registry.iter().count(), 6);
    }

    #[test]
    fn lookup_by_placeholder() {
        let registry = AxisRegistry::wikimedia();
        let editor = registry.get("editor-type").unwrap();
        assert_eq!(editor.axis, "editorType");
        assert_eq!(editor.index_of("user"), Some(3));
        assert_eq!(editor.index_of("all-editor-types"), None);
        assert!(registry.get("project").is_none());
        assert!(registry.get("granularity").is_none());
    }

    #[test]
    fn override_replaces_labels() {
        let overrides = BTreeMap::from([(
            "activity-level".to_string(),
            vec!["all-activity-levels".to_string()],
        )]);
        let registry = AxisRegistry::wikimedia().with_overrides(&overrides).unwrap();
        assert_eq!(
            registry.get("activity-level").unwrap().labels,
            vec!["all-activity-levels"]
        );
    }

    #[test]
    fn override_unknown_placeholder_rejected() {
        let overrides = BTreeMap::from([("project".to_string(), vec!["en.wikipedia".to_string()])]);
        let err = AxisRegistry::wikimedia().with_overrides(&overrides).unwrap_err();
        assert_eq!(err.kind(), "configuration-mismatch");
    }

    #[test]
    fn override_with_duplicates_rejected() {
        let overrides = BTreeMap::from([(
            "agent".to_string(),
            vec!["user".to_string(), "user".to_string()],
        )]);
        assert!(AxisRegistry::wikimedia().with_overrides(&overrides).is_err());
    }

    #[test]
    fn override_with_empty_set_rejected() {
        let overrides = BTreeMap::from([("agent".to_string(), Vec::new())]);
        assert!(AxisRegistry::wikimedia().with_overrides(&overrides).is_err());
    }
}
