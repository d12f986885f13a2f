//! Endpoint catalog and reverse lookup from request URL to template

use std::collections::BTreeMap;

use wikistat_core::MergeError;

use crate::registry::AxisRegistry;
use crate::template::Template;

/// Root of every scraped request URL.
pub const BASE_URL: &str = "https://wikimedia.org/api/rest_v1";

/// Metrics endpoints as listed by the Wikimedia REST API.
pub const DEFAULT_TEMPLATES: &[&str] = &[
    "/metrics/edited-pages/aggregate/{project}/{editor-type}/{page-type}/{activity-level}/{granularity}/{start}/{end}",
    "/metrics/edits/aggregate/{project}/{editor-type}/{page-type}/{granularity}/{start}/{end}",
    "/metrics/edited-pages/new/{project}/{editor-type}/{page-type}/{granularity}/{start}/{end}",
    "/metrics/editors/aggregate/{project}/{editor-type}/{page-type}/{activity-level}/{granularity}/{start}/{end}",
    "/metrics/registered-users/new/{project}/{granularity}/{start}/{end}",
    "/metrics/bytes-difference/net/aggregate/{project}/{editor-type}/{page-type}/{granularity}/{start}/{end}",
    "/metrics/bytes-difference/absolute/aggregate/{project}/{editor-type}/{page-type}/{granularity}/{start}/{end}",
    "/metrics/unique-devices/{project}/{access-site}/{granularity}/{start}/{end}",
    "/metrics/pageviews/aggregate/{project}/{access}/{agent}/{granularity}/{start}/{end}",
    "/metrics/edited-pages/top-by-edits/{project}/{editor-type}/{page-type}/{granularity}/{start}/{end}",
];

/// A request URL resolved to its template and project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestKey<'a> {
    pub template: &'a Template,
    pub project: &'a str,
}

/// Set of endpoint templates sharing one base URL.
#[derive(Debug, Clone)]
pub struct Catalog {
    base_url: String,
    templates: Vec<Template>,
}

impl Catalog {
    /// Build and validate a catalog.
    pub fn new(
        base_url: &str,
        templates: &[&str],
        registry: &AxisRegistry,
    ) -> Result<Self, MergeError> {
        let templates = templates
            .iter()
            .map(|raw| Template::parse(raw, registry))
            .collect::<Result<Vec<_>, _>>()?;
        let catalog = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            templates,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The default Wikimedia catalog.
    pub fn wikimedia(registry: &AxisRegistry) -> Result<Self, MergeError> {
        Self::new(BASE_URL, DEFAULT_TEMPLATES, registry)
    }

    /// Startup checks that make `lookup` total and unambiguous:
    /// `{project}` comes first, prefixes never nest, short names are unique.
    pub fn validate(&self) -> Result<(), MergeError> {
        for (i, t) in self.templates.iter().enumerate() {
            if t.placeholders().first().map(String::as_str) != Some("project") {
                return Err(MergeError::mismatch(format!(
                    "template {} must start with {{project}}",
                    t.raw()
                )));
            }
            for other in &self.templates[i + 1..] {
                if t.prefix().starts_with(other.prefix()) || other.prefix().starts_with(t.prefix())
                {
                    return Err(MergeError::mismatch(format!(
                        "templates {} and {} share the prefix {}",
                        t.raw(),
                        other.raw(),
                        other.prefix().min(t.prefix())
                    )));
                }
                if t.short_name() == other.short_name() {
                    return Err(MergeError::mismatch(format!(
                        "templates {} and {} share the name {}",
                        t.raw(),
                        other.raw(),
                        t.short_name()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Find a template by its short name (`edits`, `edited-pages_new`).
    pub fn by_name(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.short_name() == name)
    }

    /// Apply per-endpoint timestamp widths (`[timestamp_width]` config table).
    pub fn with_timestamp_widths(
        mut self,
        widths: &BTreeMap<String, usize>,
    ) -> Result<Self, MergeError> {
        for (name, width) in widths {
            if !(8..=14).contains(width) {
                return Err(MergeError::mismatch(format!(
                    "timestamp width {width} for {name} is outside 8..=14"
                )));
            }
            let template = self
                .templates
                .iter_mut()
                .find(|t| t.short_name() == name)
                .ok_or_else(|| {
                    MergeError::mismatch(format!("timestamp width for unknown endpoint {name}"))
                })?;
            template.set_timestamp_width(*width);
        }
        Ok(self)
    }

    /// Template whose literal prefix matches `url`. Exactly one must match.
    pub fn lookup(&self, url: &str) -> Result<&Template, MergeError> {
        let path = url.strip_prefix(&self.base_url).ok_or_else(|| {
            MergeError::mismatch(format!("{url} is not under {}", self.base_url))
        })?;
        let mut hits = self.templates.iter().filter(|t| path.starts_with(t.prefix()));
        match (hits.next(), hits.next()) {
            (Some(t), None) => Ok(t),
            (None, _) => Err(MergeError::mismatch(format!("no endpoint template matches {url}"))),
            (Some(a), Some(b)) => Err(MergeError::mismatch(format!(
                "{url} matches both {} and {}",
                a.short_name(),
                b.short_name()
            ))),
        }
    }

    /// Resolve a request URL to (template, project).
    pub fn request_key<'a>(&'a self, url: &'a str) -> Result<RequestKey<'a>, MergeError> {
        let template = self.lookup(url)?;
        let rest = &url[self.base_url.len() + template.prefix().len()..];
        let project = rest.split('/').next().unwrap_or_default();
        if project.is_empty() {
            return Err(MergeError::mismatch(format!("{url} has no project segment")));
        }
        Ok(RequestKey { template, project })
    }
}
