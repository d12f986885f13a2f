//! Grouping of source keys into (endpoint, project) merge groups

use anyhow::{Context, bail};
use rustc_hash::FxHashMap;

use wikistat_catalog::{Catalog, Template};

use crate::source::RecordSource;

/// All source keys of one (endpoint, project) pair, in key order.
#[derive(Debug, Clone)]
pub struct GroupPlan<'a> {
    pub template: &'a Template,
    pub project: String,
    pub keys: Vec<String>,
}

impl GroupPlan<'_> {
    /// Display name, e.g. `edits/en.wikipedia`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.template.short_name(), self.project)
    }

    pub fn output_file(&self) -> String {
        self.template.output_file(&self.project)
    }
}

/// Resolve endpoint short names; empty selects the whole catalog.
pub fn select_templates<'a>(
    catalog: &'a Catalog,
    endpoints: &[String],
) -> anyhow::Result<Vec<&'a Template>> {
    if endpoints.is_empty() {
        return Ok(catalog.templates().iter().collect());
    }
    endpoints
        .iter()
        .map(|name| match catalog.by_name(name) {
            Some(t) => Ok(t),
            None => {
                let known: Vec<_> = catalog.templates().iter().map(Template::short_name).collect();
                bail!("unknown endpoint {name} (known: {})", known.join(", "))
            }
        })
        .collect()
}

/// Scan each selected template's prefix and split its keys by project.
///
/// Keys sort bytewise and the project segment is followed by `/`, so each
/// project's keys are one contiguous run. Keys that are not UTF-8 are skipped.
/// An empty `projects` list selects every project.
pub fn plan_groups<'a>(
    catalog: &'a Catalog,
    source: &dyn RecordSource,
    endpoints: &[String],
    projects: &[String],
) -> anyhow::Result<Vec<GroupPlan<'a>>> {
    let mut groups = Vec::new();
    for template in select_templates(catalog, endpoints)? {
        // A project filter narrows the scan to the selected groups' ranges.
        let prefixes = if projects.is_empty() {
            vec![template.scan_prefix(catalog.base_url())]
        } else {
            projects
                .iter()
                .map(|p| template.group_prefix(catalog.base_url(), p))
                .collect()
        };
        let mut keys = Vec::new();
        for prefix in &prefixes {
            let found = source
                .keys_with_prefix(prefix.as_bytes())
                .with_context(|| format!("scanning {prefix}"))?;
            log::debug!("{}: {} keys under {prefix}", template.short_name(), found.len());
            keys.extend(found);
        }

        let mut by_project: FxHashMap<String, usize> = FxHashMap::default();
        let mut template_groups: Vec<GroupPlan<'a>> = Vec::new();
        for key in keys {
            let key = match String::from_utf8(key) {
                Ok(k) => k,
                Err(e) => {
                    let lossy = String::from_utf8_lossy(e.as_bytes());
                    log::warn!("skipping non UTF-8 key {lossy:?}");
                    continue;
                }
            };
            let project = catalog.request_key(&key)?.project.to_string();
            let idx = *by_project.entry(project.clone()).or_insert_with(|| {
                template_groups.push(GroupPlan {
                    template,
                    project,
                    keys: Vec::new(),
                });
                template_groups.len() - 1
            });
            template_groups[idx].keys.push(key);
        }
        groups.extend(template_groups);
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use wikistat_catalog::AxisRegistry;

    fn catalog() -> Catalog {
        Catalog::wikimedia(&AxisRegistry::wikimedia()).unwrap()
    }

    const BASE: &str = "https://wikimedia.org/api/rest_v1";

    fn source() -> MemorySource {
        [
            format!("{BASE}/metrics/edits/aggregate/en.wikipedia/user/content/daily/2017010100/2018010100"),
            format!("{BASE}/metrics/edits/aggregate/en.wikipedia/anonymous/content/daily/2017010100/2018010100"),
            format!("{BASE}/metrics/edits/aggregate/en.wikipedia.org/user/content/daily/2017010100/2018010100"),
            format!("{BASE}/metrics/edits/aggregate/de.wikipedia/user/content/daily/2017010100/2018010100"),
            format!("{BASE}/metrics/pageviews/aggregate/de.wikipedia/all-access/user/daily/2017010100/2018010100"),
        ]
        .into_iter()
        .map(|k| (k, "{}"))
        .collect()
    }

    #[test]
    fn groups_by_project() {
        let catalog = catalog();
        let groups = plan_groups(&catalog, &source(), &["edits".into()], &[]).unwrap();
        let names: Vec<_> = groups.iter().map(|g| (g.name(), g.keys.len())).collect();
        assert_eq!(
            names,
            vec![
                ("edits/de.wikipedia".to_string(), 1),
                ("edits/en.wikipedia.org".to_string(), 1),
                ("edits/en.wikipedia".to_string(), 2),
            ]
        );
        // Keys within a group stay in source order.
        let en = &groups[2];
        assert!(en.keys[0].contains("/anonymous/"));
        assert_eq!(en.output_file(), "edits__en.wikipedia.parquet");
    }

    #[test]
    fn project_filter() {
        let catalog = catalog();
        let groups = plan_groups(&catalog, &source(), &[], &["de.wikipedia".into()]).unwrap();
        let names: Vec<_> = groups.iter().map(GroupPlan::name).collect();
        assert_eq!(names, vec!["edits/de.wikipedia", "pageviews/de.wikipedia"]);
    }

    #[test]
    fn unknown_endpoint_is_rejected() {
        let catalog = catalog();
        let err = plan_groups(&catalog, &source(), &["nope".into()], &[]).unwrap_err();
        assert!(err.to_string().contains("unknown endpoint nope"));
    }
}
