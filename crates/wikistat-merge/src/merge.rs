//! Idempotent folding of one scraped (request key, response body) pair

use chrono::Utc;
use serde_json::Value;

use wikistat_catalog::{TOP_K_SIZE, Template};
use wikistat_core::{MergeError, record_marker};
use wikistat_store::{CellWrite, DType, Dataset, RANK_AXIS, Selection, page_id_variable};

use crate::response::{self, Body, Item, ItemShape, int_value, parse_timestamp};

const PAGE_ID_SUFFIX: &str = "-page_id";

/// Result of a merge call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Items were written and the key marked processed.
    Merged { items: usize },
    /// Key was merged by an earlier run; nothing changed.
    AlreadyProcessed,
    /// Upstream had no data. The key is left unmarked so a later run retries it.
    NotFound { detail: String },
}

impl MergeOutcome {
    /// Items merged by this call (drives checkpoint cadence).
    pub fn merged(&self) -> usize {
        match self {
            Self::Merged { items } => *items,
            _ => 0,
        }
    }
}

/// Writes and new variables for one record, computed before touching the store.
#[derive(Debug, Default)]
struct Plan {
    new_variables: Vec<(String, Option<String>)>,
    writes: Vec<CellWrite>,
}

impl Plan {
    /// Dtype of `name`, scheduling its creation (shaped like `like`) if missing.
    fn require_variable(
        &mut self,
        ds: &Dataset,
        name: &str,
        like: Option<String>,
    ) -> Result<DType, MergeError> {
        if let Some(values) = ds.variable(name) {
            return Ok(values.dtype());
        }
        let reference = match &like {
            Some(like) => ds.variable(like),
            None => ds.variables().next().map(|(_, v)| v),
        }
        .ok_or_else(|| {
            MergeError::ShapeInference(format!("no reference variable to shape {name} after"))
        })?;
        if !self.new_variables.iter().any(|(n, _)| n == name) {
            self.new_variables.push((name.to_string(), like));
        }
        Ok(reference.dtype())
    }

    fn commit(self, ds: &mut Dataset) -> Result<(), MergeError> {
        for (name, like) in &self.new_variables {
            ds.ensure_variable(name, like.as_deref())?;
        }
        ds.apply(&self.writes)
    }
}

/// Fold one scraped record into `ds`.
///
/// Error payloads are classified first: "not found" is skipped, any other
/// upstream error is fatal. Already-processed keys are a no-op. All writes of
/// the record are validated before any cell changes, so a fatal error leaves
/// the store untouched.
pub fn merge_record(
    ds: &mut Dataset,
    template: &Template,
    key: &str,
    raw: &[u8],
) -> Result<MergeOutcome, MergeError> {
    let items = match response::decode(key, raw)? {
        Body::Items(items) => items,
        Body::NotFound { detail } => {
            log::warn!("not found upstream, skipping {key}: {detail}");
            return Ok(MergeOutcome::NotFound { detail });
        }
        Body::UpstreamError { kind, detail } => {
            return Err(MergeError::UpstreamUnknown {
                key: key.to_string(),
                detail: format!("{kind}: {detail}"),
            });
        }
    };

    let marker = record_marker(key.as_bytes());
    if ds.processed().contains(&marker) {
        log::trace!("already merged: {key}");
        return Ok(MergeOutcome::AlreadyProcessed);
    }

    let mut plan = Plan::default();
    for item in &items {
        plan_item(ds, template, key, item, &mut plan)?;
    }
    plan.commit(ds).map_err(|e| e.with_key(key))?;
    ds.processed_mut().mark(&marker, Utc::now());

    log::debug!("merged {key} ({} items)", items.len());
    Ok(MergeOutcome::Merged { items: items.len() })
}

fn plan_item(
    ds: &Dataset,
    template: &Template,
    key: &str,
    item: &Item,
    plan: &mut Plan,
) -> Result<(), MergeError> {
    let schema = |reason: String| MergeError::schema(key, reason);

    let project = item.project().map_err(schema)?;
    if let Some(granularity) = item.granularity() {
        if granularity != "daily" {
            return Err(schema(format!(
                "granularity {granularity} is not supported, only daily"
            )));
        }
    }
    let shape = item.shape(template.is_top_k()).map_err(schema)?;
    let sel = narrow(ds, template, key, item)?;

    let free = ds.free_axes(&sel);
    let allowed: &[&str] = match shape {
        ItemShape::TopK(_) => &[RANK_AXIS],
        _ => &[],
    };
    if free != allowed {
        return Err(schema(format!(
            "item does not fully specify non-time axes (free: {free:?})"
        )));
    }

    let width = template.timestamp_width();
    let time_index = |ts: &str| -> Result<usize, MergeError> {
        let day = parse_timestamp(ts, width).map_err(schema)?;
        ds.time_range().index_of(day).ok_or_else(|| {
            schema(format!(
                "timestamp {ts} outside the store's time range {}",
                ds.time_range()
            ))
        })
    };
    let offset = |t: usize, rank: Option<usize>| {
        ds.offset(&sel, t, rank).map_err(|e| e.with_key(key))
    };

    match shape {
        ItemShape::Flat { timestamp, value } => {
            plan.require_variable(ds, project, None)?;
            let value = int_value(value).map_err(schema)?;
            plan.writes.push(CellWrite {
                variable: project.to_string(),
                offset: offset(time_index(timestamp)?, None)?,
                value,
            });
        }
        ItemShape::Results(results) => {
            plan.require_variable(ds, project, None)?;
            for result in results {
                let (timestamp, value) = sole_value(result).map_err(schema)?;
                let value = int_value(value).map_err(schema)?;
                plan.writes.push(CellWrite {
                    variable: project.to_string(),
                    offset: offset(time_index(timestamp)?, None)?,
                    value,
                });
            }
        }
        ItemShape::TopK(results) => {
            let page_ids = page_id_variable(project);
            let count_like = ds
                .variables()
                .map(|(n, _)| n)
                .find(|n| !n.ends_with(PAGE_ID_SUFFIX))
                .map(str::to_string);
            let page_like = ds
                .variables()
                .map(|(n, _)| n)
                .find(|n| n.ends_with(PAGE_ID_SUFFIX))
                .map(str::to_string);
            let count_dtype = plan.require_variable(ds, project, count_like)?;
            plan.require_variable(ds, &page_ids, page_like)?;

            for result in results {
                let result = result
                    .as_object()
                    .ok_or_else(|| schema(format!("result {result} is not an object")))?;
                let timestamp = result
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .ok_or_else(|| schema("ranked result has no timestamp".into()))?;
                let top = result
                    .get("top")
                    .and_then(Value::as_array)
                    .ok_or_else(|| schema(format!("result at {timestamp} has no top list")))?;
                if top.len() > TOP_K_SIZE {
                    log::warn!(
                        "{key}: {} ranked entries at {timestamp}, keeping {TOP_K_SIZE}",
                        top.len()
                    );
                }
                let t = time_index(timestamp)?;
                for (rank, entry) in top.iter().take(TOP_K_SIZE).enumerate() {
                    let count = entry
                        .get("edits")
                        .ok_or_else(|| schema(format!("rank {rank} at {timestamp} has no edits")))
                        .and_then(|v| int_value(v).map_err(schema))?;
                    if count_dtype == DType::Int32 && i32::try_from(count).is_err() {
                        return Err(schema(format!(
                            "edit count {count} overflows the rank variable"
                        )));
                    }
                    let page_id = entry
                        .get("page_id")
                        .map_or(Ok(0), int_value)
                        .map_err(schema)?;
                    let cell = offset(t, Some(rank))?;
                    plan.writes.push(CellWrite {
                        variable: project.to_string(),
                        offset: cell,
                        value: count,
                    });
                    plan.writes.push(CellWrite {
                        variable: page_ids.clone(),
                        offset: cell,
                        value: page_id,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Pin every registry axis whose placeholder the item names.
fn narrow(
    ds: &Dataset,
    template: &Template,
    key: &str,
    item: &Item,
) -> Result<Selection, MergeError> {
    let mut sel = ds.select_all();
    for spec in template.axes() {
        let Some(position) = ds.axis_position(&spec.axis) else {
            continue;
        };
        let Some(raw) = item.fields().get(&spec.placeholder) else {
            continue;
        };
        let label = raw.as_str().ok_or_else(|| {
            MergeError::schema(key, format!("{} = {raw} is not a label", spec.placeholder))
        })?;
        let index = ds.axes()[position].index_of(label).ok_or_else(|| {
            MergeError::mismatch(format!(
                "{key}: {} = {label} is not a registered label of axis {}",
                spec.placeholder, spec.axis
            ))
        })?;
        sel.fix(position, index);
    }
    Ok(sel)
}

/// The timestamp and the single value field of a `results[]` entry.
fn sole_value(result: &Value) -> Result<(&str, &Value), String> {
    let obj = result
        .as_object()
        .ok_or_else(|| format!("result {result} is not an object"))?;
    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or_else(|| "result has no timestamp".to_string())?;
    let mut values = obj.iter().filter(|(k, _)| k.as_str() != "timestamp");
    match (values.next(), values.next()) {
        (Some((_, v)), None) => Ok((timestamp, v)),
        (None, _) => Err(format!("result at {timestamp} has no data element")),
        (Some(_), Some(_)) => Err(format!(
            "more than one data element found in result at {timestamp}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sole_value_single_field() {
        let v = serde_json::json!({"timestamp": "2018010100", "edits": 5});
        let (ts, value) = sole_value(&v).unwrap();
        assert_eq!(ts, "2018010100");
        assert_eq!(value, &serde_json::json!(5));
    }

    #[test]
    fn sole_value_rejects_many_or_none() {
        let many = serde_json::json!({"timestamp": "2018010100", "edits": 5, "net_bytes_diff": 3});
        assert!(sole_value(&many).unwrap_err().contains("more than one"));
        let none = serde_json::json!({"timestamp": "2018010100"});
        assert!(sole_value(&none).is_err());
        assert!(sole_value(&serde_json::json!(3)).is_err());
    }

    #[test]
    fn outcome_merged_count() {
        assert_eq!(MergeOutcome::Merged { items: 2 }.merged(), 2);
        assert_eq!(MergeOutcome::AlreadyProcessed.merged(), 0);
        assert_eq!(
            MergeOutcome::NotFound {
                detail: String::new()
            }
            .merged(),
            0
        );
    }
}
