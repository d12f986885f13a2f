//! In-memory labeled dataset: shared axes, integer variables, metadata

use std::collections::BTreeMap;

use wikistat_catalog::{TOP_K_SIZE, Template};
use wikistat_core::MergeError;

use crate::axis::{Axis, RANK_AXIS, TIME_AXIS, TimeRange};
use crate::ledger::ProcessedLedger;

/// Name of the page-id variable paired with a top-K count variable.
pub fn page_id_variable(project: &str) -> String {
    format!("{project}-page_id")
}

/// Element type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Int64,
    /// Top-K edit counts.
    Int32,
}

/// Flat row-major cell values of one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Values {
    Int64(Vec<i64>),
    Int32(Vec<i32>),
}

impl Values {
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::Int64 => Self::Int64(vec![0; len]),
            DType::Int32 => Self::Int32(vec![0; len]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Self::Int64(_) => DType::Int64,
            Self::Int32(_) => DType::Int32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Int64(v) => v.len(),
            Self::Int32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, offset: usize) -> Option<i64> {
        match self {
            Self::Int64(v) => v.get(offset).copied(),
            Self::Int32(v) => v.get(offset).map(|&x| i64::from(x)),
        }
    }

    /// Number of non-zero cells.
    pub fn filled(&self) -> usize {
        match self {
            Self::Int64(v) => v.iter().filter(|&&x| x != 0).count(),
            Self::Int32(v) => v.iter().filter(|&&x| x != 0).count(),
        }
    }

    fn fits(&self, value: i64) -> bool {
        match self {
            Self::Int64(_) => true,
            Self::Int32(_) => i32::try_from(value).is_ok(),
        }
    }

    // Callers check bounds and range first.
    fn set(&mut self, offset: usize, value: i64) {
        match self {
            Self::Int64(v) => v[offset] = value,
            Self::Int32(v) => v[offset] = value as i32,
        }
    }
}

/// One pending cell assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub variable: String,
    pub offset: usize,
    pub value: i64,
}

/// Per-axis pinned index; `None` leaves the axis free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    fixed: Vec<Option<usize>>,
}

impl Selection {
    pub fn fix(&mut self, axis: usize, index: usize) {
        self.fixed[axis] = Some(index);
    }

    pub fn get(&self, axis: usize) -> Option<usize> {
        self.fixed.get(axis).copied().flatten()
    }
}

/// Dense labeled array store for one (endpoint, project) pair.
///
/// Axis order is `time`, the template's categorical axes, then `rank` for
/// top-K endpoints. Every variable has exactly that shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    axes: Vec<Axis>,
    time: TimeRange,
    variables: BTreeMap<String, Values>,
    attrs: BTreeMap<String, String>,
    processed: ProcessedLedger,
}

impl Dataset {
    /// Zero-filled store sized by the template's axes and the time range.
    ///
    /// Top-K endpoints get an `i32` count variable plus an `i64`
    /// `<project>-page_id` variable; every other endpoint one `i64` variable.
    pub fn allocate(template: &Template, project: &str, time: TimeRange) -> Self {
        let axes = Self::layout(template, time);
        let cells = axes.iter().map(Axis::len).product();
        let mut variables = BTreeMap::new();
        if template.is_top_k() {
            variables.insert(project.to_string(), Values::zeros(DType::Int32, cells));
            variables.insert(page_id_variable(project), Values::zeros(DType::Int64, cells));
        } else {
            variables.insert(project.to_string(), Values::zeros(DType::Int64, cells));
        }

        let attrs = BTreeMap::from([("endpoint".to_string(), template.raw().to_string())]);

        Self {
            axes,
            time,
            variables,
            attrs,
            processed: ProcessedLedger::new(),
        }
    }

    /// Axes a store for `template` has: time, categorical axes, optional rank.
    pub fn layout(template: &Template, time: TimeRange) -> Vec<Axis> {
        let mut axes = vec![time.axis()];
        axes.extend(
            template
                .axes()
                .iter()
                .map(|spec| Axis::new(spec.axis.clone(), spec.labels.clone())),
        );
        if template.is_top_k() {
            axes.push(Axis::new(
                RANK_AXIS,
                (0..TOP_K_SIZE).map(|i| i.to_string()).collect(),
            ));
        }
        axes
    }

    /// Rebuild a dataset from decoded parts, checking shape consistency.
    pub fn from_parts(
        axes: Vec<Axis>,
        variables: BTreeMap<String, Values>,
        attrs: BTreeMap<String, String>,
        processed: ProcessedLedger,
    ) -> Result<Self, MergeError> {
        let time_axis = axes
            .first()
            .filter(|a| a.name == TIME_AXIS)
            .ok_or_else(|| MergeError::Store("first axis must be time".into()))?;
        let time = TimeRange::from_axis(time_axis)?;
        for (i, axis) in axes.iter().enumerate() {
            if axis.is_empty() {
                return Err(MergeError::Store(format!("axis {} has no labels", axis.name)));
            }
            if axes[..i].iter().any(|a| a.name == axis.name) {
                return Err(MergeError::Store(format!("axis {} appears twice", axis.name)));
            }
        }
        let cells: usize = axes.iter().map(Axis::len).product();
        for (name, values) in &variables {
            if values.len() != cells {
                return Err(MergeError::Store(format!(
                    "variable {name} has {} cells, axes need {cells}",
                    values.len()
                )));
            }
        }
        Ok(Self {
            axes,
            time,
            variables,
            attrs,
            processed,
        })
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(Axis::len).collect()
    }

    pub fn cell_count(&self) -> usize {
        self.axes.iter().map(Axis::len).product()
    }

    pub fn time_range(&self) -> TimeRange {
        self.time
    }

    pub fn axis_position(&self, name: &str) -> Option<usize> {
        self.axes.iter().position(|a| a.name == name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &Values)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn variable(&self, name: &str) -> Option<&Values> {
        self.variables.get(name)
    }

    /// Make sure `name` exists, shaped and typed like `like` (or the first
    /// variable when `like` is `None`). Returns true if it was created.
    pub fn ensure_variable(&mut self, name: &str, like: Option<&str>) -> Result<bool, MergeError> {
        if self.variables.contains_key(name) {
            return Ok(false);
        }
        let reference = match like {
            Some(like) => self.variables.get(like).ok_or_else(|| {
                MergeError::ShapeInference(format!("reference variable {like} does not exist"))
            })?,
            None => self.variables.values().next().ok_or_else(|| {
                MergeError::ShapeInference(format!(
                    "store has no variable to copy the shape of {name} from"
                ))
            })?,
        };
        let values = Values::zeros(reference.dtype(), reference.len());
        log::debug!("new variable {name} ({:?}, {} cells)", values.dtype(), values.len());
        self.variables.insert(name.to_string(), values);
        Ok(true)
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub fn processed(&self) -> &ProcessedLedger {
        &self.processed
    }

    pub fn processed_mut(&mut self) -> &mut ProcessedLedger {
        &mut self.processed
    }

    /// Selection with every axis free.
    pub fn select_all(&self) -> Selection {
        Selection {
            fixed: vec![None; self.axes.len()],
        }
    }

    /// Names of axes left free by `sel`, ignoring `time`.
    pub fn free_axes(&self, sel: &Selection) -> Vec<&str> {
        self.axes
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(i, _)| sel.get(*i).is_none())
            .map(|(_, a)| a.name.as_str())
            .collect()
    }

    /// Flat offset of the cell at `time` / `rank` within the selection.
    ///
    /// Every other axis must be pinned by `sel`.
    pub fn offset(
        &self,
        sel: &Selection,
        time: usize,
        rank: Option<usize>,
    ) -> Result<usize, MergeError> {
        let mut offset = 0;
        for (i, axis) in self.axes.iter().enumerate() {
            let index = if i == 0 {
                time
            } else if axis.name == RANK_AXIS {
                rank.ok_or_else(|| MergeError::schema("", "rank not given for top-K cell"))?
            } else {
                sel.get(i).ok_or_else(|| {
                    MergeError::schema("", format!("axis {} is not specified", axis.name))
                })?
            };
            if index >= axis.len() {
                return Err(MergeError::schema(
                    "",
                    format!("index {index} outside axis {} ({})", axis.name, axis.len()),
                ));
            }
            offset = offset * axis.len() + index;
        }
        Ok(offset)
    }

    /// Apply all writes, or none: every write is checked before any cell changes.
    pub fn apply(&mut self, writes: &[CellWrite]) -> Result<(), MergeError> {
        for w in writes {
            let values = self.variables.get(&w.variable).ok_or_else(|| {
                MergeError::Store(format!("write to missing variable {}", w.variable))
            })?;
            if w.offset >= values.len() {
                return Err(MergeError::Store(format!(
                    "write to {} at {} beyond {} cells",
                    w.variable,
                    w.offset,
                    values.len()
                )));
            }
            if !values.fits(w.value) {
                return Err(MergeError::schema(
                    "",
                    format!(
                        "value {} does not fit {:?} variable {}",
                        w.value,
                        values.dtype(),
                        w.variable
                    ),
                ));
            }
        }
        for w in writes {
            if let Some(values) = self.variables.get_mut(&w.variable) {
                values.set(w.offset, w.value);
            }
        }
        Ok(())
    }

    /// Value at fully labeled coordinates, e.g.
    /// `[("time", "2018-01-01"), ("editorType", "user"), ("pageType", "content")]`.
    pub fn value_at(&self, variable: &str, coords: &[(&str, &str)]) -> Option<i64> {
        let values = self.variables.get(variable)?;
        let mut offset = 0;
        for axis in &self.axes {
            let label = coords.iter().find(|(name, _)| *name == axis.name)?.1;
            offset = offset * axis.len() + axis.index_of(label)?;
        }
        values.get(offset)
    }

    /// Check that a reopened store has exactly the axes a fresh allocation would.
    pub fn conforms_to(&self, expected: &[Axis]) -> Result<(), MergeError> {
        if self.axes.len() != expected.len() {
            return Err(MergeError::mismatch(format!(
                "store has axes {:?}, catalog expects {:?}",
                self.axis_names(),
                expected.iter().map(|a| a.name.as_str()).collect::<Vec<_>>()
            )));
        }
        for (have, want) in self.axes.iter().zip(expected) {
            if have != want {
                return Err(MergeError::mismatch(format!(
                    "axis {} differs from the catalog (stored {} labels, expected {} labels for {})",
                    have.name,
                    have.len(),
                    want.len(),
                    want.name
                )));
            }
        }
        Ok(())
    }

    fn axis_names(&self) -> Vec<&str> {
        self.axes.iter().map(|a| a.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use wikistat_catalog::{AxisRegistry, Template};

    const EDITS: &str =
        "/metrics/edits/aggregate/{project}/{editor-type}/{page-type}/{granularity}/{start}/{end}";
    const TOP: &str = "/metrics/edited-pages/top-by-edits/{project}/{editor-type}/{page-type}/{granularity}/{start}/{end}";

    fn week() -> TimeRange {
        TimeRange::new(
            NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2018, 1, 7).unwrap(),
        )
        .unwrap()
    }

    fn template(raw: &str) -> Template {
        Template::parse(raw, &AxisRegistry::wikimedia()).unwrap()
    }

    #[test]
    fn allocate_shape() {
        let ds = Dataset::allocate(&template(EDITS), "en.wikipedia", week());
        assert_eq!(ds.shape(), vec![7, 4, 2]);
        let names: Vec<_> = ds.axes().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["time", "editorType", "pageType"]);
        let var = ds.variable("en.wikipedia").unwrap();
        assert_eq!(var.dtype(), DType::Int64);
        assert_eq!(var.filled(), 0);
        assert_eq!(ds.attrs()["endpoint"], EDITS);
    }

    #[test]
    fn allocate_is_deterministic() {
        let a = Dataset::allocate(&template(EDITS), "en.wikipedia", week());
        let b = Dataset::allocate(&template(EDITS), "en.wikipedia", week());
        assert_eq!(a, b);
    }

    #[test]
    fn allocate_top_k() {
        let ds = Dataset::allocate(&template(TOP), "ja.wikipedia", week());
        assert_eq!(ds.shape(), vec![7, 4, 2, 100]);
        assert_eq!(ds.variable("ja.wikipedia").unwrap().dtype(), DType::Int32);
        assert_eq!(
            ds.variable("ja.wikipedia-page_id").unwrap().dtype(),
            DType::Int64
        );
    }

    #[test]
    fn ensure_variable_copies_like() {
        let mut ds = Dataset::allocate(&template(TOP), "ja.wikipedia", week());
        assert!(ds.ensure_variable("fr.wikipedia", Some("ja.wikipedia")).unwrap());
        assert!(!ds.ensure_variable("fr.wikipedia", None).unwrap());
        assert_eq!(ds.variable("fr.wikipedia").unwrap().dtype(), DType::Int32);
        assert!(
            ds.ensure_variable("fr.wikipedia-page_id", Some("ja.wikipedia-page_id"))
                .unwrap()
        );
        assert_eq!(
            ds.variable("fr.wikipedia-page_id").unwrap().dtype(),
            DType::Int64
        );
    }

    #[test]
    fn ensure_variable_without_reference_fails() {
        let ds = Dataset::allocate(&template(EDITS), "en.wikipedia", week());
        let mut empty = Dataset::from_parts(
            ds.axes().to_vec(),
            BTreeMap::new(),
            BTreeMap::new(),
            ProcessedLedger::new(),
        )
        .unwrap();
        let err = empty.ensure_variable("en.wikipedia", None).unwrap_err();
        assert_eq!(err.kind(), "shape-inference");

        let mut ds = ds;
        assert!(ds.ensure_variable("x", Some("missing")).is_err());
    }

    #[test]
    fn offset_requires_pinned_axes() {
        let ds = Dataset::allocate(&template(EDITS), "en.wikipedia", week());
        let mut sel = ds.select_all();
        assert_eq!(ds.free_axes(&sel), vec!["editorType", "pageType"]);
        assert!(ds.offset(&sel, 0, None).is_err());
        sel.fix(1, 3);
        sel.fix(2, 0);
        assert!(ds.free_axes(&sel).is_empty());
        // time 2 * (4*2) + user 3 * 2 + content 0
        assert_eq!(ds.offset(&sel, 2, None).unwrap(), 22);
        assert!(ds.offset(&sel, 7, None).is_err());
    }

    #[test]
    fn apply_then_value_at() {
        let mut ds = Dataset::allocate(&template(EDITS), "en.wikipedia", week());
        let mut sel = ds.select_all();
        sel.fix(1, 3);
        sel.fix(2, 0);
        let offset = ds.offset(&sel, 0, None).unwrap();
        ds.apply(&[CellWrite {
            variable: "en.wikipedia".into(),
            offset,
            value: 42,
        }])
        .unwrap();
        let coords = [
            ("time", "2018-01-01"),
            ("editorType", "user"),
            ("pageType", "content"),
        ];
        assert_eq!(ds.value_at("en.wikipedia", &coords), Some(42));
        assert_eq!(ds.value_at("en.wikipedia", &coords[..2]), None);
    }

    #[test]
    fn apply_is_all_or_nothing() {
        let mut ds = Dataset::allocate(&template(TOP), "ja.wikipedia", week());
        let before = ds.clone();
        let writes = [
            CellWrite {
                variable: "ja.wikipedia".into(),
                offset: 0,
                value: 5,
            },
            CellWrite {
                variable: "ja.wikipedia".into(),
                offset: 1,
                value: i64::from(i32::MAX) + 1,
            },
        ];
        assert!(ds.apply(&writes).is_err());
        assert_eq!(ds, before);
    }

    #[test]
    fn conforms_to_detects_label_drift() {
        let ds = Dataset::allocate(&template(EDITS), "en.wikipedia", week());
        ds.conforms_to(&Dataset::layout(&template(EDITS), week()))
            .unwrap();

        let registry = AxisRegistry::wikimedia()
            .with_overrides(&BTreeMap::from([(
                "page-type".to_string(),
                vec!["content".to_string()],
            )]))
            .unwrap();
        let drifted = Dataset::layout(&Template::parse(EDITS, &registry).unwrap(), week());
        assert_eq!(
            ds.conforms_to(&drifted).unwrap_err().kind(),
            "configuration-mismatch"
        );
        let top = Dataset::layout(&template(TOP), week());
        assert!(ds.conforms_to(&top).is_err());
    }

    #[test]
    fn from_parts_rejects_wrong_length() {
        let ds = Dataset::allocate(&template(EDITS), "en.wikipedia", week());
        let vars = BTreeMap::from([("x".to_string(), Values::zeros(DType::Int64, 3))]);
        assert!(
            Dataset::from_parts(ds.axes().to_vec(), vars, BTreeMap::new(), ProcessedLedger::new())
                .is_err()
        );
    }
}
