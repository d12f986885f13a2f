//! Labeled axes and the daily time calendar

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use wikistat_core::MergeError;

pub const TIME_AXIS: &str = "time";
pub const RANK_AXIS: &str = "rank";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A named dimension with one label per position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub labels: Vec<String>,
}

impl Axis {
    pub fn new(name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }
}

/// Inclusive daily calendar `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, MergeError> {
        if end < start {
            return Err(MergeError::mismatch(format!(
                "time range ends ({end}) before it starts ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of days, both ends included.
    pub fn days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// Position of `date` on the axis, if inside the range.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        if date < self.start || date > self.end {
            return None;
        }
        Some((date - self.start).num_days() as usize)
    }

    pub fn axis(&self) -> Axis {
        let labels = self
            .start
            .iter_days()
            .take(self.days())
            .map(|d| d.format(DATE_FORMAT).to_string())
            .collect();
        Axis::new(TIME_AXIS, labels)
    }

    /// Recover the range from a stored time axis, checking the days are contiguous.
    pub fn from_axis(axis: &Axis) -> Result<Self, MergeError> {
        let parse = |label: &str| {
            NaiveDate::parse_from_str(label, DATE_FORMAT)
                .map_err(|e| MergeError::Store(format!("bad time label {label}: {e}")))
        };
        let (first, last) = match (axis.labels.first(), axis.labels.last()) {
            (Some(f), Some(l)) => (parse(f)?, parse(l)?),
            _ => return Err(MergeError::Store("empty time axis".into())),
        };
        let range = Self::new(first, last)?;
        if range.days() != axis.len() {
            return Err(MergeError::Store(format!(
                "time axis {first}..{last} is not a contiguous daily calendar"
            )));
        }
        Ok(range)
    }
}

impl Default for TimeRange {
    /// 2001-01-01 ..= 2018-01-01, the span the scraper covered.
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2001, 1, 1).expect("valid date"),
            end: NaiveDate::from_ymd_opt(2018, 1, 1).expect("valid date"),
        }
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}..={} ({} days, {} years)",
            self.start,
            self.end,
            self.days(),
            self.end.year() - self.start.year()
        )
    }
}
