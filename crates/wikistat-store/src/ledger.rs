//! Ledger of source keys already folded into a dataset

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Idempotence marker → RFC 3339 time it was merged.
///
/// Persisted next to the array payload and consulted before every merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessedLedger(BTreeMap<String, String>);

impl ProcessedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, marker: &str) -> bool {
        self.0.contains_key(marker)
    }

    /// Record `marker`; returns false if it was already present (first stamp wins).
    pub fn mark(&mut self, marker: &str, at: DateTime<Utc>) -> bool {
        if self.0.contains_key(marker) {
            return false;
        }
        self.0.insert(
            marker.to_string(),
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        true
    }

    pub fn merged_at(&self, marker: &str) -> Option<&str> {
        self.0.get(marker).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Most recent merge time, for status listings.
    pub fn last_merged_at(&self) -> Option<&str> {
        self.0.values().map(String::as_str).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn mark_is_first_wins() {
        let mut ledger = ProcessedLedger::new();
        let t1 = Utc.with_ymd_and_hms(2018, 3, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2018, 3, 2, 12, 0, 0).unwrap();
        assert!(ledger.mark("abc", t1));
        assert!(!ledger.mark("abc", t2));
        assert_eq!(ledger.merged_at("abc"), Some("2018-03-01T12:00:00Z"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn json_is_a_plain_map() {
        let mut ledger = ProcessedLedger::new();
        ledger.mark("m1", Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap());
        let json = serde_json::to_string(&ledger).unwrap();
        assert_eq!(json, r#"{"m1":"2018-01-01T00:00:00Z"}"#);
        let back: ProcessedLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ledger);
    }

    #[test]
    fn last_merged_at_picks_latest() {
        let mut ledger = ProcessedLedger::new();
        assert!(ledger.last_merged_at().is_none());
        ledger.mark("a", Utc.with_ymd_and_hms(2018, 1, 2, 0, 0, 0).unwrap());
        ledger.mark("b", Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(ledger.last_merged_at(), Some("2018-01-02T00:00:00Z"));
    }
}
