//! Decoding of scraped Wikimedia REST response bodies

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};

use wikistat_core::MergeError;

/// Fields that hold the value of a per-item (flat) series.
pub const FLAT_VALUE_FIELDS: &[&str] = &["views", "devices"];

const NOT_FOUND_SUFFIX: &str = "not_found";

/// 2^63: floats at or beyond it do not fit an i64.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Raw shape shared by data and error payloads.
#[derive(Debug, Deserialize)]
struct RawBody {
    items: Option<Vec<Map<String, Value>>>,
    #[serde(rename = "type")]
    error_type: Option<String>,
    title: Option<String>,
    detail: Option<Value>,
}

/// Classified response body.
#[derive(Debug)]
pub enum Body {
    Items(Vec<Item>),
    /// Upstream has no data for this slice.
    NotFound { detail: String },
    /// Any other upstream error payload.
    UpstreamError { kind: String, detail: String },
}

/// Decode a raw body. Invalid JSON and payloads that are neither data nor an
/// error are fatal.
pub fn decode(key: &str, raw: &[u8]) -> Result<Body, MergeError> {
    let body: RawBody = sonic_rs::from_slice(raw).map_err(|e| MergeError::MalformedJson {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    if let Some(items) = body.items {
        return Ok(Body::Items(items.into_iter().map(Item).collect()));
    }

    let detail = match (&body.detail, &body.title) {
        (Some(Value::String(s)), _) => s.clone(),
        (Some(other), _) => other.to_string(),
        (None, Some(title)) => title.clone(),
        (None, None) => String::new(),
    };
    match body.error_type {
        Some(kind) if kind.ends_with(NOT_FOUND_SUFFIX) => Ok(Body::NotFound { detail }),
        Some(kind) => Ok(Body::UpstreamError { kind, detail }),
        None => Err(MergeError::schema(key, "body has neither items nor an error type")),
    }
}

/// How an item carries its values.
#[derive(Debug)]
pub enum ItemShape<'a> {
    /// One value per item: `{"timestamp": .., "views": ..}`.
    Flat { timestamp: &'a str, value: &'a Value },
    /// Ranked lists: `results[].top[]`.
    TopK(&'a [Value]),
    /// `results[]` objects with a timestamp and one value field.
    Results(&'a [Value]),
}

/// One element of a response's `items` array.
#[derive(Debug, Clone)]
pub struct Item(Map<String, Value>);

impl Item {
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// String-valued field, if present.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn project(&self) -> Result<&str, String> {
        self.str_field("project")
            .ok_or_else(|| "item has no project".to_string())
    }

    pub fn granularity(&self) -> Option<&str> {
        self.str_field("granularity")
    }

    /// Value layout of the item. `ranked` endpoints carry `results[].top[]`,
    /// so an empty `results` list is still a (vacuous) ranked item.
    pub fn shape(&self, ranked: bool) -> Result<ItemShape<'_>, String> {
        if let Some(ts) = self.0.get("timestamp") {
            let timestamp = ts
                .as_str()
                .ok_or_else(|| format!("timestamp {ts} is not a string"))?;
            let value = FLAT_VALUE_FIELDS
                .iter()
                .find_map(|f| self.0.get(*f))
                .ok_or_else(|| {
                    format!("flat item has none of the value fields {FLAT_VALUE_FIELDS:?}")
                })?;
            return Ok(ItemShape::Flat { timestamp, value });
        }
        let results = self
            .0
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| "item has neither timestamp nor results".to_string())?;
        if ranked {
            Ok(ItemShape::TopK(results))
        } else {
            Ok(ItemShape::Results(results))
        }
    }
}

/// Integer cell value. `null` is stored as 0; numeric strings are accepted
/// (page ids sometimes arrive quoted).
pub fn int_value(value: &Value) -> Result<i64, String> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < I64_BOUND)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| format!("{n} is not an integer in i64 range")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("{s:?} is not an integer")),
        other => Err(format!("{other} is not an integer")),
    }
}

/// Parse a response timestamp into a calendar day.
///
/// Accepts compact `YYYYMMDD[HH[MM]]` stamps of at most `width` digits,
/// right-padded with `0` up to `width`, and ISO-8601
/// `YYYY-MM-DDTHH:MM:SS[.fff]Z`. Anything past the day must be midnight: only
/// daily data is stored.
pub fn parse_timestamp(ts: &str, width: usize) -> Result<NaiveDate, String> {
    let (day, rest) = if ts.len() >= 10 && ts.is_char_boundary(10) && ts.as_bytes()[4] == b'-' {
        let day = NaiveDate::parse_from_str(&ts[..10], "%Y-%m-%d")
            .map_err(|e| format!("timestamp {ts:?}: {e}"))?;
        let time = ts[10..].trim_start_matches('T').trim_end_matches('Z');
        (day, time.replace([':', '.'], ""))
    } else {
        if ts.len() < 8 || !ts.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("timestamp {ts:?} is not YYYYMMDD[HH]"));
        }
        if ts.len() > width {
            return Err(format!("timestamp {ts:?} is wider than {width} digits"));
        }
        let padded = format!("{ts:0<width$}");
        let day = NaiveDate::parse_from_str(&padded[..8], "%Y%m%d")
            .map_err(|e| format!("timestamp {ts:?}: {e}"))?;
        (day, padded[8..].to_string())
    };
    if rest.bytes().any(|b| b != b'0') {
        return Err(format!("timestamp {ts:?} is not at midnight"));
    }
    Ok(day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn decode_items() {
        let raw = br#"{"items":[{"project":"en.wikipedia","granularity":"daily","results":[]}]}"#;
        match decode("k", raw).unwrap() {
            Body::Items(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].project().unwrap(), "en.wikipedia");
                assert_eq!(items[0].granularity(), Some("daily"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decode_not_found() {
        let raw = br#"{"type":"https://mediawiki.org/wiki/HyperSwitch/errors/not_found","title":"Not found.","method":"get","detail":"The date(s) you used are valid, but we either do not have data for those date(s), or the project you asked for is not loaded yet.","uri":"/x"}"#;
        match decode("k", raw).unwrap() {
            Body::NotFound { detail } => assert!(detail.contains("do not have data")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decode_unknown_error() {
        let raw = br#"{"type":"https://mediawiki.org/wiki/HyperSwitch/errors/unknown_error","title":"Internal error","detail":{"reason":"timeout"}}"#;
        match decode("k", raw).unwrap() {
            Body::UpstreamError { kind, detail } => {
                assert!(kind.ends_with("unknown_error"));
                assert!(detail.contains("timeout"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decode_garbage_is_malformed() {
        let err = decode("k", b"<html>502</html>").unwrap_err();
        assert_eq!(err.kind(), "malformed-json");
        assert_eq!(err.key(), Some("k"));
    }

    #[test]
    fn decode_shapeless_object() {
        let err = decode("k", br#"{"hello":"world"}"#).unwrap_err();
        assert_eq!(err.kind(), "schema-violation");
    }

    #[test]
    fn item_shapes() {
        let flat: Map<String, Value> = serde_json::from_str(
            r#"{"project":"en.wikipedia","access":"desktop","timestamp":"2017010100","views":12}"#,
        )
        .unwrap();
        assert!(matches!(Item(flat).shape(false).unwrap(), ItemShape::Flat { .. }));

        let top: Map<String, Value> = serde_json::from_str(
            r#"{"project":"en.wikipedia","results":[{"timestamp":"2017-01-01T00:00:00.000Z","top":[]}]}"#,
        )
        .unwrap();
        assert!(matches!(Item(top).shape(true).unwrap(), ItemShape::TopK(_)));

        let empty: Map<String, Value> =
            serde_json::from_str(r#"{"project":"en.wikipedia","results":[]}"#).unwrap();
        assert!(matches!(Item(empty.clone()).shape(true).unwrap(), ItemShape::TopK(_)));
        assert!(matches!(Item(empty).shape(false).unwrap(), ItemShape::Results(_)));

        let results: Map<String, Value> = serde_json::from_str(
            r#"{"project":"en.wikipedia","results":[{"timestamp":"2017010100","edits":1}]}"#,
        )
        .unwrap();
        assert!(matches!(Item(results).shape(false).unwrap(), ItemShape::Results(_)));

        let bare: Map<String, Value> = serde_json::from_str(r#"{"project":"x"}"#).unwrap();
        assert!(Item(bare).shape(true).is_err());
    }

    #[test]
    fn flat_item_without_value_field() {
        let flat: Map<String, Value> =
            serde_json::from_str(r#"{"project":"x","timestamp":"2017010100","hits":3}"#).unwrap();
        assert!(Item(flat).shape(false).is_err());
    }

    #[test]
    fn int_values() {
        assert_eq!(int_value(&Value::Null), Ok(0));
        assert_eq!(int_value(&serde_json::json!(42)), Ok(42));
        assert_eq!(int_value(&serde_json::json!(-7)), Ok(-7));
        assert_eq!(int_value(&serde_json::json!(3.0)), Ok(3));
        assert_eq!(int_value(&serde_json::json!("534366")), Ok(534_366));
        assert!(int_value(&serde_json::json!(1.5)).is_err());
        assert!(int_value(&serde_json::json!(1e30)).is_err());
        assert!(int_value(&serde_json::json!(-1e19)).is_err());
        assert!(int_value(&serde_json::json!("abc")).is_err());
        assert!(int_value(&serde_json::json!([1])).is_err());
    }

    #[test]
    fn compact_timestamps() {
        assert_eq!(parse_timestamp("2018010100", 10), Ok(date(2018, 1, 1)));
        assert_eq!(parse_timestamp("20180101", 10), Ok(date(2018, 1, 1)));
        assert_eq!(parse_timestamp("2018010100", 12), Ok(date(2018, 1, 1)));
        assert_eq!(parse_timestamp("201801010000", 12), Ok(date(2018, 1, 1)));
        assert!(parse_timestamp("201801010000", 10).is_err());
        assert!(parse_timestamp("2018010100", 8).is_err());
        assert!(parse_timestamp("2018010113", 10).is_err());
        assert!(parse_timestamp("2018013200", 10).is_err());
        assert!(parse_timestamp("201801", 10).is_err());
    }

    #[test]
    fn iso_timestamps() {
        assert_eq!(
            parse_timestamp("2017-01-01T00:00:00.000Z", 10),
            Ok(date(2017, 1, 1))
        );
        assert_eq!(parse_timestamp("2017-01-01", 10), Ok(date(2017, 1, 1)));
        assert!(parse_timestamp("2017-01-01T05:00:00.000Z", 10).is_err());
    }
}
