//! Helpers shared by the service record types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ScanError;

/// AWS resource tag (`{"Key": ..., "Value": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    #[serde(default)]
    pub value: String,
}

impl Tag {
    /// Convenience constructor.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Collapse a tag list into a sorted map.
#[must_use]
pub fn tag_map(tags: &[Tag]) -> BTreeMap<String, String> {
    tags.iter()
        .map(|t| (t.key.clone(), t.value.clone()))
        .collect()
}

/// Value of the `Name` tag, if any.
#[must_use]
pub fn name_tag(tags: &[Tag]) -> Option<String> {
    tags.iter()
        .find(|t| t.key == "Name")
        .map(|t| t.value.clone())
}

/// Required tag keys absent from `tags`. Empty values count as absent.
#[must_use]
pub fn missing_tags(tags: &[Tag], required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|key| !tags.iter().any(|t| &t.key == *key && !t.value.is_empty()))
        .cloned()
        .collect()
}

/// Parse an AWS timestamp.
///
/// Accepts RFC 3339 (`2024-01-15T10:20:30.000Z`) and the offset-without-colon
/// form Lambda uses (`2024-01-15T10:20:30.000+0000`).
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// A timestamp as the AWS CLI prints it.
///
/// The CLI renders timestamps as ISO 8601 strings by default, and as epoch
/// seconds (possibly fractional) when `cli_timestamp_format` is `none` or
/// `wire`, or on CLI v1.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// ISO 8601 text.
    Text(String),
    /// Seconds since the Unix epoch.
    Epoch(f64),
}

impl Timestamp {
    /// Convert to UTC; `None` when the value cannot be interpreted.
    #[must_use]
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Text(raw) => parse_timestamp(raw),
            Self::Epoch(secs) => from_epoch_secs(*secs),
        }
    }
}

/// Convert fractional epoch seconds to a timestamp.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

/// Convert epoch milliseconds (CloudWatch Logs) to a timestamp.
#[must_use]
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Whole days between `then` and `now`, never negative.
#[must_use]
pub fn age_days(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - then).num_days().max(0)
}

/// Ratio of `part` to `total`, 0.0 when `total` is zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Round a dollar amount to cents.
#[must_use]
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Map raw records to their typed form.
pub(crate) fn decode_all<T: DeserializeOwned>(
    what: &'static str,
    items: Vec<Value>,
) -> Result<Vec<T>, ScanError> {
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(|e| ScanError::decode(what, e)))
        .collect()
}

/// Map one raw record to its typed form.
pub(crate) fn decode_one<T: DeserializeOwned>(
    what: &'static str,
    item: Value,
) -> Result<T, ScanError> {
    serde_json::from_value(item).map_err(|e| ScanError::decode(what, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 20, 30).unwrap();
        assert_eq!(parse_timestamp("2024-01-15T10:20:30Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T10:20:30.000Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T10:20:30+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T10:20:30.000+0000"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_timestamp_text_or_epoch() {
        let text: Timestamp = serde_json::from_value(json!("2023-11-14T22:13:20Z")).unwrap();
        let whole: Timestamp = serde_json::from_value(json!(1_700_000_000)).unwrap();
        let fractional: Timestamp = serde_json::from_value(json!(1_700_000_000.5)).unwrap();

        let expected = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        assert_eq!(text.to_utc(), Some(expected));
        assert_eq!(whole.to_utc(), Some(expected));
        assert_eq!(
            fractional.to_utc(),
            Some(expected + chrono::Duration::milliseconds(500))
        );
        assert_eq!(Timestamp::Text("soon".to_string()).to_utc(), None);
        assert_eq!(Timestamp::Epoch(f64::NAN).to_utc(), None);
    }

    #[test]
    fn test_age_days_is_never_negative() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let then = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(age_days(then, now), 60);
        assert_eq!(age_days(now, then), 0);
    }

    #[test]
    fn test_missing_tags() {
        let tags = vec![Tag::new("team", "payments"), Tag::new("env", "")];
        let required = vec!["team".to_string(), "env".to_string(), "owner".to_string()];
        assert_eq!(missing_tags(&tags, &required), vec!["env", "owner"]);
        assert!(missing_tags(&tags, &[]).is_empty());
    }

    #[test]
    fn test_name_tag_and_map() {
        let tags = vec![Tag::new("Name", "web-1"), Tag::new("env", "prod")];
        assert_eq!(name_tag(&tags).as_deref(), Some("web-1"));
        assert_eq!(tag_map(&tags).get("env").map(String::as_str), Some("prod"));
        assert_eq!(name_tag(&[]), None);
    }

    #[test]
    fn test_ratio_and_rounding() {
        assert!((ratio(1, 4) - 0.25).abs() < f64::EPSILON);
        assert!(ratio(3, 0).abs() < f64::EPSILON);
        assert!((round_cents(12.345_6) - 12.35).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decode_all_reports_record_kind() {
        let err = decode_all::<Tag>("tag", vec![json!({"Value": "x"})]).unwrap_err();
        assert!(err.to_string().contains("tag"));
    }
}
