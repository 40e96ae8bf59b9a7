//! Helpers for decoding the loosely-typed payloads the backend produces.
//!
//! Timestamps arrive either as RFC 3339 strings or as naive ISO-8601 strings
//! written with `datetime.utcnow().isoformat()`, and numeric fields typed in a
//! form (quote prices, ETAs) sometimes arrive as strings.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Parse a backend timestamp. Naive timestamps are taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Interpret a numeric epoch as seconds, or milliseconds when it is too large
/// to be a plausible second count.
fn epoch_to_timestamp(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

pub fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => parse_timestamp(&s),
        Some(Value::Number(n)) => n.as_i64().and_then(epoch_to_timestamp),
        _ => None,
    })
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_f64))
}

pub fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(value_as_f64)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round().min(u32::MAX as f64) as u32))
}

/// Read a string field that may be absent, null or a number.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Truncate a string for table output, keeping char boundaries intact.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "lenient_timestamp")]
        at: Option<DateTime<Utc>>,
        #[serde(default, deserialize_with = "lenient_f64")]
        price: Option<f64>,
        #[serde(default, deserialize_with = "lenient_u32")]
        eta: Option<u32>,
    }

    #[test]
    fn test_parse_naive_isoformat() {
        let dt = parse_timestamp("2025-03-01T10:15:30.123456").unwrap();
        assert_eq!(dt.year(), 2025);
        assert_eq!(dt.hour(), 10);
        assert_eq!(dt.second(), 30);
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let dt = parse_timestamp("2025-03-01T15:45:00+05:30").unwrap();
        assert_eq!(dt.hour(), 10);
        assert_eq!(dt.minute(), 15);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_lenient_fields() {
        let s: Sample =
            serde_json::from_str(r#"{"at": "2025-01-01T00:00:00", "price": "250", "eta": 7.4}"#)
                .unwrap();
        assert!(s.at.is_some());
        assert_eq!(s.price, Some(250.0));
        assert_eq!(s.eta, Some(7));

        let s: Sample = serde_json::from_str(r#"{"at": null, "price": null, "eta": -3}"#).unwrap();
        assert!(s.at.is_none());
        assert!(s.price.is_none());
        assert!(s.eta.is_none());

        let s: Sample = serde_json::from_str(r#"{}"#).unwrap();
        assert!(s.at.is_none());
    }

    #[test]
    fn test_epoch_millis() {
        let s: Sample = serde_json::from_str(r#"{"at": 1735689600000}"#).unwrap();
        assert_eq!(s.at.unwrap().year(), 2025);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long address line", 10), "a very ...");
    }
}
