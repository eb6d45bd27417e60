//! Timestamp helpers shared by notes and drive files.
//!
//! Notes carry ISO-8601 strings in the shape produced by JavaScript's
//! `Date.prototype.toISOString` (`2020-06-01T00:00:00.000Z`), while sync
//! decisions compare epoch milliseconds.

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Invalid timestamp: {0}")]
pub struct TimestampError(pub String);

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Current time as a UTC `DateTime`.
pub fn now_utc() -> DateTime<Utc> {
    millis_to_datetime(now_millis())
}

/// Current time as an ISO-8601 string.
pub fn now_iso() -> String {
    datetime_to_iso(&now_utc())
}

pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Format a timestamp with millisecond precision and a `Z` suffix.
pub fn datetime_to_iso(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn millis_to_iso(millis: i64) -> String {
    datetime_to_iso(&millis_to_datetime(millis))
}

/// Parse an RFC 3339 / ISO-8601 timestamp into epoch milliseconds.
pub fn iso_to_millis(value: &str) -> Result<i64, TimestampError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| TimestampError(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_matches_js_shape() {
        assert_eq!(millis_to_iso(1_590_969_600_000), "2020-06-01T00:00:00.000Z");
    }

    #[test]
    fn test_parse_accepts_offsets_and_plain_z() {
        assert_eq!(iso_to_millis("2020-01-01T00:00:00Z").unwrap(), 1_577_836_800_000);
        assert_eq!(
            iso_to_millis("2020-01-01T01:00:00.000+01:00").unwrap(),
            1_577_836_800_000
        );
        assert!(iso_to_millis("yesterday").is_err());
    }
}
