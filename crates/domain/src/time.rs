//! Time and timestamp helpers.

use chrono::{DateTime, SecondsFormat, Utc};

/// UTC timestamp used for device snapshots and published envelopes.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Format a timestamp as ISO-8601 with millisecond precision and a `Z` suffix.
#[must_use]
pub fn to_iso8601(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp, normalising it to UTC.
///
/// # Errors
///
/// Returns [`chrono::ParseError`] when `value` is not RFC 3339.
pub fn parse_iso8601(value: &str) -> Result<Timestamp, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.to_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        let after = Utc::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_format_with_millis_and_zulu_suffix() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(to_iso8601(ts), "2024-05-01T12:30:00.000Z");
    }

    #[test]
    fn should_parse_offset_timestamps_into_utc() {
        let ts = parse_iso8601("2024-05-01T14:30:00+02:00").unwrap();
        assert_eq!(to_iso8601(ts), "2024-05-01T12:30:00.000Z");
    }
}
