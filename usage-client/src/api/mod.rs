//! Client for the utility's authenticated readings API.

pub mod client;

pub use client::{ApiSettings, SmartHubClient};

use time::{Duration, OffsetDateTime, Time};

use crate::domain::RawReading;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("invalid api settings: {0}")]
    Config(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("fetching readings failed: {0}")]
    Fetch(String),
    #[error("readings payload is not valid JSON: {0}")]
    PayloadDecode(#[from] serde_json::Error),
}

/// Inclusive query window sent to the readings endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl TimeRange {
    /// Window covering the last `days` calendar days (UTC), ending at
    /// 23:59:59 on the day of `now`. A zero-day lookback still covers today.
    pub fn lookback(days: u32, now: OffsetDateTime) -> Self {
        let now = now.to_offset(time::UtcOffset::UTC);
        let end = now.replace_time(Time::from_hms(23, 59, 59).unwrap_or(Time::MIDNIGHT));
        let start = end
            .checked_sub(Duration::days(i64::from(days.max(1) - 1)))
            .unwrap_or_else(|| time::PrimitiveDateTime::MIN.assume_utc());
        Self { start, end }
    }

    pub fn start_millis(&self) -> i64 {
        (self.start.unix_timestamp_nanos() / 1_000_000) as i64
    }

    pub fn end_millis(&self) -> i64 {
        (self.end.unix_timestamp_nanos() / 1_000_000) as i64
    }
}

/// Decode a raw readings body. An empty array is valid; anything that is not
/// a JSON array of meter locations is rejected.
pub fn decode_payload(body: &[u8]) -> Result<Vec<RawReading>, ApiError> {
    let entries: Vec<serde_json::Value> = serde_json::from_slice(body)?;
    Ok(entries.into_iter().map(RawReading::from_value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn lookback_spans_whole_days() {
        let range = TimeRange::lookback(3, datetime!(2024-05-10 08:15:00 UTC));
        assert_eq!(range.end, datetime!(2024-05-10 23:59:59 UTC));
        assert_eq!(range.start, datetime!(2024-05-08 23:59:59 UTC));
    }

    #[test]
    fn lookback_of_zero_days_covers_today() {
        let now = datetime!(2024-05-10 08:15:00 UTC);
        assert_eq!(TimeRange::lookback(0, now), TimeRange::lookback(1, now));
    }

    #[test]
    fn lookback_normalizes_offset_to_utc() {
        let range = TimeRange::lookback(1, datetime!(2024-05-10 22:00:00 -04:00));
        assert_eq!(range.end, datetime!(2024-05-11 23:59:59 UTC));
    }

    #[test]
    fn range_exposes_epoch_millis() {
        let range = TimeRange {
            start: datetime!(2024-01-01 00:00:00 UTC),
            end: datetime!(2024-01-01 00:00:01 UTC),
        };
        assert_eq!(range.start_millis(), 1_704_067_200_000);
        assert_eq!(range.end_millis(), 1_704_067_201_000);
    }

    #[test]
    fn decode_payload_rejects_non_json() {
        let err = decode_payload(b"<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, ApiError::PayloadDecode(_)));
    }

    #[test]
    fn decode_payload_keeps_siblings_of_malformed_reads() {
        let body = br#"[
            { "meterLocation": "A", "readings": [{ "reads": [
                { "interval": { "start": 1704067200000 }, "metrics": { "total": 1.0 } },
                { "interval": { "start": 1704070800000 }, "metrics": "unavailable" }
            ]}]},
            "offline"
        ]"#;

        let raw = decode_payload(body).unwrap();
        assert_eq!(raw.len(), 2);
        let reads = &raw[0].readings[0].reads;
        assert_eq!(reads.len(), 2);
        assert!(reads[0].metrics.is_some());
        assert!(reads[1].metrics.is_none());
        assert!(raw[1].readings.is_empty());
    }

    #[test]
    fn decode_payload_rejects_non_array_body() {
        let err = decode_payload(br#"{ "error": "maintenance" }"#).unwrap_err();
        assert!(matches!(err, ApiError::PayloadDecode(_)));
    }

    #[test]
    fn lookback_past_earliest_date_clamps() {
        let range = TimeRange::lookback(u32::MAX, datetime!(2024-05-10 08:15:00 UTC));
        assert_eq!(range.start, time::PrimitiveDateTime::MIN.assume_utc());
        assert_eq!(range.end, datetime!(2024-05-10 23:59:59 UTC));
    }

    #[test]
    fn decode_payload_accepts_empty_array() {
        assert!(decode_payload(b"[]").unwrap().is_empty());
    }
}
