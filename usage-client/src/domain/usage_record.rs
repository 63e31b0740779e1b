use time::{
    format_description::FormatItem, macros::format_description, OffsetDateTime, PrimitiveDateTime,
};

/// Canonical text form of an interval start, always UTC.
const START_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// One normalized interval read.
///
/// `ts` has second precision and is the natural key when records are merged.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub ts: OffsetDateTime,
    pub location: String,
    pub meter_id: Option<String>,
    pub channel: Option<String>,
    pub total: f64,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub price: Option<f64>,
}

impl UsageRecord {
    /// Record carrying only a timestamp and a total, as the priced variant
    /// stores them.
    pub fn new(ts: OffsetDateTime, location: impl Into<String>, total: f64) -> Self {
        Self {
            ts,
            location: location.into(),
            meter_id: None,
            channel: None,
            total,
            minimum: None,
            maximum: None,
            price: None,
        }
    }
}

pub fn format_start_time(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(time::UtcOffset::UTC);
    utc.format(START_TIME_FORMAT)
        .unwrap_or_else(|_| utc.unix_timestamp().to_string())
}

pub fn parse_start_time(s: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(s.trim(), START_TIME_FORMAT)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn start_time_formats_in_utc() {
        let ts = datetime!(2024-03-10 01:30:00 -05:00);
        assert_eq!(format_start_time(ts), "2024-03-10 06:30:00");
    }

    #[test]
    fn start_time_parse_inverts_format() {
        let ts = datetime!(2024-01-02 03:04:05 UTC);
        assert_eq!(parse_start_time(&format_start_time(ts)), Some(ts));
    }

    #[test]
    fn start_time_parse_rejects_garbage() {
        assert!(parse_start_time("yesterday").is_none());
        assert!(parse_start_time("2024-13-01 00:00:00").is_none());
        assert!(parse_start_time("").is_none());
    }
}
