//! Flattening of the nested meter → channel → interval payload.

use time::OffsetDateTime;
use usage_client::domain::{IntervalRead, RawReading, UsageRecord};

/// Output of [`normalize_readings`].
#[derive(Debug, Default)]
pub struct Normalized {
    /// Records in payload order. Duplicate timestamps are kept; the merge
    /// step resolves them last-write-wins.
    pub records: Vec<UsageRecord>,
    pub skipped: usize,
}

enum SkipReason {
    MissingStart,
    InvalidStart,
    MissingMetrics,
}

impl SkipReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::MissingStart => "missing_start",
            Self::InvalidStart => "invalid_start",
            Self::MissingMetrics => "missing_metrics",
        }
    }
}

/// Convert raw readings into one record per (meter, channel, read).
///
/// `default_location` tags reads whose meter entry carries no location.
pub fn normalize_readings(raw: &[RawReading], default_location: &str) -> Normalized {
    let mut out = Normalized::default();

    for meter in raw {
        let location = meter.meter_location.as_deref().unwrap_or(default_location);
        for channel in &meter.readings {
            for read in &channel.reads {
                match normalize_read(read) {
                    Ok((ts, total, minimum, maximum)) => out.records.push(UsageRecord {
                        ts,
                        location: location.to_string(),
                        meter_id: channel.meter_id.clone(),
                        channel: channel.channel.clone(),
                        total,
                        minimum,
                        maximum,
                        price: None,
                    }),
                    Err(reason) => {
                        tracing::debug!(
                            reason = reason.as_str(),
                            location,
                            meter_id = channel.meter_id.as_deref().unwrap_or(""),
                            "skipping interval read"
                        );
                        metrics::counter!("usage_records_skipped_total", "reason" => reason.as_str())
                            .increment(1);
                        out.skipped += 1;
                    }
                }
            }
        }
    }

    metrics::counter!("usage_records_normalized_total").increment(out.records.len() as u64);
    out
}

fn normalize_read(
    read: &IntervalRead,
) -> Result<(OffsetDateTime, f64, Option<f64>, Option<f64>), SkipReason> {
    let start_ms = read.start_millis().ok_or(SkipReason::MissingStart)?;
    let ts = OffsetDateTime::from_unix_timestamp(start_ms.div_euclid(1000))
        .map_err(|_| SkipReason::InvalidStart)?;
    let metrics = read.metrics.as_ref().ok_or(SkipReason::MissingMetrics)?;

    Ok((ts, metrics.total.unwrap_or(0.0), metrics.minimum, metrics.maximum))
}
