//! InfluxDB line-protocol backend.
//!
//! Append-only: nothing is read back. Each record is checked against the
//! retention cutoff while it is encoded, and the surviving points go out as a
//! single write request. The database deduplicates on tag set + timestamp.

use std::time::{Duration, SystemTime};

use time::OffsetDateTime;
use usage_client::domain::UsageRecord;

use crate::{
    pipeline::{drain, Envelope, PipelineError, Sink},
    store::{is_retained, retention_cutoff},
};

/// Escape tag keys, tag values and field keys for line protocol.
///
/// Commas, spaces, equals and backslashes get a backslash. Line breaks cannot
/// be escaped, so they are written as an escaped space.
fn escape_ident(s: &str, out: &mut String) {
    escape_with(s, &[',', ' ', '=', '\\'], out);
}

/// Measurement names escape commas and spaces but not equals.
fn escape_measurement(s: &str, out: &mut String) {
    escape_with(s, &[',', ' ', '\\'], out);
}

fn escape_with(s: &str, special: &[char], out: &mut String) {
    for ch in s.chars() {
        if ch == '\n' || ch == '\r' {
            out.push_str("\\ ");
        } else if special.contains(&ch) {
            out.push('\\');
            out.push(ch);
        } else {
            out.push(ch);
        }
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    // Empty tag values are invalid line protocol.
    if value.is_empty() {
        return;
    }
    out.push(',');
    escape_ident(key, out);
    out.push('=');
    escape_ident(value, out);
}

fn push_field_f64(out: &mut String, first: &mut bool, key: &str, value: f64) {
    if !value.is_finite() {
        return;
    }
    if *first {
        *first = false;
    } else {
        out.push(',');
    }

    escape_ident(key, out);
    out.push('=');
    out.push_str(&value.to_string());
}

fn ts_to_unix_nanos(ts: OffsetDateTime) -> i128 {
    ts.unix_timestamp_nanos()
}

/// Append one line for `record` to `out`. Returns false (and leaves `out`
/// unchanged) when the record has no finite field to write.
pub fn write_line(record: &UsageRecord, measurement: &str, out: &mut String) -> bool {
    let mark = out.len();

    escape_measurement(measurement, out);
    push_tag(out, "location", &record.location);
    if let Some(meter_id) = &record.meter_id {
        push_tag(out, "meter_id", meter_id);
    }
    if let Some(channel) = &record.channel {
        push_tag(out, "channel", channel);
    }

    out.push(' ');
    let mut first = true;
    push_field_f64(out, &mut first, "total_kwh", record.total);
    if let Some(v) = record.minimum {
        push_field_f64(out, &mut first, "min_kwh", v);
    }
    if let Some(v) = record.maximum {
        push_field_f64(out, &mut first, "max_kwh", v);
    }
    if let Some(v) = record.price {
        push_field_f64(out, &mut first, "price", v);
    }
    if first {
        out.truncate(mark);
        return false;
    }

    out.push(' ');
    out.push_str(&ts_to_unix_nanos(record.ts).to_string());
    true
}

/// Connection settings for the InfluxDB v2 write API.
#[derive(Debug, Clone)]
pub struct InfluxTarget {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub measurement: String,
}

pub struct TimeSeriesSink {
    http: reqwest::Client,
    target: InfluxTarget,
    retention_days: u32,
    now: OffsetDateTime,
    max_retries: u32,
    retry_backoff: Duration,
}

impl TimeSeriesSink {
    pub fn new(
        target: InfluxTarget,
        retention_days: u32,
        now: OffsetDateTime,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            target,
            retention_days,
            now,
            max_retries,
            retry_backoff,
        }
    }

    /// Encode the records still inside the retention window. Older records
    /// are dropped here and never queued.
    pub fn encode_batch(&self, batch: &[Envelope<UsageRecord>]) -> (String, usize) {
        let cutoff = retention_cutoff(self.now, self.retention_days);
        // Heuristic capacity: ~120 bytes per line.
        let mut s = String::with_capacity(batch.len().saturating_mul(120));
        let mut points = 0usize;

        for env in batch {
            let record = &env.payload;
            if !is_retained(record.ts, cutoff) {
                tracing::debug!(ts = %record.ts, %cutoff, "skipping point beyond the retention period");
                metrics::counter!("usage_records_skipped_total", "reason" => "beyond_retention").increment(1);
                continue;
            }
            if write_line(record, &self.target.measurement, &mut s) {
                s.push('\n');
                points += 1;
            }
        }

        (s, points)
    }

    fn write_url(&self) -> String {
        format!("{}/api/v2/write", self.target.url.trim_end_matches('/'))
    }

    async fn post(&self, body: &str) -> Result<(), String> {
        let resp = self
            .http
            .post(self.write_url())
            .query(&[
                ("org", self.target.org.as_str()),
                ("bucket", self.target.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.target.token))
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body.to_owned())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = resp.text().await.unwrap_or_default();
        Err(format!("influx responded {status}: {detail}"))
    }

    async fn flush_batch(&self, batch: &[Envelope<UsageRecord>]) -> Result<(), PipelineError> {
        let (payload, points) = self.encode_batch(batch);
        if points == 0 {
            tracing::info!("no valid points to write");
            return Ok(());
        }

        let mut attempt: u32 = 0;
        loop {
            match self.post(&payload).await {
                Ok(()) => {
                    metrics::counter!("timeseries_points_written_total").increment(points as u64);
                    metrics::counter!("timeseries_bytes_total").increment(payload.len() as u64);

                    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
                        if let Ok(dur) = SystemTime::now().duration_since(min_received) {
                            metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
                        }
                    }

                    tracing::info!(points, bucket = %self.target.bucket, "points written");
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(error = %e, attempt, "time-series write failed, retrying with backoff");
                    metrics::counter!("timeseries_retry_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "time-series write failed, giving up");
                    metrics::counter!("timeseries_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(format!("time-series write failed: {e}")));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<UsageRecord> for TimeSeriesSink {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<UsageRecord>, PipelineError>> + Send + Unpin + 'static,
    {
        let batch = drain(input, "time_series").await?;
        self.flush_batch(&batch).await
    }
}
