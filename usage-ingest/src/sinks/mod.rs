pub mod snapshot;
pub mod timeseries;

pub use snapshot::{read_snapshot, write_snapshot, SnapshotLock, SnapshotSink};
pub use timeseries::{InfluxTarget, TimeSeriesSink};

use std::time::Duration;

use time::OffsetDateTime;
use usage_client::domain::UsageRecord;

use crate::{
    config::{SinkConfig, SinkKind},
    pipeline::{Envelope, PipelineError, Sink},
};

/// Sink backend picked by configuration.
///
/// The two variants keep separate policies: the snapshot is read, merged and
/// rewritten, while the time-series store only ever receives appends.
pub enum UsageSink {
    Snapshot(SnapshotSink),
    TimeSeries(TimeSeriesSink),
}

impl UsageSink {
    /// Build the configured backend. `now` anchors the retention window for
    /// the whole run.
    pub fn from_config(cfg: &SinkConfig, now: OffsetDateTime) -> Result<Self, PipelineError> {
        match cfg.kind {
            SinkKind::Snapshot => {
                let snap = cfg
                    .snapshot
                    .as_ref()
                    .ok_or_else(|| PipelineError::Sink("missing [sink.snapshot] section".to_string()))?;
                Ok(Self::Snapshot(SnapshotSink::new(&snap.path, cfg.retention_days, now)))
            }
            SinkKind::TimeSeries => {
                let ts = cfg
                    .time_series
                    .as_ref()
                    .ok_or_else(|| PipelineError::Sink("missing [sink.time_series] section".to_string()))?;
                Ok(Self::TimeSeries(TimeSeriesSink::new(
                    InfluxTarget {
                        url: ts.url.clone(),
                        token: ts.token.clone(),
                        org: ts.org.clone(),
                        bucket: ts.bucket.clone(),
                        measurement: ts.measurement.clone(),
                    },
                    cfg.retention_days,
                    now,
                    ts.max_retries,
                    Duration::from_millis(ts.retry_backoff_ms),
                )))
            }
        }
    }

    pub fn kind(&self) -> SinkKind {
        match self {
            Self::Snapshot(_) => SinkKind::Snapshot,
            Self::TimeSeries(_) => SinkKind::TimeSeries,
        }
    }
}

#[async_trait::async_trait]
impl Sink<UsageRecord> for UsageSink {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<UsageRecord>, PipelineError>> + Send + Unpin + 'static,
    {
        match self {
            Self::Snapshot(s) => s.run(input).await,
            Self::TimeSeries(s) => s.run(input).await,
        }
    }
}
