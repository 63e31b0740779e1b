use std::{path::PathBuf, sync::Arc};

use async_stream::try_stream;
use usage_client::{
    api::{SmartHubClient, TimeRange},
    domain::UsageRecord,
};

use super::{raw_file::write_raw_dump, records_from_body};
use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Live source: authenticate, fetch one lookback window, normalize.
///
/// Auth, fetch and decode failures end the stream with a fatal error before
/// any record is yielded.
pub struct SmartHubSource {
    client: Arc<SmartHubClient>,
    range: TimeRange,
    raw_dump: Option<PathBuf>,
    echo_raw: bool,
}

impl SmartHubSource {
    pub fn new(client: SmartHubClient, range: TimeRange) -> Self {
        Self {
            client: Arc::new(client),
            range,
            raw_dump: None,
            echo_raw: false,
        }
    }

    /// Also save the decoded payload, pretty-printed, to `path`.
    pub fn with_raw_dump(mut self, path: Option<PathBuf>) -> Self {
        self.raw_dump = path;
        self
    }

    /// Print the raw payload to stdout.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo_raw = echo;
        self
    }
}

#[async_trait::async_trait]
impl Source<UsageRecord> for SmartHubSource {
    async fn stream(&self) -> EnvelopeStream<UsageRecord> {
        let client = self.client.clone();
        let range = self.range;
        let raw_dump = self.raw_dump.clone();
        let echo_raw = self.echo_raw;

        let s = try_stream! {
            let token = client.authenticate().await.map_err(|e| {
                metrics::counter!("upstream_auth_failures_total").increment(1);
                PipelineError::from(e)
            })?;
            tracing::info!(start = %range.start, end = %range.end, "authenticated, fetching readings");

            let body = client.fetch_readings(&range, &token).await.map_err(|e| {
                metrics::counter!("upstream_fetch_failures_total").increment(1);
                PipelineError::from(e)
            })?;
            metrics::counter!("upstream_payload_bytes_total").increment(body.len() as u64);

            if echo_raw {
                println!("{}", String::from_utf8_lossy(&body));
            }
            if let Some(path) = &raw_dump {
                write_raw_dump(path, &body)?;
            }

            let records = records_from_body(&body, &client.settings().service_location)?;
            for record in records {
                yield Envelope::now(record);
            }
        };

        Box::pin(s)
    }
}
