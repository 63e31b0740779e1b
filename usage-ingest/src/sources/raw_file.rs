use std::path::{Path, PathBuf};

use async_stream::try_stream;
use usage_client::domain::UsageRecord;

use super::records_from_body;
use crate::{
    pipeline::{Envelope, EnvelopeStream, PipelineError, Source},
    sinks::snapshot::write_atomic,
};

/// Replays a readings payload saved earlier with [`write_raw_dump`] (or any
/// file holding a response body from the readings endpoint).
pub struct RawFileSource {
    path: PathBuf,
    default_location: String,
}

impl RawFileSource {
    pub fn new<P: Into<PathBuf>>(path: P, default_location: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            default_location: default_location.into(),
        }
    }
}

/// Pretty-print a raw readings body to `path`, atomically. A body that is
/// not JSON is a decode error.
pub fn write_raw_dump(path: &Path, body: &[u8]) -> Result<(), PipelineError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| PipelineError::PayloadDecode(e.to_string()))?;
    let pretty = serde_json::to_vec_pretty(&value)
        .map_err(|e| PipelineError::Sink(format!("failed to encode raw dump: {e}")))?;
    write_atomic(path, &pretty)?;
    tracing::info!(path = %path.display(), bytes = pretty.len(), "raw payload saved");
    Ok(())
}

#[async_trait::async_trait]
impl Source<UsageRecord> for RawFileSource {
    async fn stream(&self) -> EnvelopeStream<UsageRecord> {
        let path = self.path.clone();
        let default_location = self.default_location.clone();

        let s = try_stream! {
            let body = tokio::fs::read(&path).await.map_err(|e| {
                PipelineError::Source(format!("failed to read raw dump {}: {e}", path.display()))
            })?;

            let records = records_from_body(&body, &default_location)?;
            for record in records {
                yield Envelope::now(record);
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const BODY: &str = r#"[{"meterLocation":"L1","readings":[{"meterId":"m","channel":"1","reads":[
        {"interval":{"start":1704067200000},"metrics":{"total":1.0}},
        {"interval":{"start":1704070800000},"metrics":null}
    ]}]}]"#;

    #[test]
    fn raw_dump_is_pretty_printed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.json");
        write_raw_dump(&path, BODY.as_bytes()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  {"));
        let back: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, serde_json::from_str::<serde_json::Value>(BODY).unwrap());
    }

    #[test]
    fn raw_dump_rejects_non_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.json");
        let err = write_raw_dump(&path, b"Service Unavailable").unwrap_err();
        assert!(matches!(err, PipelineError::PayloadDecode(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn replays_saved_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.json");
        std::fs::write(&path, BODY).unwrap();

        let items: Vec<_> = RawFileSource::new(&path, "fallback").stream().await.collect().await;
        assert_eq!(items.len(), 1);
        let record = &items[0].as_ref().unwrap().payload;
        assert_eq!(record.location, "L1");
        assert_eq!(record.total, 1.0);
    }

    #[tokio::test]
    async fn missing_file_is_a_fatal_source_error() {
        let items: Vec<_> = RawFileSource::new("/nonexistent/raw.json", "x").stream().await.collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PipelineError::Source(_))));
    }

    #[tokio::test]
    async fn invalid_json_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.json");
        std::fs::write(&path, "{\"truncated\": ").unwrap();

        let items: Vec<_> = RawFileSource::new(&path, "x").stream().await.collect().await;
        assert!(matches!(items[0], Err(PipelineError::PayloadDecode(_))));
    }
}
