use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};
use usage_client::api::ApiError;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("payload decode failed: {0}")]
    PayloadDecode(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("record skipped: {0}")]
    RecordSkipped(String),
    #[error("invalid unit price {0}: must be finite and non-negative")]
    InvalidPrice(f64),
    #[error("sink error: {0}")]
    Sink(String),
}

impl PipelineError {
    /// Per-record problems drop one record; everything else ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RecordSkipped(_))
    }
}

impl From<ApiError> for PipelineError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Auth(msg) => Self::Auth(msg),
            ApiError::Fetch(msg) => Self::Fetch(msg),
            ApiError::PayloadDecode(err) => Self::PayloadDecode(err.to_string()),
            ApiError::Config(msg) => Self::Source(msg),
        }
    }
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

/// Collect a finished stream, dropping skipped records and stopping at the
/// first fatal error. Sinks call this before touching storage so a failed
/// run never commits partial output.
pub async fn drain<T, S>(mut input: S, sink_name: &str) -> Result<Vec<Envelope<T>>, PipelineError>
where
    S: Stream<Item = Result<Envelope<T>, PipelineError>> + Unpin,
{
    let mut out = Vec::new();
    while let Some(item) = input.next().await {
        match item {
            Ok(env) => out.push(env),
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, sink = sink_name, "fatal error in upstream pipeline");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, sink = sink_name, "dropping record");
                metrics::counter!("usage_records_dropped_total").increment(1);
            }
        }
    }
    Ok(out)
}

pub struct Pipeline<S, T, K> {
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T, T> + Send + Sync>>, // same-type transforms chain
    pub sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + Send + Sync + 'static,
    K: Sink<T> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<(), PipelineError> {
        let mut stream = self.source.stream().await;

        // Apply transforms in sequence (if any).
        for t in self.transforms {
            let t_arc = t.clone();
            stream = Box::pin(stream.then(move |item| {
                let t_inner = t_arc.clone();
                async move {
                    match item {
                        Ok(env) => t_inner.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        self.sink.run(stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn only_record_skips_are_non_fatal() {
        assert!(!PipelineError::RecordSkipped("x".into()).is_fatal());
        assert!(PipelineError::Auth("x".into()).is_fatal());
        assert!(PipelineError::PayloadDecode("x".into()).is_fatal());
        assert!(PipelineError::InvalidPrice(-1.0).is_fatal());
        assert!(PipelineError::Sink("x".into()).is_fatal());
    }

    #[tokio::test]
    async fn drain_skips_non_fatal_errors() {
        let items = vec![
            Ok(Envelope::now(1)),
            Err(PipelineError::RecordSkipped("bad".into())),
            Ok(Envelope::now(2)),
        ];
        let out = drain(stream::iter(items), "test").await.unwrap();
        let values: Vec<i32> = out.into_iter().map(|e| e.payload).collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test]
    async fn drain_stops_at_first_fatal_error() {
        let items = vec![
            Ok(Envelope::now(1)),
            Err(PipelineError::Fetch("503".into())),
            Ok(Envelope::now(2)),
        ];
        let err = drain(stream::iter(items), "test").await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(_)));
    }
}
