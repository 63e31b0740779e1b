pub mod config;
pub mod metrics_export;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod transform;

pub use pipeline::{Envelope, Pipeline, PipelineError};
