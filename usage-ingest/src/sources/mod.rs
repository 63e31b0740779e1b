pub mod raw_file;
pub mod smarthub;

pub use raw_file::{write_raw_dump, RawFileSource};
pub use smarthub::SmartHubSource;

use usage_client::{api::decode_payload, domain::UsageRecord};

use crate::{pipeline::PipelineError, transform::normalize_readings};

/// Decode a readings body and flatten it into records.
fn records_from_body(body: &[u8], default_location: &str) -> Result<Vec<UsageRecord>, PipelineError> {
    let raw = decode_payload(body).map_err(PipelineError::from)?;
    let normalized = normalize_readings(&raw, default_location);
    tracing::info!(
        meters = raw.len(),
        records = normalized.records.len(),
        skipped = normalized.skipped,
        "normalized readings"
    );
    Ok(normalized.records)
}
