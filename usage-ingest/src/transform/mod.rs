pub mod normalize;
pub mod price;

pub use normalize::{normalize_readings, Normalized};
pub use price::{annotate_price, PriceAnnotation};

use std::sync::Arc;

use crate::pipeline::{Envelope, PipelineError, Transform};
use time::macros::datetime;
use usage_client::domain::UsageRecord;

/// Pure validation of a `UsageRecord`.
///
/// Rules:
/// - ts must be within a broad sanity window [2000-01-01, 2100-01-01).
///
/// Negative totals are accepted: net-metered services report export as
/// negative usage.
pub fn validate_usage_record(env: Envelope<UsageRecord>) -> Result<Envelope<UsageRecord>, PipelineError> {
    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    let ts = env.payload.ts;
    if ts < min_ts || ts >= max_ts {
        return Err(PipelineError::RecordSkipped(format!("timestamp {ts} out of allowed range")));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct UsageRecordValidation;

#[async_trait::async_trait]
impl Transform<UsageRecord, UsageRecord> for UsageRecordValidation {
    async fn apply(
        &self,
        input: Envelope<UsageRecord>,
    ) -> Result<Envelope<UsageRecord>, PipelineError> {
        match validate_usage_record(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("usage_records_skipped_total", "reason" => "ts_out_of_range").increment(1);
                Err(e)
            }
        }
    }
}

/// Transform chain applied to every run: validation, then pricing when a
/// unit price is configured.
pub fn standard_chain(
    unit_price: Option<f64>,
) -> Result<Vec<Arc<dyn Transform<UsageRecord, UsageRecord> + Send + Sync>>, PipelineError> {
    let mut chain: Vec<Arc<dyn Transform<UsageRecord, UsageRecord> + Send + Sync>> =
        vec![Arc::new(UsageRecordValidation)];
    if let Some(price) = unit_price {
        chain.push(Arc::new(PriceAnnotation::new(price)?));
    }
    Ok(chain)
}
