use usage_client::domain::UsageRecord;

use crate::pipeline::{Envelope, PipelineError, Transform};

/// Attach `price = total * unit_price` to a record.
pub fn annotate_price(mut record: UsageRecord, unit_price: f64) -> Result<UsageRecord, PipelineError> {
    check_unit_price(unit_price)?;
    record.price = Some(record.total * unit_price);
    Ok(record)
}

fn check_unit_price(unit_price: f64) -> Result<(), PipelineError> {
    if !unit_price.is_finite() || unit_price < 0.0 {
        return Err(PipelineError::InvalidPrice(unit_price));
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct PriceAnnotation {
    unit_price: f64,
}

impl PriceAnnotation {
    pub fn new(unit_price: f64) -> Result<Self, PipelineError> {
        check_unit_price(unit_price)?;
        Ok(Self { unit_price })
    }
}

#[async_trait::async_trait]
impl Transform<UsageRecord, UsageRecord> for PriceAnnotation {
    async fn apply(&self, input: Envelope<UsageRecord>) -> Result<Envelope<UsageRecord>, PipelineError> {
        let Envelope { payload, received_at } = input;
        Ok(Envelope {
            payload: annotate_price(payload, self.unit_price)?,
            received_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(total: f64) -> UsageRecord {
        UsageRecord::new(datetime!(2024-01-01 00:00:00 UTC), "loc-1", total)
    }

    #[test]
    fn price_is_total_times_unit_price() {
        let priced = annotate_price(record(10.0), 0.15).unwrap();
        let price = priced.price.unwrap();
        assert!((price - 1.5).abs() < 1e-9, "price was {price}");
    }

    #[test]
    fn zero_total_prices_to_zero() {
        let priced = annotate_price(record(0.0), 0.15).unwrap();
        assert_eq!(priced.price, Some(0.0));
    }

    #[test]
    fn zero_unit_price_is_allowed() {
        let priced = annotate_price(record(3.0), 0.0).unwrap();
        assert_eq!(priced.price, Some(0.0));
    }

    #[test]
    fn negative_unit_price_is_rejected() {
        let err = annotate_price(record(10.0), -0.15).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPrice(p) if p == -0.15));
    }

    #[test]
    fn non_finite_unit_price_is_rejected() {
        assert!(annotate_price(record(1.0), f64::NAN).is_err());
        assert!(annotate_price(record(1.0), f64::INFINITY).is_err());
        assert!(PriceAnnotation::new(f64::NEG_INFINITY).is_err());
    }

    #[tokio::test]
    async fn transform_keeps_envelope_metadata() {
        let env = Envelope::now(record(2.0));
        let received_at = env.received_at;

        let out = PriceAnnotation::new(0.5).unwrap().apply(env).await.unwrap();
        assert_eq!(out.received_at, received_at);
        assert_eq!(out.payload.price, Some(1.0));
    }
}
