//! Shape of the readings payload returned by the utility's graph endpoint.
//!
//! Every nested field is optional: the upstream regularly omits `metrics`
//! for intervals that have not been billed yet, and channels show up either
//! as strings or bare numbers depending on the meter firmware. A field with
//! the wrong JSON type reads as absent rather than failing the whole body.

use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;

/// One entry per meter location.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReading {
    #[serde(default, deserialize_with = "lenient_string")]
    pub meter_location: Option<String>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub readings: Vec<ChannelReading>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelReading {
    #[serde(default, deserialize_with = "lenient_string")]
    pub meter_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub channel: Option<String>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub reads: Vec<IntervalRead>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntervalRead {
    #[serde(default, deserialize_with = "lenient")]
    pub interval: Option<IntervalSpan>,
    #[serde(default, deserialize_with = "lenient")]
    pub metrics: Option<IntervalMetrics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntervalSpan {
    /// Interval start, epoch milliseconds.
    #[serde(default, deserialize_with = "lenient_millis")]
    pub start: Option<i64>,
}

/// Usage metrics in kWh.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntervalMetrics {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub total: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub minimum: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub maximum: Option<f64>,
}

impl RawReading {
    /// Decode one meter entry. A value that is not an object yields an entry
    /// with no readings.
    pub fn from_value(value: Value) -> Self {
        from_value_or_default(value)
    }
}

impl IntervalRead {
    pub fn start_millis(&self) -> Option<i64> {
        self.interval.as_ref().and_then(|i| i.start)
    }
}

fn from_value_or_default<T: DeserializeOwned + Default>(value: Value) -> T {
    T::deserialize(value).unwrap_or_default()
}

/// Wrong-typed elements become defaults so they are still counted downstream.
fn lenient_seq<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(match Value::deserialize(de)? {
        Value::Array(items) => items.into_iter().map(from_value_or_default).collect(),
        _ => Vec::new(),
    })
}

fn lenient<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(de)? {
        Value::Null => None,
        value => T::deserialize(value).ok(),
    })
}

fn lenient_string<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(de)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D>(de: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(de)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite()))
}

fn lenient_millis<'de, D>(de: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(de)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
