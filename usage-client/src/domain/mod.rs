pub mod raw_reading;
pub mod usage_record;

pub use raw_reading::{ChannelReading, IntervalMetrics, IntervalRead, IntervalSpan, RawReading};
pub use usage_record::{format_start_time, parse_start_time, UsageRecord};
