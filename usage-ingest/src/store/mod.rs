//! Retention-windowed merge of freshly fetched records into persisted state.
//!
//! Records are keyed by interval start. A later write for the same start
//! replaces the earlier one outright, and anything older than the retention
//! cutoff is dropped. The clock is always passed in.

use std::collections::BTreeMap;

use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use usage_client::domain::UsageRecord;

/// Earliest instant still inside the retention window. A window reaching
/// past the earliest representable date keeps everything.
pub fn retention_cutoff(now: OffsetDateTime, retention_days: u32) -> OffsetDateTime {
    now.checked_sub(Duration::days(i64::from(retention_days)))
        .unwrap_or_else(|| PrimitiveDateTime::MIN.assume_utc())
}

/// A record is kept unless it starts strictly before the cutoff.
pub fn is_retained(ts: OffsetDateTime, cutoff: OffsetDateTime) -> bool {
    ts >= cutoff
}

/// Merge `incoming` over `existing`, prune by retention, and return the
/// survivors in ascending timestamp order.
///
/// Within `incoming`, records sharing a timestamp resolve by arrival order:
/// the last one wins.
pub fn merge_and_prune<I, J>(
    existing: I,
    incoming: J,
    retention_days: u32,
    now: OffsetDateTime,
) -> Vec<UsageRecord>
where
    I: IntoIterator<Item = UsageRecord>,
    J: IntoIterator<Item = UsageRecord>,
{
    let mut by_ts: BTreeMap<i64, UsageRecord> = BTreeMap::new();

    for record in existing {
        by_ts.insert(key(&record), record);
    }

    let mut replaced = 0usize;
    let mut added = 0usize;
    for record in incoming {
        match by_ts.insert(key(&record), record) {
            Some(_) => replaced += 1,
            None => added += 1,
        }
    }

    let cutoff = retention_cutoff(now, retention_days);
    // Ascending keys: everything before the cutoff is a prefix.
    let kept = by_ts.split_off(&first_retained_key(cutoff));
    let pruned = by_ts.len();

    tracing::debug!(added, replaced, pruned, kept = kept.len(), %cutoff, "merged usage records");
    metrics::counter!("usage_records_pruned_total").increment(pruned as u64);

    kept.into_values().collect()
}

/// Merge key: the interval start in whole UTC seconds, which is exactly what
/// the snapshot's `Start Time` text can represent.
fn key(record: &UsageRecord) -> i64 {
    record.ts.unix_timestamp()
}

/// Smallest key not strictly before `cutoff`.
fn first_retained_key(cutoff: OffsetDateTime) -> i64 {
    let secs = cutoff.unix_timestamp();
    if cutoff.nanosecond() > 0 {
        secs + 1
    } else {
        secs
    }
}
