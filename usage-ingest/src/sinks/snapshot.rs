//! Flat JSON snapshot backend.
//!
//! The snapshot is the full persisted record set. Each run reads it, merges
//! the new batch in, prunes by retention, and replaces the file wholesale.

use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use usage_client::domain::{format_start_time, parse_start_time, UsageRecord};

use crate::{
    pipeline::{drain, Envelope, PipelineError, Sink},
    store::merge_and_prune,
};

/// On-disk entry. Field names match the files the original exporter wrote,
/// so existing snapshots keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEntry {
    #[serde(rename = "Start Time")]
    start_time: String,
    #[serde(rename = "Total", default)]
    total: Option<f64>,
    #[serde(rename = "Price", default, skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    #[serde(rename = "Minimum", default, skip_serializing_if = "Option::is_none")]
    minimum: Option<f64>,
    #[serde(rename = "Maximum", default, skip_serializing_if = "Option::is_none")]
    maximum: Option<f64>,
    #[serde(rename = "Location", default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(rename = "Meter ID", default, skip_serializing_if = "Option::is_none")]
    meter_id: Option<String>,
    #[serde(rename = "Channel", default, skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
}

impl From<&UsageRecord> for SnapshotEntry {
    fn from(r: &UsageRecord) -> Self {
        SnapshotEntry {
            start_time: format_start_time(r.ts),
            total: Some(r.total),
            price: r.price,
            minimum: r.minimum,
            maximum: r.maximum,
            location: Some(r.location.clone()).filter(|l| !l.is_empty()),
            meter_id: r.meter_id.clone(),
            channel: r.channel.clone(),
        }
    }
}

impl SnapshotEntry {
    fn into_record(self) -> Option<UsageRecord> {
        let ts = parse_start_time(&self.start_time)?;
        Some(UsageRecord {
            ts,
            location: self.location.unwrap_or_default(),
            meter_id: self.meter_id,
            channel: self.channel,
            total: self.total.unwrap_or(0.0),
            minimum: self.minimum,
            maximum: self.maximum,
            price: self.price,
        })
    }
}

struct LoadedSnapshot {
    records: Vec<UsageRecord>,
    /// Digest of the bytes on disk; `None` when there was no readable file.
    digest: Option<blake3::Hash>,
}

fn load(path: &Path) -> LoadedSnapshot {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no prior snapshot, starting empty");
            return LoadedSnapshot { records: Vec::new(), digest: None };
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "prior snapshot unreadable, starting empty");
            return LoadedSnapshot { records: Vec::new(), digest: None };
        }
    };
    let digest = Some(blake3::hash(&bytes));

    let entries: Vec<serde_json::Value> = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "prior snapshot is corrupt, starting empty");
            metrics::counter!("snapshot_corrupt_total").increment(1);
            return LoadedSnapshot { records: Vec::new(), digest };
        }
    };

    let mut records = Vec::with_capacity(entries.len());
    for (idx, value) in entries.into_iter().enumerate() {
        let entry: SnapshotEntry = match serde_json::from_value(value) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "dropping malformed snapshot entry");
                metrics::counter!("usage_records_skipped_total", "reason" => "malformed_snapshot_entry")
                    .increment(1);
                continue;
            }
        };
        let start_time = entry.start_time.clone();
        match entry.into_record() {
            Some(r) => records.push(r),
            None => {
                tracing::warn!(index = idx, start_time = %start_time, "dropping snapshot entry with unparseable start time");
                metrics::counter!("usage_records_skipped_total", "reason" => "invalid_start").increment(1);
            }
        }
    }

    LoadedSnapshot { records, digest }
}

/// Prior state at `path`. Missing or corrupt files read as empty.
pub fn read_snapshot(path: &Path) -> Vec<UsageRecord> {
    load(path).records
}

fn encode(records: &[UsageRecord]) -> Result<Vec<u8>, PipelineError> {
    let entries: Vec<SnapshotEntry> = records.iter().map(SnapshotEntry::from).collect();
    serde_json::to_vec_pretty(&entries).map_err(|e| PipelineError::Sink(format!("failed to encode snapshot: {e}")))
}

/// Replace `path` with `records`, atomically.
pub fn write_snapshot(path: &Path, records: &[UsageRecord]) -> Result<(), PipelineError> {
    write_atomic(path, &encode(records)?)
}

/// Write to a temporary sibling, fsync, then rename over `path`. Readers see
/// either the old contents or the new, never a torn file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let sink_err = |what: &str, e: std::io::Error| {
        PipelineError::Sink(format!("{what} for {}: {e}", path.display()))
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| sink_err("failed to create temp file", e))?;
    tmp.write_all(bytes).map_err(|e| sink_err("failed to write temp file", e))?;
    tmp.as_file().sync_all().map_err(|e| sink_err("failed to sync temp file", e))?;
    tmp.persist(path).map_err(|e| sink_err("failed to replace file", e.error))?;
    Ok(())
}

/// Exclusive claim on a snapshot for the duration of a read-merge-write.
/// Released on drop.
pub struct SnapshotLock {
    path: PathBuf,
}

impl SnapshotLock {
    pub fn acquire(snapshot: &Path) -> Result<Self, PipelineError> {
        let mut lock = snapshot.as_os_str().to_owned();
        lock.push(".lock");
        let path = PathBuf::from(lock);

        let mut file: File = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => PipelineError::Sink(format!(
                    "snapshot {} is locked by another run (remove {} if stale)",
                    snapshot.display(),
                    path.display()
                )),
                _ => PipelineError::Sink(format!("failed to create lock {}: {e}", path.display())),
            })?;
        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            tracing::debug!(path = %path.display(), error = %e, "failed to record pid in snapshot lock");
        }

        Ok(Self { path })
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release snapshot lock");
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotSink {
    path: PathBuf,
    retention_days: u32,
    now: OffsetDateTime,
}

impl SnapshotSink {
    pub fn new<P: Into<PathBuf>>(path: P, retention_days: u32, now: OffsetDateTime) -> Self {
        Self {
            path: path.into(),
            retention_days,
            now,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, incoming: Vec<Envelope<UsageRecord>>) -> Result<(), PipelineError> {
        let _lock = SnapshotLock::acquire(&self.path)?;
        let prior = load(&self.path);
        let prior_len = prior.records.len();

        let merged = merge_and_prune(
            prior.records,
            incoming.into_iter().map(|e| e.payload),
            self.retention_days,
            self.now,
        );

        if merged.is_empty() && prior.digest.is_none() {
            tracing::info!(path = %self.path.display(), "no records to persist, snapshot not created");
            return Ok(());
        }

        let bytes = encode(&merged)?;
        if prior.digest == Some(blake3::hash(&bytes)) {
            tracing::info!(path = %self.path.display(), records = merged.len(), "snapshot unchanged");
            return Ok(());
        }

        write_atomic(&self.path, &bytes)?;
        metrics::counter!("snapshot_writes_total").increment(1);
        tracing::info!(
            path = %self.path.display(),
            prior = prior_len,
            records = merged.len(),
            "snapshot written"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink<UsageRecord> for SnapshotSink {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<UsageRecord>, PipelineError>> + Send + Unpin + 'static,
    {
        let incoming = drain(input, "snapshot").await?;
        let sink = self.clone();
        tokio::task::spawn_blocking(move || sink.persist(incoming))
            .await
            .map_err(|e| PipelineError::Sink(format!("snapshot writer task failed: {e}")))?
            .inspect_err(|e| {
                tracing::error!(error = %e, path = %self.path.display(), "snapshot write failed");
                metrics::counter!("snapshot_sink_errors_total").increment(1);
            })
    }
}
