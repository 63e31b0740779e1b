//! Prometheus export for a run-to-completion job.
//!
//! There is no scrape endpoint: the recorder is installed at start-up and its
//! rendering is written to a text file when the run ends, for a node
//! exporter textfile collector to pick up.

use std::path::Path;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::{pipeline::PipelineError, sinks::snapshot::write_atomic};

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub fn init() -> anyhow::Result<()> {
    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus metrics recorder: {e}"))?;

    // Ignore error if the handle was already set; this should only be called once.
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

/// Write the current metrics to `path`. A no-op if [`init`] was never called.
pub fn write_textfile(path: &Path) -> Result<(), PipelineError> {
    let Some(handle) = PROM_HANDLE.get() else {
        return Ok(());
    };
    write_atomic(path, handle.render().as_bytes())
}
