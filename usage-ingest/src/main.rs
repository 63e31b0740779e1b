use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use time::OffsetDateTime;
use usage_client::{
    api::{SmartHubClient, TimeRange},
    domain::UsageRecord,
};
use usage_ingest::{
    config::AppConfig,
    metrics_export, observability,
    pipeline::Pipeline,
    sinks::UsageSink,
    sources::SmartHubSource,
    transform,
};

/// Fetch interval usage from the utility portal and persist it.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (TOML, or YAML when it ends in .yaml/.yml).
    #[arg(short, long, env = "USAGE_INGEST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let cli = Cli::parse();

    let cfg = AppConfig::load(cli.config.as_deref())?;
    if cfg.metrics.is_some() {
        metrics_export::init()?;
    }

    // One clock for the whole run: the fetch window and the retention
    // cutoff both derive from it.
    let now = OffsetDateTime::now_utc();
    let range = TimeRange::lookback(cfg.api.extract_days, now);

    let client = SmartHubClient::new(cfg.api.settings())?;
    let source = SmartHubSource::new(client, range)
        .with_raw_dump(cfg.raw_dump_path.clone())
        .with_echo(cfg.output_to_cli);
    let sink = UsageSink::from_config(&cfg.sink, now)?;

    tracing::info!(
        sink = ?sink.kind(),
        extract_days = cfg.api.extract_days,
        retention_days = cfg.sink.retention_days,
        priced = cfg.pricing.is_some(),
        "starting usage ingest run"
    );

    let pipeline: Pipeline<_, UsageRecord, _> = Pipeline {
        source,
        transforms: transform::standard_chain(cfg.unit_price())?,
        sink,
    };
    let result = pipeline.run().await;

    if let Some(m) = &cfg.metrics {
        if let Err(e) = metrics_export::write_textfile(&m.textfile_path) {
            tracing::warn!(error = %e, "failed to write metrics textfile");
        }
    }

    match result {
        Ok(()) => {
            tracing::info!("usage ingest run complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "usage ingest run failed");
            Err(e.into())
        }
    }
}
