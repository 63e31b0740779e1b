use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use time::OffsetDateTime;
use usage_client::domain::UsageRecord;
use usage_ingest::{
    config::ReplayConfig,
    observability,
    pipeline::Pipeline,
    sinks::UsageSink,
    sources::RawFileSource,
    transform,
};

/// Push a saved readings payload through the configured sink without
/// contacting the upstream API.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Raw readings payload previously saved via `raw_dump_path`.
    raw_file: PathBuf,

    /// Config file (TOML, or YAML when it ends in .yaml/.yml). Only the
    /// pricing and sink sections are required.
    #[arg(short, long, env = "USAGE_INGEST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let cli = Cli::parse();

    let cfg = ReplayConfig::load(cli.config.as_deref())?;

    let now = OffsetDateTime::now_utc();
    let sink = UsageSink::from_config(&cfg.sink, now)?;
    let source = RawFileSource::new(cli.raw_file.clone(), cfg.api.service_location.clone());

    let pipeline: Pipeline<_, UsageRecord, _> = Pipeline {
        source,
        transforms: transform::standard_chain(cfg.unit_price())?,
        sink,
    };

    pipeline.run().await?;
    tracing::info!(file = %cli.raw_file.display(), "replay complete");

    Ok(())
}
