use serde::{de::DeserializeOwned, Deserialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use usage_client::api::ApiSettings;

pub const DEFAULT_CONFIG_PATH: &str = "usage-ingest.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub account: String,
    pub service_location: String,
    /// Upstream interval granularity, e.g. `HOURLY`.
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Days of history requested per run, ending today.
    #[serde(default = "default_extract_days")]
    pub extract_days: u32,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_interval() -> String {
    "HOURLY".into()
}

fn default_extract_days() -> u32 {
    7
}

fn default_timeout_secs() -> u64 {
    30
}

impl ApiConfig {
    pub fn settings(&self) -> ApiSettings {
        ApiSettings {
            base_url: self.base_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            account: self.account.clone(),
            service_location: self.service_location.clone(),
            interval: self.interval.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    /// Price per kWh.
    pub unit_price: f64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Snapshot,
    TimeSeries,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeSeriesConfig {
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub org: String,
    pub bucket: String,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_measurement() -> String {
    "energy_usage".into()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    /// Days of history kept; older records are pruned or never written.
    pub retention_days: u32,
    pub snapshot: Option<SnapshotConfig>,
    pub time_series: Option<TimeSeriesConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus text file written at the end of each run.
    pub textfile_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub pricing: Option<PricingConfig>,
    pub sink: SinkConfig,
    /// Save the decoded raw payload here before normalizing.
    pub raw_dump_path: Option<PathBuf>,
    /// Print the raw payload to stdout.
    #[serde(default)]
    pub output_to_cli: bool,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    /// Resolve the config path (explicit argument, then `USAGE_INGEST_CONFIG`,
    /// then the default file), parse it and apply env overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg: Self = read_config(path)?;

        if let Ok(password) = std::env::var("USAGE_INGEST_PASSWORD") {
            cfg.api.password = password;
        }
        cfg.sink.apply_env();

        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse config text; YAML when `path` ends in `.yaml`/`.yml`, TOML
    /// otherwise.
    pub fn parse(contents: &str, path: &Path) -> anyhow::Result<Self> {
        parse_as(contents, path)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.extract_days == 0 {
            anyhow::bail!("api.extract_days must be at least 1");
        }
        validate_pricing(self.pricing.as_ref())?;
        self.sink.validate()
    }

    pub fn unit_price(&self) -> Option<f64> {
        self.pricing.as_ref().map(|p| p.unit_price)
    }
}

/// What an offline replay needs from the same config file. The `[api]`
/// section may be absent or partial; only `service_location` is read, as the
/// location for meter entries that carry none.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub api: ReplayApiConfig,
    pub pricing: Option<PricingConfig>,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayApiConfig {
    #[serde(default)]
    pub service_location: String,
}

impl ReplayConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg: Self = read_config(path)?;
        cfg.sink.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(contents: &str, path: &Path) -> anyhow::Result<Self> {
        parse_as(contents, path)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_pricing(self.pricing.as_ref())?;
        self.sink.validate()
    }

    pub fn unit_price(&self) -> Option<f64> {
        self.pricing.as_ref().map(|p| p.unit_price)
    }
}

impl SinkConfig {
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("USAGE_INGEST_INFLUX_TOKEN") {
            if let Some(ts) = self.time_series.as_mut() {
                ts.token = token;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        match self.kind {
            SinkKind::Snapshot if self.snapshot.is_none() => {
                anyhow::bail!("sink.kind = \"snapshot\" requires a [sink.snapshot] section")
            }
            SinkKind::TimeSeries if self.time_series.is_none() => {
                anyhow::bail!("sink.kind = \"time_series\" requires a [sink.time_series] section")
            }
            _ => Ok(()),
        }
    }
}

fn validate_pricing(pricing: Option<&PricingConfig>) -> anyhow::Result<()> {
    if let Some(pricing) = pricing {
        if !pricing.unit_price.is_finite() || pricing.unit_price < 0.0 {
            anyhow::bail!(
                "pricing.unit_price must be a finite, non-negative number (got {})",
                pricing.unit_price
            );
        }
    }
    Ok(())
}

fn read_config<T: DeserializeOwned>(path: Option<&Path>) -> anyhow::Result<T> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::var("USAGE_INGEST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
    };
    let contents = fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
    parse_as(&contents, &path)
}

fn parse_as<T: DeserializeOwned>(contents: &str, path: &Path) -> anyhow::Result<T> {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let cfg = if is_yaml {
        serde_yaml::from_str(contents)?
    } else {
        toml::from_str(contents)?
    };
    Ok(cfg)
}
