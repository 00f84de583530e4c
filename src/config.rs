// Configuration management module
// This file loads service settings from `METRICS_GATHERER_*` environment
// variables and validates them at start-up
//
// Numan Thabit 2025 Nov

use crate::buckets::BucketConfig;
use crate::errors::Result;
use crate::monitoring::MonitoringConfig;
use serde::Deserialize;
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "METRICS_GATHERER";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Value of the `svc` label on every series
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Port of the instrumented API
    #[serde(default = "default_service_port")]
    pub service_port: u16,
    /// Port serving `/metrics`
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Port serving dashboards and rule files
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_dashboards_dir")]
    pub dashboards_dir: PathBuf,
    /// YAML file with user metrics and rules (optional)
    pub monitoring_config: Option<PathBuf>,
    /// Comma-separated latency bucket bounds in seconds, e.g. `1,2,4,8`
    pub latency_buckets: Option<String>,
    /// Comma-separated byte bucket bounds
    pub bytes_rw_buckets: Option<String>,
}

fn default_service_name() -> String {
    "api".to_string()
}

fn default_service_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_discovery_port() -> u16 {
    9393
}

fn default_dashboards_dir() -> PathBuf {
    PathBuf::from("/etc/monitoring/dashboards/")
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::build(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Load from an explicit variable map instead of the process environment.
    pub fn from_vars(vars: config::Map<String, String>) -> Result<Self> {
        Self::build(config::Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn build(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder().add_source(env).build()?;
        let app: Self = cfg.try_deserialize()?;
        // Bad bucket lists must stop the process before anything is served.
        app.bucket_config()?;
        Ok(app)
    }

    pub fn bucket_config(&self) -> Result<BucketConfig> {
        BucketConfig::from_overrides(
            self.latency_buckets.as_deref(),
            self.bytes_rw_buckets.as_deref(),
        )
    }

    pub fn monitoring(&self) -> Result<MonitoringConfig> {
        match &self.monitoring_config {
            Some(path) => MonitoringConfig::from_file(path),
            None => Ok(MonitoringConfig::default()),
        }
    }
}
