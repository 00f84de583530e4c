// Error types and error handling module
// This file defines the error type shared by the metrics middleware,
// the bucket resolver and the monitoring service
//
// Numan Thabit 2025 Nov

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("label name not declared in the api metrics schema: {0}")]
    UnknownLabel(String),
    #[error("invalid bucket boundaries for {metric}: {reason}")]
    InvalidBuckets { metric: &'static str, reason: String },
    #[error("registry error: {0}")]
    Registry(#[from] prometheus::Error),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = MetricsError> = std::result::Result<T, E>;
