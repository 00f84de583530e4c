// Library root module for api-metrics-gatherer
// This file defines the public API and module structure: per-request api
// metrics (arrivals, bytes read/written, latency) with per-connection byte
// accounting, plus the monitoring service that exposes them
//
// Numan Thabit 2025 Nov

pub mod api_metrics;
pub mod buckets;
pub mod completion;
pub mod config;
pub mod connection;
pub mod context;
pub mod errors;
pub mod labels;
pub mod latency;
pub mod monitoring;
pub mod server;

#[cfg(test)]
mod testing;

pub use api_metrics::{ApiMetrics, ApiMetricsLayer};
pub use buckets::BucketConfig;
pub use connection::{ConnectionHandle, ConnectionLedger};
pub use context::MetricLabels;
pub use errors::MetricsError;
pub use labels::{LabelName, LabelSet};
pub use monitoring::Monitoring;
