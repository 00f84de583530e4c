// Monitoring service
// Owns the registry of a service, builds the user metrics it declares,
// installs the api middleware and exposes the metrics and discovery
// endpoints
//
// Numan Thabit 2025 Nov

pub mod discovery;
pub mod schema;

pub use schema::{AlertingRule, MetricSchema, MonitoringConfig, RecordingRule};

use crate::api_metrics::{ApiMetrics, ApiMetricsLayer};
use crate::buckets::BucketConfig;
use crate::errors::Result;
use axum::{http::header, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Constant label attached to every series of the service.
pub const SERVICE_LABEL: &str = "svc";

/// User metrics by name, as declared in [`MonitoringConfig`].
#[derive(Default)]
pub struct MetricsMap {
    pub counter: HashMap<String, CounterVec>,
    pub gauge: HashMap<String, GaugeVec>,
    pub histogram: HashMap<String, HistogramVec>,
}

impl MetricsMap {
    pub fn from_config(config: &schema::MetricsSchema, registry: &Registry) -> Result<Self> {
        let mut map = Self::default();
        for schema in &config.counter {
            let labels = label_refs(schema);
            let metric = CounterVec::new(Opts::new(&schema.name, &schema.help), &labels)?;
            registry.register(Box::new(metric.clone()))?;
            map.counter.insert(schema.name.clone(), metric);
        }
        for schema in &config.gauge {
            let labels = label_refs(schema);
            let metric = GaugeVec::new(Opts::new(&schema.name, &schema.help), &labels)?;
            registry.register(Box::new(metric.clone()))?;
            map.gauge.insert(schema.name.clone(), metric);
        }
        for schema in &config.histogram {
            let labels = label_refs(schema);
            let mut opts = HistogramOpts::new(&schema.name, &schema.help);
            if let Some(buckets) = &schema.buckets {
                opts = opts.buckets(buckets.clone());
            }
            let metric = HistogramVec::new(opts, &labels)?;
            registry.register(Box::new(metric.clone()))?;
            map.histogram.insert(schema.name.clone(), metric);
        }
        Ok(map)
    }
}

fn label_refs(schema: &MetricSchema) -> Vec<&str> {
    schema.label_names.iter().map(String::as_str).collect()
}

pub struct Monitoring {
    name: String,
    registry: Registry,
    metrics: MetricsMap,
    config: MonitoringConfig,
}

impl Monitoring {
    pub fn new(name: &str, config: MonitoringConfig) -> Result<Self> {
        let mut const_labels = HashMap::new();
        const_labels.insert(SERVICE_LABEL.to_string(), name.to_string());
        let registry = Registry::new_custom(None, Some(const_labels))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        info!(service = %name, "describing metrics");
        let metrics = MetricsMap::from_config(&config.metrics, &registry)?;
        info!(
            service = %name,
            counters = metrics.counter.len(),
            gauges = metrics.gauge.len(),
            histograms = metrics.histogram.len(),
            recording_rules = config.recording_rules.len(),
            alerting_rules = config.alerting_rules.len(),
            "monitoring initialized"
        );

        Ok(Self {
            name: name.to_string(),
            registry,
            metrics,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metrics(&self) -> &MetricsMap {
        &self.metrics
    }

    /// Install the api request metrics on this service's registry.
    pub fn api_metrics_layer(&self, buckets: &BucketConfig) -> Result<ApiMetricsLayer> {
        ApiMetrics::register(&self.registry, buckets)
    }

    /// Current state of the registry in the text exposition format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn alerting_rules_yaml(&self) -> Result<String> {
        schema::alerting_rules_yaml(&self.name, &self.config.alerting_rules)
    }

    pub fn recording_rules_yaml(&self) -> Result<String> {
        schema::recording_rules_yaml(&self.name, &self.config.recording_rules)
    }
}

/// Router serving `/metrics`.
pub fn metrics_router(monitoring: Arc<Monitoring>) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .with_state(monitoring)
}

async fn serve_metrics(
    axum::extract::State(monitoring): axum::extract::State<Arc<Monitoring>>,
) -> impl IntoResponse {
    match monitoring.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
