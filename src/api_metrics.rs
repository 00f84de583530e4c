// API request metrics
// Installs the arrival counter and the byte and latency histograms on a
// registry and returns the tower layer that feeds them for every request
//
// Numan Thabit 2025 Nov

use crate::buckets::BucketConfig;
use crate::completion::{Completion, ObservedBody};
use crate::connection::ConnectionLedger;
use crate::context::{FinalizedObservation, ObservationContext};
use crate::errors::{MetricsError, Result};
use crate::labels::LABEL_NAMES;
use axum::http::{Method, Request, Response, StatusCode};
use futures::future::BoxFuture;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::info;

pub const API_ARRIVAL_TOTAL: &str = "api_arrival_total";
pub const API_BYTES_READ: &str = "api_bytes_read";
pub const API_BYTES_WRITTEN: &str = "api_bytes_written";
pub const API_LATENCY_SECONDS: &str = "api_latency_seconds";

/// The four api metrics plus the connection side table they are fed from.
pub struct ApiMetrics {
    arrivals: IntCounterVec,
    bytes_read: HistogramVec,
    bytes_written: HistogramVec,
    latency: HistogramVec,
    ledger: ConnectionLedger,
}

impl ApiMetrics {
    /// Create the metrics, register them on `registry` and return the
    /// request hook. Registering twice on one registry fails with the
    /// registry's own `AlreadyReg` error.
    pub fn register(registry: &Registry, buckets: &BucketConfig) -> Result<ApiMetricsLayer> {
        check_increasing(API_LATENCY_SECONDS, &buckets.latency)?;
        check_increasing(API_BYTES_READ, &buckets.bytes_rw)?;

        let arrivals = IntCounterVec::new(
            Opts::new(API_ARRIVAL_TOTAL, "number of arrivals to the API"),
            &LABEL_NAMES,
        )?;
        let bytes_read = HistogramVec::new(
            HistogramOpts::new(
                API_BYTES_READ,
                "histogram of bytes read on the socket for each request",
            )
            .buckets(buckets.bytes_rw.clone()),
            &LABEL_NAMES,
        )?;
        let bytes_written = HistogramVec::new(
            HistogramOpts::new(
                API_BYTES_WRITTEN,
                "histogram of bytes written on the socket for each request",
            )
            .buckets(buckets.bytes_rw.clone()),
            &LABEL_NAMES,
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                API_LATENCY_SECONDS,
                "histogram of time spent to process a request from arrival to completion",
            )
            .buckets(buckets.latency.clone()),
            &LABEL_NAMES,
        )?;

        registry.register(Box::new(arrivals.clone()))?;
        registry.register(Box::new(bytes_read.clone()))?;
        registry.register(Box::new(bytes_written.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        info!(
            latency_buckets = buckets.latency.len(),
            bytes_rw_buckets = buckets.bytes_rw.len(),
            "api metrics registered"
        );

        Ok(ApiMetricsLayer {
            metrics: Arc::new(Self {
                arrivals,
                bytes_read,
                bytes_written,
                latency,
                ledger: ConnectionLedger::new(),
            }),
        })
    }

    pub fn ledger(&self) -> &ConnectionLedger {
        &self.ledger
    }

    /// Count a request on arrival with the labels known at that point.
    pub fn arrived(&self, context: &ObservationContext) {
        let labels = context.labels().snapshot();
        self.arrivals.with_label_values(&labels.values()).inc();
    }

    /// Emit the histogram observations of a finished request.
    pub fn observe(&self, observation: &FinalizedObservation) {
        let values = observation.labels.values();
        if let Some(delta) = observation.bytes {
            self.bytes_read
                .with_label_values(&values)
                .observe(delta.read as f64);
            self.bytes_written
                .with_label_values(&values)
                .observe(delta.written as f64);
        }
        self.latency
            .with_label_values(&values)
            .observe(observation.latency_seconds);
    }
}

fn check_increasing(metric: &'static str, bounds: &[f64]) -> Result<()> {
    if bounds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(MetricsError::InvalidBuckets {
            metric,
            reason: "bucket boundaries must be strictly increasing".to_string(),
        });
    }
    Ok(())
}

/// Tower layer that instruments every request passing through it.
#[derive(Clone)]
pub struct ApiMetricsLayer {
    metrics: Arc<ApiMetrics>,
}

impl ApiMetricsLayer {
    pub fn metrics(&self) -> &Arc<ApiMetrics> {
        &self.metrics
    }
}

impl<S> Layer<S> for ApiMetricsLayer {
    type Service = ApiMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiMetricsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ApiMetricsService<S> {
    inner: S,
    metrics: Arc<ApiMetrics>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ApiMetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: http_body::Body,
{
    type Response = Response<ObservedBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let context = ObservationContext::create(&mut req, &self.metrics.ledger);
        self.metrics.arrived(&context);
        let mut completion = Completion::new(self.metrics.clone(), context);
        let is_head = req.method() == Method::HEAD;

        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move {
            let response = inner.call(req).await?;
            completion.set_status(response.status());
            // Nobody polls these bodies; the exchange ends with the head.
            if is_head || !carries_body(response.status()) {
                completion.resolve_after_flush();
            }
            Ok(response.map(|body| ObservedBody::new(body, completion)))
        })
    }
}

/// Whether a response with `status` may have a body on the wire.
fn carries_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}
