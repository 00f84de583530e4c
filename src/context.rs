// Per-request observation context
//
// Numan Thabit 2025 Nov

use crate::connection::{ByteBaseline, ByteDelta, ConnectionHandle, ConnectionLedger};
use crate::errors::Result;
use crate::labels::{LabelName, LabelSet};
use crate::latency::LatencyTimer;
use axum::http::Request;
use parking_lot::Mutex;
use std::sync::Arc;

/// Label values of one request.
///
/// The middleware inserts a handle into the request extensions, so
/// downstream handlers can enrich the labels with `Extension<MetricLabels>`
/// before the request completes. Only declared label names are accepted.
#[derive(Debug, Clone, Default)]
pub struct MetricLabels {
    inner: Arc<Mutex<LabelSet>>,
}

impl MetricLabels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a label by name, overwriting any earlier value.
    pub fn set(&self, name: &str, value: impl Into<String>) -> Result<()> {
        self.inner.lock().set(name, value)
    }

    pub fn insert(&self, name: LabelName, value: impl Into<String>) {
        self.inner.lock().insert(name, value);
    }

    pub fn get(&self, name: LabelName) -> String {
        self.inner.lock().get(name).to_string()
    }

    pub fn snapshot(&self) -> LabelSet {
        self.inner.lock().clone()
    }
}

/// Everything measured for a request, ready to be observed.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedObservation {
    pub labels: LabelSet,
    /// `None` when the request did not arrive over a counted connection.
    pub bytes: Option<ByteDelta>,
    pub latency_seconds: f64,
}

/// State attached to a request between arrival and completion.
#[derive(Debug)]
pub struct ObservationContext {
    labels: MetricLabels,
    bytes: Option<(ConnectionHandle, ByteBaseline)>,
    latency: LatencyTimer,
}

impl ObservationContext {
    /// Create the context for `req`, attach its labels to the request and
    /// take the byte and time baselines.
    pub fn create<B>(req: &mut Request<B>, ledger: &ConnectionLedger) -> Self {
        let labels = MetricLabels::new();
        req.extensions_mut().insert(labels.clone());

        let bytes = req
            .extensions()
            .get::<ConnectionHandle>()
            .cloned()
            .map(|conn| {
                ledger.attach_if_absent(&conn);
                let baseline = ledger.begin_request(&conn);
                (conn, baseline)
            });

        Self {
            labels,
            bytes,
            latency: LatencyTimer::begin(),
        }
    }

    pub fn labels(&self) -> &MetricLabels {
        &self.labels
    }

    pub fn set_label(&self, name: &str, value: impl Into<String>) -> Result<()> {
        self.labels.set(name, value)
    }

    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.bytes.as_ref().map(|(conn, _)| conn)
    }

    /// Close out byte and latency tracking and freeze the labels.
    pub fn finalize(self, ledger: &ConnectionLedger) -> FinalizedObservation {
        let bytes = self
            .bytes
            .map(|(conn, baseline)| ledger.end_request(&conn, baseline));
        FinalizedObservation {
            labels: self.labels.snapshot(),
            bytes,
            latency_seconds: self.latency.end(),
        }
    }
}
