// Request completion
// Each request owns exactly one `Completion`. It resolves either when the
// response has been fully handed to the connection (completed) or when the
// request is dropped before that (aborted); whichever comes first wins and
// the other path finds nothing left to do.
//
// Numan Thabit 2025 Nov

use crate::api_metrics::ApiMetrics;
use crate::context::ObservationContext;
use crate::labels::LabelName;
use axum::http::StatusCode;
use http_body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Aborted,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Aborted => "aborted",
        }
    }
}

struct Pending {
    metrics: Arc<ApiMetrics>,
    context: ObservationContext,
    status: Option<StatusCode>,
}

impl Pending {
    fn finish(self, outcome: Outcome) {
        let Pending {
            metrics,
            context,
            status,
        } = self;
        // No response means no status; leave the label empty rather than
        // inventing a numeric placeholder.
        let status_code = status.map(|s| s.as_u16().to_string()).unwrap_or_default();
        context.labels().insert(LabelName::State, outcome.as_str());
        context.labels().insert(LabelName::StatusCode, status_code);

        let observation = context.finalize(metrics.ledger());
        debug!(
            state = outcome.as_str(),
            status = ?status,
            latency_s = observation.latency_seconds,
            bytes = ?observation.bytes,
            "request finalized"
        );
        metrics.observe(&observation);
    }
}

/// Single finalization point of a request.
pub struct Completion {
    pending: Option<Pending>,
}

impl Completion {
    pub fn new(metrics: Arc<ApiMetrics>, context: ObservationContext) -> Self {
        Self {
            pending: Some(Pending {
                metrics,
                context,
                status: None,
            }),
        }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        if let Some(pending) = self.pending.as_mut() {
            pending.status = Some(status);
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.pending.is_none()
    }

    /// Finalize now. Later calls are no-ops.
    pub fn resolve(&mut self, outcome: Outcome) {
        if let Some(pending) = self.pending.take() {
            pending.finish(outcome);
        }
    }

    /// Finalize once the connection has flushed what was written so far, so
    /// the written delta covers the whole response. If the connection closes
    /// before flushing, the request counts as aborted. Requests that did not
    /// come in over a counted connection finalize immediately.
    pub fn resolve_after_flush(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let connection = pending.context.connection().cloned();
        match connection {
            Some(conn) => conn.after_flush(move |delivered| {
                let outcome = if delivered {
                    Outcome::Completed
                } else {
                    Outcome::Aborted
                };
                pending.finish(outcome);
            }),
            None => pending.finish(Outcome::Completed),
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.resolve(Outcome::Aborted);
    }
}

/// Response body that resolves the request's [`Completion`] when its last
/// frame has been produced. Dropping it earlier resolves as aborted.
pub struct ObservedBody<B> {
    inner: B,
    completion: Completion,
}

impl<B> ObservedBody<B>
where
    B: Body,
{
    pub fn new(inner: B, mut completion: Completion) -> Self {
        // Empty bodies may never be polled.
        if inner.is_end_stream() {
            completion.resolve_after_flush();
        }
        Self { inner, completion }
    }
}

impl<B> Body for ObservedBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_frame(cx);
        match &poll {
            Poll::Ready(None) => this.completion.resolve_after_flush(),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => {
                this.completion.resolve_after_flush()
            }
            Poll::Ready(Some(Err(_))) => this.completion.resolve(Outcome::Aborted),
            _ => {}
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
