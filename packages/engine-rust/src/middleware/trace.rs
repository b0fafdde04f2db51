//! Tracing and metrics middleware for routes.
//!
//! Opens a `route` span per call, records duration and outcome on it, and
//! feeds the `scatter_routes_total` counter and `scatter_route_duration_ms`
//! histogram.

use std::convert::Infallible;
use std::task::{Context, Poll};

use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::error::RouteError;
use crate::executor::{RouteCall, RouteFuture};
use crate::outcome::Outcome;

// ---------------------------------------------------------------------------
// RouteTraceLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments routes with spans and metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteTraceLayer;

impl<S> Layer<S> for RouteTraceLayer {
    type Service = RouteTraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RouteTraceService { inner }
    }
}

// ---------------------------------------------------------------------------
// RouteTraceService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RouteTraceService<S> {
    inner: S,
}

/// Metric label for an outcome.
fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome.as_failure().map(|f| &f.cause) {
        None => "ok",
        Some(RouteError::Timeout { .. }) => "timeout",
        Some(RouteError::Cancelled) => "cancelled",
        Some(RouteError::AdmissionTimeout | RouteError::AdmissionRejected) => "rejected",
        Some(RouteError::Failed(_) | RouteError::Panicked(_)) => "error",
    }
}

impl<S> Service<RouteCall> for RouteTraceService<S>
where
    S: Service<RouteCall, Response = Outcome, Error = Infallible> + Send,
    S::Future: Send + 'static,
{
    type Response = Outcome;
    type Error = Infallible;
    type Future = RouteFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: RouteCall) -> Self::Future {
        let index = call.index;
        let span = info_span!(
            "route",
            index = index,
            route = call.pair.route().name(),
            correlation_id = call.pair.event().correlation_id(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                let outcome = match &result {
                    Ok(outcome) => outcome_label(outcome),
                    Err(never) => match *never {},
                };

                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);
                metrics::counter!("scatter_routes_total", "outcome" => outcome).increment(1);
                #[allow(clippy::cast_precision_loss)]
                metrics::histogram!("scatter_route_duration_ms").record(duration_ms as f64);

                tracing::debug!(index, duration_ms, outcome, "route complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
