//! Deadline middleware for routes.
//!
//! Turns a route that is still running at its deadline into a timeout
//! outcome and fires the route's cancellation token.

use std::convert::Infallible;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::warn;

use crate::config::{AggregationPolicy, TimeoutScope};
use crate::error::{ErrorKind, RouteError};
use crate::executor::{RouteCall, RouteFuture};
use crate::outcome::Outcome;

// ---------------------------------------------------------------------------
// DeadlineLayer
// ---------------------------------------------------------------------------

/// Tower layer that bounds each route by a deadline.
///
/// With [`TimeoutScope::Invocation`] the deadline comes from the call itself;
/// with [`TimeoutScope::PerRoute`] it starts when the route enters the layer.
#[derive(Debug, Clone)]
pub struct DeadlineLayer {
    timeout: Option<Duration>,
    scope: TimeoutScope,
    kind: ErrorKind,
}

impl DeadlineLayer {
    /// A zero `timeout` arms no timer.
    #[must_use]
    pub fn new(timeout: Option<Duration>, scope: TimeoutScope, kind: ErrorKind) -> Self {
        Self {
            timeout: timeout.filter(|t| !t.is_zero()),
            scope,
            kind,
        }
    }

    #[must_use]
    pub fn from_policy(policy: &AggregationPolicy) -> Self {
        Self::new(
            policy.effective_timeout(),
            policy.timeout_scope,
            policy.timeout_error_kind.clone(),
        )
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = DeadlineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeadlineService {
            inner,
            timeout: self.timeout,
            scope: self.scope,
            kind: self.kind.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// DeadlineService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeadlineService<S> {
    inner: S,
    timeout: Option<Duration>,
    scope: TimeoutScope,
    kind: ErrorKind,
}

impl<S> DeadlineService<S> {
    fn deadline_for(&self, call: &RouteCall) -> Option<Instant> {
        match self.scope {
            TimeoutScope::Invocation => call.deadline,
            TimeoutScope::PerRoute => self.timeout.map(|t| Instant::now() + t),
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout
            .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
    }
}

impl<S> Service<RouteCall> for DeadlineService<S>
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
        let Some(deadline) = self.deadline_for(&call) else {
            let fut = self.inner.call(call);
            return Box::pin(fut);
        };

        let index = call.index;
        let event = call.pair.event().clone();
        let cancel = call.cancel.clone();
        let kind = self.kind.clone();
        let timeout_ms = self.timeout_ms();
        let fut = self.inner.call(call);

        Box::pin(async move {
            match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    cancel.cancel();
                    warn!(index, timeout_ms, kind = %kind, "route missed its deadline");
                    Ok(Outcome::failure(
                        index,
                        event,
                        RouteError::Timeout { kind, timeout_ms },
                    ))
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
