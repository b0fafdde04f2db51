//! Innermost service of the route pipeline: runs one route to a terminal [`Outcome`].

use std::any::Any;
use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::Service;

use crate::error::RouteError;
use crate::outcome::Outcome;
use crate::pair::RoutingPair;

// ---------------------------------------------------------------------------
// RouteCall
// ---------------------------------------------------------------------------

/// Request flowing through the route pipeline.
#[derive(Debug, Clone)]
pub struct RouteCall {
    /// Submission index of the pair.
    pub index: usize,
    pub pair: RoutingPair,
    /// Child of the invocation's token; fired on fail-fast, deadline, or caller cancel.
    pub cancel: CancellationToken,
    /// Shared invocation deadline, if one applies.
    pub deadline: Option<Instant>,
}

impl RouteCall {
    #[must_use]
    pub fn new(index: usize, pair: RoutingPair, cancel: CancellationToken) -> Self {
        Self {
            index,
            pair,
            cancel,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Boxed future returned by every service in the route pipeline.
///
/// Route failures are data, so the pipeline itself never errors.
pub type RouteFuture = Pin<Box<dyn Future<Output = Result<Outcome, Infallible>> + Send>>;

// ---------------------------------------------------------------------------
// RouteExecutor
// ---------------------------------------------------------------------------

/// Calls [`Route::process`](scatter_core::Route::process) and captures every
/// way it can end, panics included, as an [`Outcome`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteExecutor;

impl RouteExecutor {
    /// Runs one pair directly, without deadline or tracing layers.
    pub async fn execute(index: usize, pair: RoutingPair, cancel: CancellationToken) -> Outcome {
        match Self.call(RouteCall::new(index, pair, cancel)).await {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }
}

impl Service<RouteCall> for RouteExecutor {
    type Response = Outcome;
    type Error = Infallible;
    type Future = RouteFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: RouteCall) -> Self::Future {
        let RouteCall {
            index,
            pair,
            cancel,
            ..
        } = call;
        let (event, route) = pair.into_parts();

        Box::pin(async move {
            let input = event.clone();
            let result = AssertUnwindSafe(route.process(event, &cancel))
                .catch_unwind()
                .await;

            let outcome = match result {
                Ok(Ok(output)) => Outcome::success(index, output),
                Ok(Err(_)) if cancel.is_cancelled() => {
                    Outcome::failure(index, input, RouteError::Cancelled)
                }
                Ok(Err(err)) => Outcome::failure(index, input, RouteError::failed(err)),
                Err(panic) => Outcome::failure(
                    index,
                    input,
                    RouteError::Panicked(panic_message(panic.as_ref())),
                ),
            };
            Ok(outcome)
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use scatter_core::{route_fn, Event};
    use tower::ServiceExt;

    use super::*;

    fn call_for(route: scatter_core::DynRoute, event: Event) -> RouteCall {
        RouteCall::new(3, RoutingPair::of(event, route), CancellationToken::new())
    }

    #[tokio::test]
    async fn success_keeps_index_and_output() {
        let route = route_fn("echo", |e: Event, _c| async move { Ok(e.with_payload("done")) });
        let outcome = RouteExecutor
            .oneshot(call_for(route, Event::new(1)))
            .await
            .unwrap();

        assert_eq!(outcome.index(), 3);
        assert_eq!(
            outcome.as_success().and_then(|e| e.payload().as_str()),
            Some("done")
        );
    }

    #[tokio::test]
    async fn error_is_captured_with_input_event() {
        let route = route_fn("fails", |_e: Event, _c| async move {
            Err(anyhow::anyhow!("downstream unavailable"))
        });
        let event = Event::new("in");
        let id = event.id();

        let outcome = RouteExecutor.oneshot(call_for(route, event)).await.unwrap();
        let failure = outcome.as_failure().unwrap();
        assert_eq!(failure.event.id(), id);
        assert!(matches!(failure.cause, RouteError::Failed(_)));
        assert!(failure.cause.to_string().contains("downstream unavailable"));
    }

    #[tokio::test]
    async fn execute_runs_pair_directly() {
        let route = route_fn("fails", |_e: Event, _c| async move { Err(anyhow::anyhow!("nope")) });
        let outcome =
            RouteExecutor::execute(0, RoutingPair::of(Event::new(1), route), CancellationToken::new())
                .await;
        assert_eq!(outcome.index(), 0);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn panic_is_captured() {
        let route = route_fn("panics", |_e: Event, _c| async move {
            if true {
                panic!("route exploded");
            }
            Ok(Event::new(0))
        });

        let outcome = RouteExecutor
            .oneshot(call_for(route, Event::new(1)))
            .await
            .unwrap();
        match &outcome.as_failure().unwrap().cause {
            RouteError::Panicked(msg) => assert_eq!(msg, "route exploded"),
            other => panic!("unexpected cause: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn error_after_cancellation_is_reported_as_cancelled() {
        let route = route_fn("cooperative", |e: Event, cancel: CancellationToken| async move {
            tokio::select! {
                () = cancel.cancelled() => Err(anyhow::anyhow!("stopped")),
                () = tokio::time::sleep(Duration::from_secs(10)) => Ok(e),
            }
        });
        let call = call_for(route, Event::new(1));
        let token = call.cancel.clone();

        let running = tokio::spawn(RouteExecutor.oneshot(call));
        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel();

        let outcome = running.await.unwrap().unwrap();
        assert!(matches!(
            outcome.as_failure().map(|f| &f.cause),
            Some(RouteError::Cancelled)
        ));
    }
}
