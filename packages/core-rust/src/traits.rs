use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::event::Event;

/// Opaque event-processing step supplied by the caller.
///
/// Routes are stateless from the engine's point of view and shared as
/// `Arc<dyn Route>`; identity is pointer identity, a route is never cloned.
///
/// # Cancellation contract
///
/// `cancel` fires when the invocation that scheduled this route no longer
/// needs its result (a sibling failed fast, the deadline passed, or the
/// caller cancelled). Implementations are expected to observe it at their
/// own suspension points and return promptly; the engine never preempts a
/// route that ignores it.
#[async_trait]
pub trait Route: Send + Sync {
    /// Human-readable name used in logs and spans.
    fn name(&self) -> &str {
        "route"
    }

    /// Process one event, returning the resulting event or the failure.
    async fn process(&self, event: Event, cancel: &CancellationToken) -> anyhow::Result<Event>;
}

/// Shared handle to a route.
pub type DynRoute = Arc<dyn Route>;

/// Route backed by an async closure. Built with [`route_fn`].
pub struct FnRoute<F> {
    name: String,
    f: F,
}

impl<F> fmt::Debug for FnRoute<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRoute").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Route for FnRoute<F>
where
    F: Fn(Event, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Event>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, event: Event, cancel: &CancellationToken) -> anyhow::Result<Event> {
        (self.f)(event, cancel.clone()).await
    }
}

/// Wraps an async closure as a shareable [`Route`].
///
/// ```
/// use scatter_core::{route_fn, Event};
///
/// let upper = route_fn("upper", |event: Event, _cancel| async move {
///     let text = event.payload().as_str().unwrap_or_default().to_uppercase();
///     Ok(event.with_payload(text))
/// });
/// assert_eq!(upper.name(), "upper");
/// ```
pub fn route_fn<F, Fut>(name: impl Into<String>, f: F) -> DynRoute
where
    F: Fn(Event, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Event>> + Send + 'static,
{
    Arc::new(FnRoute {
        name: name.into(),
        f,
    })
}
