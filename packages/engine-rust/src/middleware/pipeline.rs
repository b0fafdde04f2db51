//! Pipeline composition: wraps the route executor with the middleware layers.

use tower::ServiceBuilder;

use super::deadline::{DeadlineLayer, DeadlineService};
use super::trace::{RouteTraceLayer, RouteTraceService};
use crate::config::AggregationPolicy;
use crate::executor::RouteExecutor;

/// Concrete service stack produced by [`build_route_pipeline`].
pub type RoutePipeline = RouteTraceService<DeadlineService<RouteExecutor>>;

/// Build the route pipeline for one invocation's policy.
///
/// Layer order (outermost to innermost):
/// 1. `RouteTraceLayer` -- span, counters, and duration, including timeouts
/// 2. `DeadlineLayer` -- enforce the route's deadline
/// 3. `RouteExecutor` -- run the route and capture its outcome
///
/// The pipeline is cheap to clone; each spawned route gets its own copy.
#[must_use]
pub fn build_route_pipeline(policy: &AggregationPolicy) -> RoutePipeline {
    ServiceBuilder::new()
        .layer(RouteTraceLayer)
        .layer(DeadlineLayer::from_policy(policy))
        .service(RouteExecutor)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
