//! Scatter Engine: fork-join routing with admission control and pluggable aggregation.
//!
//! ```no_run
//! use scatter_core::{route_fn, Event};
//! use scatter_engine::{AggregationPolicy, ForkJoinStrategy, RoutingPair};
//!
//! # async fn run() -> Result<(), scatter_engine::ForkJoinError> {
//! let strategy = ForkJoinStrategy::default();
//! let original = Event::new("order-42");
//! let pricing = route_fn("pricing", |e: Event, _cancel| async move { Ok(e.with_payload(10)) });
//! let stock = route_fn("stock", |e: Event, _cancel| async move { Ok(e.with_payload(3)) });
//!
//! let pairs = vec![
//!     RoutingPair::of(original.fork(), pricing),
//!     RoutingPair::of(original.fork(), stock),
//! ];
//! let policy = AggregationPolicy::default().with_delay_errors(true);
//! let joined = strategy.fork_join(original, pairs, &policy)?.await?;
//! assert_eq!(joined.payload().as_array().map(<[_]>::len), Some(2));
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod gate;
pub mod middleware;
pub mod outcome;
pub mod pair;
pub mod strategy;

pub use aggregator::{
    CollectList, FirstSuccess, JoinOnly, RequireAll, ResultAggregator, FAILURES_METADATA_KEY,
};
pub use config::{AggregationPolicy, EngineConfig, TimeoutScope};
pub use context::AggregationContext;
pub use error::{ErrorKind, ForkJoinError, RouteError};
pub use executor::{RouteCall, RouteExecutor};
pub use gate::{AdmissionError, AdmissionGate, AdmissionPermit, StateGate};
pub use outcome::{Failure, Outcome};
pub use pair::RoutingPair;
pub use strategy::{ForkJoinHandle, ForkJoinStrategy};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
