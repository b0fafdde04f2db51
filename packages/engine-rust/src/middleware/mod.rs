//! Tower middleware layers for the route pipeline.
//!
//! - [`deadline`]: Deadline enforcement with cooperative cancellation
//! - [`trace`]: Per-route spans, counters, and duration histograms
//! - [`pipeline`]: Composes the layers around [`RouteExecutor`](crate::executor::RouteExecutor)

pub mod deadline;
pub mod pipeline;
pub mod trace;

pub use deadline::DeadlineLayer;
pub use pipeline::{build_route_pipeline, RoutePipeline};
pub use trace::RouteTraceLayer;
