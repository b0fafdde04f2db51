//! Scatter Core: events, messages, values, and the `Route` contract.

pub mod event;
pub mod traits;
pub mod types;

pub use event::{Event, EventId};
pub use traits::{route_fn, DynRoute, FnRoute, Route};
pub use types::{Message, Value};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
