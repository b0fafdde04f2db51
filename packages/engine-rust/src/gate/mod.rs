//! Synchronization primitives guarding route execution.
//!
//! - [`state`]: boolean condition variable with wait-for-value semantics
//! - [`admission`]: bounded permit pool with deadline and shutdown handling

pub mod admission;
pub mod state;

pub use admission::{AdmissionError, AdmissionGate, AdmissionPermit};
pub use state::StateGate;
