//! Error taxonomy for fork-join invocations.
//!
//! [`RouteError`] is the per-route cause recorded inside an outcome;
//! [`ForkJoinError`] is what a whole invocation completes with.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use scatter_core::Event;
use serde::{Deserialize, Serialize};

/// Identifier naming the category of a failure (e.g. `ROUTING:TIMEOUT`).
///
/// Callers' error-handling layers match on kinds rather than on Rust types,
/// so the timeout kind is configurable per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorKind(Cow<'static, str>);

impl ErrorKind {
    /// Default kind for routes that miss their deadline.
    pub const ROUTING_TIMEOUT: Self = Self(Cow::Borrowed("ROUTING:TIMEOUT"));
    pub const INVALID_ARGUMENT: Self = Self(Cow::Borrowed("ROUTING:INVALID_ARGUMENT"));
    pub const ROUTE_FAILURE: Self = Self(Cow::Borrowed("ROUTING:ROUTE_FAILURE"));
    pub const ADMISSION_TIMEOUT: Self = Self(Cow::Borrowed("ROUTING:ADMISSION_TIMEOUT"));
    pub const ADMISSION_REJECTED: Self = Self(Cow::Borrowed("ROUTING:ADMISSION_REJECTED"));
    pub const CANCELLED: Self = Self(Cow::Borrowed("ROUTING:CANCELLED"));
    pub const COMPOSITE: Self = Self(Cow::Borrowed("ROUTING:COMPOSITE"));
    pub const INTERNAL: Self = Self(Cow::Borrowed("ROUTING:INTERNAL"));

    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(Cow::Owned(kind.into()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ErrorKind {
    fn default() -> Self {
        Self::ROUTING_TIMEOUT
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cause of a single route's failure, as recorded in its outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    /// The route itself returned an error.
    #[error("route failed: {0:#}")]
    Failed(Arc<anyhow::Error>),
    /// The route gave up after observing its cancellation token.
    #[error("route cancelled before completion")]
    Cancelled,
    /// The route panicked; the payload message is preserved when it is a string.
    #[error("route panicked: {0}")]
    Panicked(String),
    /// No admission permit was granted before the deadline.
    #[error("no admission permit granted before the deadline")]
    AdmissionTimeout,
    /// The strategy was shutting down when the route asked for admission.
    #[error("admission rejected: strategy is shutting down")]
    AdmissionRejected,
    /// The route was still running when its deadline passed.
    #[error("route did not complete within {timeout_ms}ms ({kind})")]
    Timeout { kind: ErrorKind, timeout_ms: u64 },
}

impl RouteError {
    /// Wraps an error returned by a route.
    #[must_use]
    pub fn failed(err: anyhow::Error) -> Self {
        Self::Failed(Arc::new(err))
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Failed(_) | Self::Panicked(_) => ErrorKind::ROUTE_FAILURE,
            Self::Cancelled => ErrorKind::CANCELLED,
            Self::AdmissionTimeout => ErrorKind::ADMISSION_TIMEOUT,
            Self::AdmissionRejected => ErrorKind::ADMISSION_REJECTED,
            Self::Timeout { kind, .. } => kind.clone(),
        }
    }

    /// The error a route returned, if this failure originated in the route.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether a deadline ended the route, either while it waited for
    /// admission or while it ran.
    #[must_use]
    pub fn missed_deadline(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::AdmissionTimeout)
    }
}

/// Terminal failure of one fork-join invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ForkJoinError {
    /// Rejected before any route ran.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A single route's failure surfaced as the invocation's failure.
    #[error("route {index} failed: {cause}")]
    Route {
        index: usize,
        /// The event the failing route was processing.
        event: Box<Event>,
        cause: RouteError,
    },
    /// Several routes failed and the aggregator required all of them to succeed.
    #[error("{} of the routes failed", .failures.len())]
    Composite { failures: BTreeMap<usize, RouteError> },
    /// The caller cancelled the invocation through its handle.
    #[error("fork-join cancelled by caller")]
    Cancelled,
    /// The orchestration task itself could not complete.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ForkJoinError {
    #[must_use]
    pub fn route(index: usize, event: Event, cause: RouteError) -> Self {
        Self::Route {
            index,
            event: Box::new(event),
            cause,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::INVALID_ARGUMENT,
            Self::Route { cause, .. } => cause.kind(),
            Self::Composite { .. } => ErrorKind::COMPOSITE,
            Self::Cancelled => ErrorKind::CANCELLED,
            Self::Internal(_) => ErrorKind::INTERNAL,
        }
    }

    /// Index of the failing route for single-route failures.
    #[must_use]
    pub fn route_index(&self) -> Option<usize> {
        match self {
            Self::Route { index, .. } => Some(*index),
            _ => None,
        }
    }
}
