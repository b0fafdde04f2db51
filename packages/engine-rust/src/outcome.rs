//! Terminal result of a single route execution.

use scatter_core::Event;

use crate::error::RouteError;

/// A captured failure together with the event that triggered it.
#[derive(Debug, Clone)]
pub struct Failure {
    pub event: Event,
    pub cause: RouteError,
}

/// Terminal result of one route execution.
///
/// `index` is the route's position in the submitted sequence, assigned at
/// submission time. Exactly one of success or failure is present.
#[derive(Debug, Clone)]
pub struct Outcome {
    index: usize,
    result: Result<Event, Failure>,
}

impl Outcome {
    #[must_use]
    pub fn success(index: usize, event: Event) -> Self {
        Self {
            index,
            result: Ok(event),
        }
    }

    #[must_use]
    pub fn failure(index: usize, event: Event, cause: RouteError) -> Self {
        Self {
            index,
            result: Err(Failure { event, cause }),
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The result event, if the route succeeded.
    #[must_use]
    pub fn as_success(&self) -> Option<&Event> {
        self.result.as_ref().ok()
    }

    #[must_use]
    pub fn as_failure(&self) -> Option<&Failure> {
        self.result.as_ref().err()
    }

    #[must_use]
    pub fn result(&self) -> Result<&Event, &Failure> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn into_result(self) -> Result<Event, Failure> {
        self.result
    }
}
