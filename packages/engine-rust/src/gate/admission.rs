//! Bounded-concurrency admission control for route execution.
//!
//! Unlike load shedding, a saturated gate makes the submitter wait: an
//! acquisition blocks until a permit frees up, the deadline passes, or the
//! owning strategy shuts down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use super::state::StateGate;
use crate::error::RouteError;

/// Why an admission attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("no permit became available before the deadline")]
    Timeout,
    #[error("admission gate is shut down")]
    Rejected,
}

impl From<AdmissionError> for RouteError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Timeout => Self::AdmissionTimeout,
            AdmissionError::Rejected => Self::AdmissionRejected,
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionGate
// ---------------------------------------------------------------------------

/// Permit pool limiting how many routes are in flight at once.
///
/// `shutdown` is shared with the owning strategy; once it reads `true`,
/// pending and future acquisitions fail with [`AdmissionError::Rejected`].
/// `saturated` reads `true` while every permit is taken. It is recomputed from
/// the permit count on every acquire and release, never written blindly.
#[derive(Debug)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
    shutdown: StateGate,
    saturated: StateGate,
}

impl AdmissionGate {
    /// Creates a gate with `limit` permits. A zero limit is raised to one.
    #[must_use]
    pub fn new(limit: usize, shutdown: StateGate) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            shutdown,
            saturated: StateGate::new(false),
        }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.limit - self.available()
    }

    /// Whether every permit is currently taken.
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.saturated.get()
    }

    /// Waits for a permit.
    ///
    /// `deadline = None` waits without a time bound (shutdown still ends the wait).
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError::Timeout` once `deadline` has passed, and
    /// `AdmissionError::Rejected` if the gate is shut down.
    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<AdmissionPermit, AdmissionError> {
        if self.shutdown.get() {
            return Err(AdmissionError::Rejected);
        }
        if deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(AdmissionError::Timeout);
        }

        let expired = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let permit = tokio::select! {
            biased;
            _ = self.shutdown.await_value(true, None) => return Err(AdmissionError::Rejected),
            () = expired => {
                debug!(limit = self.limit, "admission wait reached the deadline");
                return Err(AdmissionError::Timeout);
            }
            acquired = Arc::clone(&self.semaphore).acquire_owned() => {
                acquired.map_err(|_closed| AdmissionError::Rejected)?
            }
        };

        if refresh_saturation(&self.semaphore, &self.saturated) {
            debug!(limit = self.limit, "admission gate saturated");
        }

        Ok(AdmissionPermit {
            permit: Some(permit),
            semaphore: Arc::clone(&self.semaphore),
            saturated: self.saturated.clone(),
        })
    }

    /// Waits until at least one permit is free, up to `timeout`.
    ///
    /// For callers that want to hold work back instead of queueing on
    /// [`acquire`](Self::acquire). Returns `false` if the gate was still
    /// saturated when the timeout elapsed.
    pub async fn wait_for_capacity(&self, timeout: Option<Duration>) -> bool {
        self.saturated.await_value(false, timeout).await
    }
}

fn refresh_saturation(semaphore: &Semaphore, saturated: &StateGate) -> bool {
    saturated.refresh(|| semaphore.available_permits() == 0)
}

// ---------------------------------------------------------------------------
// AdmissionPermit
// ---------------------------------------------------------------------------

/// RAII permit returned by [`AdmissionGate::acquire`].
///
/// The permit goes back to the pool exactly once: on [`release`](Self::release)
/// or when dropped, including while unwinding.
#[derive(Debug)]
pub struct AdmissionPermit {
    permit: Option<OwnedSemaphorePermit>,
    semaphore: Arc<Semaphore>,
    saturated: StateGate,
}

impl AdmissionPermit {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            refresh_saturation(&self.semaphore, &self.saturated);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
