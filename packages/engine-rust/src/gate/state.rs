//! Boolean condition variable with wait-for-value semantics.
//!
//! Backed by a `tokio::sync::watch` channel: writers go through the single
//! sender, so every waiter sees transitions in the order they were made and
//! never observes a value older than the last acknowledged write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Shared boolean flag that tasks can wait on.
///
/// Clones share the same flag. Used for shutdown signaling and for
/// admission saturation ("a slot became free").
#[derive(Debug, Clone)]
pub struct StateGate {
    state: Arc<watch::Sender<bool>>,
}

impl StateGate {
    #[must_use]
    pub fn new(initial: bool) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            state: Arc::new(tx),
        }
    }

    #[must_use]
    pub fn get(&self) -> bool {
        *self.state.borrow()
    }

    /// Stores `value` and wakes waiters if it changed. Returns the previous value.
    pub fn set(&self, value: bool) -> bool {
        let mut previous = value;
        self.state.send_if_modified(|current| {
            previous = *current;
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        previous
    }

    /// Stores the value `compute` returns, evaluated under the write lock.
    ///
    /// Concurrent refreshes are serialized, so the last one to run reads the
    /// freshest source state. Returns the stored value.
    pub fn refresh(&self, compute: impl FnOnce() -> bool) -> bool {
        let mut stored = false;
        self.state.send_if_modified(|current| {
            let value = compute();
            stored = value;
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        stored
    }

    /// Atomically replaces `expected` with `new`. Returns whether the swap happened.
    pub fn compare_and_set(&self, expected: bool, new: bool) -> bool {
        let mut swapped = false;
        self.state.send_if_modified(|current| {
            if *current != expected {
                return false;
            }
            swapped = true;
            if *current == new {
                false
            } else {
                *current = new;
                true
            }
        });
        swapped
    }

    /// Waits until the flag equals `target`.
    ///
    /// Returns immediately if it already does. With `timeout = None` the wait
    /// is unbounded. Returns `false` if the timeout elapsed first.
    pub async fn await_value(&self, target: bool, timeout: Option<Duration>) -> bool {
        let mut rx = self.state.subscribe();
        let wait = async move { rx.wait_for(|value| *value == target).await.is_ok() };
        match timeout {
            None => wait.await,
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or(false),
        }
    }
}

impl Default for StateGate {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn set_returns_previous_value() {
        let gate = StateGate::new(false);
        assert!(!gate.set(true));
        assert!(gate.set(true));
        assert!(gate.get());
    }

    #[test]
    fn compare_and_set_only_swaps_on_match() {
        let gate = StateGate::new(false);
        assert!(!gate.compare_and_set(true, false));
        assert!(!gate.get());

        assert!(gate.compare_and_set(false, true));
        assert!(gate.get());
    }

    #[test]
    fn refresh_stores_computed_value() {
        let gate = StateGate::new(true);
        let free = 3;
        assert!(!gate.refresh(|| free == 0));
        assert!(!gate.get());
        assert!(gate.refresh(|| true));
        assert!(gate.get());
    }

    #[test]
    fn clones_share_state() {
        let gate = StateGate::default();
        let other = gate.clone();
        other.set(true);
        assert!(gate.get());
    }

    #[tokio::test]
    async fn await_returns_immediately_when_already_set() {
        let gate = StateGate::new(true);
        assert!(gate.await_value(true, Some(Duration::ZERO)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn await_times_out_without_transition() {
        let gate = StateGate::new(false);
        let start = tokio::time::Instant::now();
        assert!(!gate.await_value(true, Some(Duration::from_millis(30))).await);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_wake_on_transition() {
        let gate = StateGate::new(false);
        let woken = Arc::new(AtomicU32::new(0));

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let gate = gate.clone();
            let woken = Arc::clone(&woken);
            waiters.push(tokio::spawn(async move {
                if gate.await_value(true, None).await {
                    woken.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(woken.load(Ordering::SeqCst), 0);

        gate.set(true);
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn await_false_after_reset() {
        let gate = StateGate::new(true);
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.await_value(false, Some(Duration::from_secs(1))).await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        gate.set(false);
        assert!(waiter.await.unwrap());
    }
}
