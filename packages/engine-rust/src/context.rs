//! Route-index-ordered collection of outcomes for one fork-join invocation.

use std::collections::BTreeMap;

use scatter_core::Event;

use crate::error::{ForkJoinError, RouteError};
use crate::outcome::Outcome;

/// Immutable, index-ordered outcomes plus the original event.
///
/// `outcomes()[i].index() == i` for every `i`. Derived views are recomputed
/// on each call.
#[derive(Debug, Clone)]
pub struct AggregationContext {
    original: Event,
    outcomes: Vec<Outcome>,
}

impl AggregationContext {
    /// Builds a context, ordering `outcomes` by route index.
    ///
    /// # Errors
    ///
    /// Returns `ForkJoinError::InvalidArgument` unless the indices are exactly
    /// `0..outcomes.len()`.
    pub fn new(original: Event, mut outcomes: Vec<Outcome>) -> Result<Self, ForkJoinError> {
        outcomes.sort_by_key(Outcome::index);
        if let Some((position, outcome)) = outcomes
            .iter()
            .enumerate()
            .find(|(position, outcome)| outcome.index() != *position)
        {
            return Err(ForkJoinError::InvalidArgument(format!(
                "outcome indices must be contiguous from 0: found {} at position {position}",
                outcome.index()
            )));
        }
        Ok(Self { original, outcomes })
    }

    #[must_use]
    pub fn original_event(&self) -> &Event {
        &self.original
    }

    #[must_use]
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Successful outcomes in index order.
    #[must_use]
    pub fn successes(&self) -> Vec<&Outcome> {
        self.outcomes.iter().filter(|o| o.is_success()).collect()
    }

    /// Failed outcomes in index order.
    #[must_use]
    pub fn failures(&self) -> Vec<&Outcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }

    /// Route index to failure cause, ascending.
    #[must_use]
    pub fn failure_by_index(&self) -> BTreeMap<usize, &RouteError> {
        self.outcomes
            .iter()
            .filter_map(|o| o.as_failure().map(|f| (o.index(), &f.cause)))
            .collect()
    }

    #[must_use]
    pub fn into_parts(self) -> (Event, Vec<Outcome>) {
        (self.original, self.outcomes)
    }
}

/// Write-once-per-index outcome storage filled while an invocation runs.
///
/// Slots are reserved in submission order; each is written at most once.
#[derive(Debug, Default)]
pub(crate) struct OutcomeSlots {
    slots: Vec<Option<Outcome>>,
}

impl OutcomeSlots {
    /// Reserves the slot for the next submitted route and returns its index.
    pub(crate) fn reserve(&mut self) -> usize {
        self.slots.push(None);
        self.slots.len() - 1
    }

    /// Stores `outcome` if its slot is reserved and still empty.
    pub(crate) fn record(&mut self, outcome: Outcome) -> bool {
        match self.slots.get_mut(outcome.index()) {
            Some(slot @ None) => {
                *slot = Some(outcome);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn failed(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|o| !o.is_success())
            .count()
    }

    /// Lowest-index failure recorded so far.
    pub(crate) fn first_failure(&self) -> Option<&Outcome> {
        self.slots.iter().flatten().find(|o| !o.is_success())
    }

    /// Converts into a context once every reserved slot is filled.
    pub(crate) fn into_context(self, original: Event) -> Result<AggregationContext, ForkJoinError> {
        let mut outcomes = Vec::with_capacity(self.slots.len());
        for (index, slot) in self.slots.into_iter().enumerate() {
            match slot {
                Some(outcome) => outcomes.push(outcome),
                None => {
                    return Err(ForkJoinError::Internal(format!(
                        "route {index} finished without an outcome"
                    )))
                }
            }
        }
        Ok(AggregationContext { original, outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(index: usize, payload: i64) -> Outcome {
        Outcome::success(index, Event::new(payload))
    }

    fn failed(index: usize, msg: &str) -> Outcome {
        Outcome::failure(index, Event::new(0), RouteError::failed(anyhow::anyhow!(msg.to_string())))
    }

    #[test]
    fn new_orders_by_index() {
        let ctx = AggregationContext::new(Event::new(0), vec![ok(2, 20), failed(0, "a"), ok(1, 10)])
            .unwrap();
        let indices: Vec<usize> = ctx.outcomes().iter().map(Outcome::index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn new_rejects_gaps() {
        let err = AggregationContext::new(Event::new(0), vec![ok(0, 1), ok(2, 2)]).unwrap_err();
        assert!(matches!(err, ForkJoinError::InvalidArgument(_)));
    }

    #[test]
    fn derived_views_split_by_result() {
        let ctx = AggregationContext::new(
            Event::new(0),
            vec![ok(0, 1), failed(1, "down"), ok(2, 3), failed(3, "slow")],
        )
        .unwrap();

        let successes: Vec<usize> = ctx.successes().iter().map(|o| o.index()).collect();
        let failures: Vec<usize> = ctx.failures().iter().map(|o| o.index()).collect();
        assert_eq!(successes, vec![0, 2]);
        assert_eq!(failures, vec![1, 3]);

        let by_index = ctx.failure_by_index();
        assert_eq!(by_index.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert!(by_index[&1].to_string().contains("down"));
    }

    #[test]
    fn empty_context_has_no_views() {
        let ctx = AggregationContext::new(Event::new(0), Vec::new()).unwrap();
        assert!(ctx.is_empty());
        assert!(ctx.successes().is_empty());
        assert!(ctx.failure_by_index().is_empty());
    }

    #[test]
    fn slots_are_write_once() {
        let mut slots = OutcomeSlots::default();
        assert_eq!(slots.reserve(), 0);
        assert_eq!(slots.reserve(), 1);

        assert!(slots.record(ok(1, 10)));
        assert!(!slots.record(ok(1, 99)));
        assert!(!slots.record(ok(5, 0)));
        assert!(slots.record(failed(0, "x")));
        assert_eq!(slots.failed(), 1);

        let ctx = slots.into_context(Event::new(0)).unwrap();
        assert_eq!(ctx.outcomes()[1].as_success().and_then(|e| e.payload().as_int()), Some(10));
    }

    #[test]
    fn first_failure_is_lowest_index_not_first_recorded() {
        let mut slots = OutcomeSlots::default();
        for _ in 0..3 {
            slots.reserve();
        }
        assert!(slots.first_failure().is_none());

        slots.record(failed(2, "late"));
        slots.record(ok(1, 1));
        slots.record(failed(0, "early"));
        assert_eq!(slots.first_failure().map(Outcome::index), Some(0));
    }

    #[test]
    fn unfilled_slot_is_an_internal_error() {
        let mut slots = OutcomeSlots::default();
        slots.reserve();
        assert_eq!(slots.len(), 1);
        assert!(matches!(
            slots.into_context(Event::new(0)),
            Err(ForkJoinError::Internal(_))
        ));
    }
}
