//! Policies that reduce an [`AggregationContext`] into one outbound event.
//!
//! Aggregators are strategy objects handed to
//! [`ForkJoinStrategy`](crate::ForkJoinStrategy); swapping one never touches
//! the orchestration.

use std::collections::BTreeMap;
use std::fmt;

use scatter_core::{Event, Value};

use crate::context::AggregationContext;
use crate::error::ForkJoinError;
use crate::outcome::Outcome;

/// Metadata key under which partial failures are attached to the aggregate.
///
/// The value maps the decimal route index to `{ "kind": …, "message": … }`.
pub const FAILURES_METADATA_KEY: &str = "routing.failures";

// ---------------------------------------------------------------------------
// ResultAggregator trait
// ---------------------------------------------------------------------------

/// Reduces the outcomes of one invocation into its result.
pub trait ResultAggregator: Send + Sync + fmt::Debug {
    /// Short policy name used in logs.
    fn name(&self) -> &'static str;

    /// Produces the aggregate event, or the failure the invocation completes with.
    ///
    /// # Errors
    ///
    /// Implementations decide which outcome sets are failures.
    fn aggregate(&self, context: AggregationContext) -> Result<Event, ForkJoinError>;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn failures_value(context: &AggregationContext) -> Option<Value> {
    let failures = context.failure_by_index();
    if failures.is_empty() {
        return None;
    }
    let entries = failures
        .into_iter()
        .map(|(index, cause)| {
            let mut entry = BTreeMap::new();
            entry.insert("kind".to_string(), Value::from(cause.kind().as_str()));
            entry.insert("message".to_string(), Value::from(cause.to_string()));
            (index.to_string(), Value::Map(entry))
        })
        .collect::<BTreeMap<_, _>>();
    Some(Value::Map(entries))
}

/// The first failure in index order as the invocation's error.
fn first_failure(outcomes: Vec<Outcome>) -> ForkJoinError {
    outcomes
        .into_iter()
        .find_map(|o| {
            let index = o.index();
            o.into_result()
                .err()
                .map(|f| ForkJoinError::route(index, f.event, f.cause))
        })
        .unwrap_or_else(|| ForkJoinError::Internal("no failure to propagate".to_string()))
}

/// Original event with every success's variables merged in index order.
fn merged_original(context: &AggregationContext) -> Event {
    let mut result = context.original_event().clone();
    for outcome in context.successes() {
        if let Some(event) = outcome.as_success() {
            result.merge_variables(event.variables());
        }
    }
    result
}

fn attach_failures(event: &mut Event, failures: Option<Value>) {
    if let Some(failures) = failures {
        event.attach_metadata(FAILURES_METADATA_KEY, failures);
    }
}

// ---------------------------------------------------------------------------
// Built-in policies
// ---------------------------------------------------------------------------

/// Default policy: collects success payloads into an array.
///
/// - No outcomes: the original event, unchanged.
/// - Every route failed: the first failure's cause.
/// - Otherwise: the original event with payload `[success payloads…]` in
///   index order, variables merged last-wins, and any failures attached under
///   [`FAILURES_METADATA_KEY`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectList;

impl ResultAggregator for CollectList {
    fn name(&self) -> &'static str {
        "collect-list"
    }

    fn aggregate(&self, context: AggregationContext) -> Result<Event, ForkJoinError> {
        if context.is_empty() {
            return Ok(context.into_parts().0);
        }
        if context.successes().is_empty() {
            return Err(first_failure(context.into_parts().1));
        }

        let payloads: Vec<Value> = context
            .successes()
            .iter()
            .filter_map(|o| o.as_success().map(|e| e.payload().clone()))
            .collect();
        let mut result = merged_original(&context).with_payload(payloads);
        attach_failures(&mut result, failures_value(&context));
        Ok(result)
    }
}

/// Join-only policy: keeps the original payload and merges route variables.
///
/// Same failure handling as [`CollectList`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinOnly;

impl ResultAggregator for JoinOnly {
    fn name(&self) -> &'static str {
        "join-only"
    }

    fn aggregate(&self, context: AggregationContext) -> Result<Event, ForkJoinError> {
        if context.is_empty() {
            return Ok(context.into_parts().0);
        }
        if context.successes().is_empty() {
            return Err(first_failure(context.into_parts().1));
        }

        let mut result = merged_original(&context);
        attach_failures(&mut result, failures_value(&context));
        Ok(result)
    }
}

/// Returns the lowest-index success as-is, with earlier and later failures
/// attached as metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstSuccess;

impl ResultAggregator for FirstSuccess {
    fn name(&self) -> &'static str {
        "first-success"
    }

    fn aggregate(&self, context: AggregationContext) -> Result<Event, ForkJoinError> {
        if context.is_empty() {
            return Ok(context.into_parts().0);
        }

        let failures = failures_value(&context);
        let (_original, outcomes) = context.into_parts();
        if !outcomes.iter().any(Outcome::is_success) {
            return Err(first_failure(outcomes));
        }

        let mut winner = outcomes
            .into_iter()
            .find_map(|o| o.into_result().ok())
            .ok_or_else(|| ForkJoinError::Internal("success vanished".to_string()))?;
        attach_failures(&mut winner, failures);
        Ok(winner)
    }
}

/// Fails with [`ForkJoinError::Composite`] if any route failed; otherwise
/// aggregates like [`CollectList`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireAll;

impl ResultAggregator for RequireAll {
    fn name(&self) -> &'static str {
        "require-all"
    }

    fn aggregate(&self, context: AggregationContext) -> Result<Event, ForkJoinError> {
        let failures: BTreeMap<_, _> = context
            .failure_by_index()
            .into_iter()
            .map(|(index, cause)| (index, cause.clone()))
            .collect();
        if failures.is_empty() {
            CollectList.aggregate(context)
        } else {
            Err(ForkJoinError::Composite { failures })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouteError;

    fn original() -> Event {
        Event::new("original").with_variable("before", "value")
    }

    fn ok(index: usize, payload: i64) -> Outcome {
        Outcome::success(index, original().fork().with_payload(payload))
    }

    fn failed(index: usize, msg: &'static str) -> Outcome {
        Outcome::failure(index, original().fork(), RouteError::failed(anyhow::anyhow!(msg)))
    }

    fn context(outcomes: Vec<Outcome>) -> AggregationContext {
        AggregationContext::new(original(), outcomes).unwrap()
    }

    fn payload_ints(event: &Event) -> Vec<i64> {
        event
            .payload()
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_int)
            .collect()
    }

    #[test]
    fn collect_list_trivial_join_returns_original() {
        let ctx = context(Vec::new());
        let id = ctx.original_event().id();
        let result = CollectList.aggregate(ctx).unwrap();
        assert_eq!(result.id(), id);
        assert_eq!(result.payload().as_str(), Some("original"));
        assert!(result.metadata(FAILURES_METADATA_KEY).is_none());
    }

    #[test]
    fn collect_list_preserves_index_order() {
        let result = CollectList
            .aggregate(context(vec![ok(0, 10), ok(1, 20), ok(2, 30)]))
            .unwrap();
        assert_eq!(payload_ints(&result), vec![10, 20, 30]);
        assert!(result.metadata(FAILURES_METADATA_KEY).is_none());
    }

    #[test]
    fn collect_list_attaches_partial_failures() {
        let result = CollectList
            .aggregate(context(vec![ok(0, 1), failed(1, "inventory down"), ok(2, 3)]))
            .unwrap();

        assert_eq!(payload_ints(&result), vec![1, 3]);
        let failures = result.metadata(FAILURES_METADATA_KEY).unwrap().as_map().unwrap();
        assert_eq!(failures.keys().collect::<Vec<_>>(), vec!["1"]);
        let entry = failures["1"].as_map().unwrap();
        assert_eq!(entry["kind"].as_str(), Some("ROUTING:ROUTE_FAILURE"));
        assert!(entry["message"].as_str().unwrap().contains("inventory down"));
    }

    #[test]
    fn collect_list_all_failed_propagates_first_cause() {
        let err = CollectList
            .aggregate(context(vec![failed(0, "first"), failed(1, "second")]))
            .unwrap_err();
        match err {
            ForkJoinError::Route { index, cause, .. } => {
                assert_eq!(index, 0);
                assert!(cause.to_string().contains("first"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn collect_list_merges_variables_last_wins() {
        let a = Outcome::success(0, original().fork().with_variable("foo", "bar").with_variable("shared", "a"));
        let b = Outcome::success(1, original().fork().with_variable("foo2", "bar2").with_variable("shared", "b"));

        let result = CollectList.aggregate(context(vec![a, b])).unwrap();
        let names: Vec<&str> = result.variables().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["before", "foo", "foo2", "shared"]);
        assert_eq!(result.variable("shared").and_then(Value::as_str), Some("b"));
    }

    #[test]
    fn join_only_keeps_original_payload() {
        let a = Outcome::success(0, original().fork().with_payload(1).with_variable("foo", "bar"));
        let result = JoinOnly.aggregate(context(vec![a, failed(1, "x")])).unwrap();

        assert_eq!(result.payload().as_str(), Some("original"));
        assert_eq!(result.variable("foo").and_then(Value::as_str), Some("bar"));
        assert!(result.metadata(FAILURES_METADATA_KEY).is_some());
    }

    #[test]
    fn first_success_picks_lowest_index_success() {
        let result = FirstSuccess
            .aggregate(context(vec![failed(0, "nope"), ok(1, 7), ok(2, 9)]))
            .unwrap();
        assert_eq!(result.payload().as_int(), Some(7));
        let failures = result.metadata(FAILURES_METADATA_KEY).unwrap().as_map().unwrap();
        assert!(failures.contains_key("0"));
    }

    #[test]
    fn first_success_all_failed() {
        let err = FirstSuccess
            .aggregate(context(vec![failed(0, "a"), failed(1, "b")]))
            .unwrap_err();
        assert_eq!(err.route_index(), Some(0));
    }

    #[test]
    fn require_all_reports_every_failure() {
        let err = RequireAll
            .aggregate(context(vec![failed(0, "a"), ok(1, 1), failed(2, "c")]))
            .unwrap_err();
        match err {
            ForkJoinError::Composite { failures } => {
                assert_eq!(failures.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn require_all_without_failures_collects() {
        let result = RequireAll.aggregate(context(vec![ok(0, 4), ok(1, 5)])).unwrap();
        assert_eq!(payload_ints(&result), vec![4, 5]);
    }
}
