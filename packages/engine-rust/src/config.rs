//! Per-invocation aggregation policy and the serde-facing engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ForkJoinError};

/// What a configured timeout bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutScope {
    /// One deadline shared by the whole invocation, started when it begins.
    /// Admission waits and route execution both stop at that deadline.
    #[default]
    Invocation,
    /// Each route gets the full timeout from the moment it is admitted.
    /// Admission waits are bounded only by shutdown.
    PerRoute,
}

/// Policy for one fork-join invocation. Immutable for the lifetime of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationPolicy {
    /// Maximum routes in flight at once. `None` means unlimited (no gate).
    pub max_concurrency: Option<usize>,
    /// `false`: the first failure fails the whole call.
    /// `true`: every route reaches a terminal outcome before aggregation.
    pub delay_errors: bool,
    /// `None` means no deadline timer.
    pub timeout: Option<Duration>,
    /// Kind recorded on routes that miss the deadline.
    pub timeout_error_kind: ErrorKind,
    pub timeout_scope: TimeoutScope,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            delay_errors: false,
            timeout: None,
            timeout_error_kind: ErrorKind::ROUTING_TIMEOUT,
            timeout_scope: TimeoutScope::Invocation,
        }
    }
}

impl AggregationPolicy {
    /// Strictly sequential execution: at most one route in flight.
    #[must_use]
    pub fn sequential() -> Self {
        Self::default().with_max_concurrency(1)
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    #[must_use]
    pub fn unlimited(mut self) -> Self {
        self.max_concurrency = None;
        self
    }

    #[must_use]
    pub fn with_delay_errors(mut self, delay_errors: bool) -> Self {
        self.delay_errors = delay_errors;
        self
    }

    /// Sets the timeout. A zero duration clears it.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    #[must_use]
    pub fn with_timeout_error_kind(mut self, kind: ErrorKind) -> Self {
        self.timeout_error_kind = kind;
        self
    }

    #[must_use]
    pub fn with_timeout_scope(mut self, scope: TimeoutScope) -> Self {
        self.timeout_scope = scope;
        self
    }

    /// Checks the policy before any route runs.
    ///
    /// # Errors
    ///
    /// Returns `ForkJoinError::InvalidArgument` for a zero concurrency limit
    /// or a blank timeout error kind.
    pub fn validate(&self) -> Result<(), ForkJoinError> {
        if self.max_concurrency == Some(0) {
            return Err(ForkJoinError::InvalidArgument(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout_error_kind.as_str().trim().is_empty() {
            return Err(ForkJoinError::InvalidArgument(
                "timeout_error_kind must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// The timeout that arms a timer: `None` when unset or zero.
    #[must_use]
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }

    /// Timeout in whole milliseconds, saturating at `u64::MAX`.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.effective_timeout()
            .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Engine configuration as loaded from a config file or service descriptor.
///
/// Every field has a default, so partial documents deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum routes in flight per invocation. Absent means unlimited.
    pub max_concurrency: Option<usize>,
    pub delay_errors: bool,
    /// Timeout in milliseconds. 0 disables the deadline timer.
    pub timeout_ms: u64,
    pub timeout_error_kind: ErrorKind,
    pub timeout_scope: TimeoutScope,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            delay_errors: false,
            timeout_ms: 0,
            timeout_error_kind: ErrorKind::ROUTING_TIMEOUT,
            timeout_scope: TimeoutScope::Invocation,
        }
    }
}

impl EngineConfig {
    /// Converts the configuration into a validated policy.
    ///
    /// # Errors
    ///
    /// Returns `ForkJoinError::InvalidArgument` if the resulting policy is invalid.
    pub fn policy(&self) -> Result<AggregationPolicy, ForkJoinError> {
        let policy = AggregationPolicy {
            max_concurrency: self.max_concurrency,
            delay_errors: self.delay_errors,
            timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            timeout_error_kind: self.timeout_error_kind.clone(),
            timeout_scope: self.timeout_scope,
        };
        policy.validate()?;
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults() {
        let policy = AggregationPolicy::default();
        assert_eq!(policy.max_concurrency, None);
        assert!(!policy.delay_errors);
        assert_eq!(policy.timeout, None);
        assert_eq!(policy.timeout_error_kind, ErrorKind::ROUTING_TIMEOUT);
        assert_eq!(policy.timeout_scope, TimeoutScope::Invocation);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn zero_timeout_clears_timer() {
        let policy = AggregationPolicy::default()
            .with_timeout(Duration::from_millis(50))
            .with_timeout(Duration::ZERO);
        assert_eq!(policy.timeout, None);
        assert_eq!(policy.timeout_ms(), 0);
    }

    #[test]
    fn zero_timeout_set_directly_arms_no_timer() {
        let policy = AggregationPolicy {
            timeout: Some(Duration::ZERO),
            ..AggregationPolicy::default()
        };
        assert!(policy.validate().is_ok());
        assert_eq!(policy.effective_timeout(), None);
        assert_eq!(policy.timeout_ms(), 0);
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let err = AggregationPolicy::default()
            .with_max_concurrency(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ForkJoinError::InvalidArgument(_)));
    }

    #[test]
    fn blank_error_kind_is_invalid() {
        let err = AggregationPolicy::default()
            .with_timeout_error_kind(ErrorKind::new("  "))
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::INVALID_ARGUMENT);
    }

    #[test]
    fn sequential_limits_to_one() {
        assert_eq!(AggregationPolicy::sequential().max_concurrency, Some(1));
        assert_eq!(AggregationPolicy::sequential().unlimited().max_concurrency, None);
    }

    #[test]
    fn engine_config_partial_document() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "max_concurrency": 4, "timeout_ms": 250, "timeout_scope": "per_route" }"#,
        )
        .unwrap();

        assert_eq!(config.max_concurrency, Some(4));
        assert!(!config.delay_errors);
        assert_eq!(config.timeout_error_kind, ErrorKind::ROUTING_TIMEOUT);

        let policy = config.policy().unwrap();
        assert_eq!(policy.timeout, Some(Duration::from_millis(250)));
        assert_eq!(policy.timeout_scope, TimeoutScope::PerRoute);
    }

    #[test]
    fn engine_config_zero_timeout_means_no_timer() {
        let policy = EngineConfig::default().policy().unwrap();
        assert_eq!(policy, AggregationPolicy::default());
    }

    #[test]
    fn engine_config_rejects_zero_concurrency() {
        let config = EngineConfig {
            max_concurrency: Some(0),
            ..EngineConfig::default()
        };
        assert!(config.policy().is_err());
    }
}
