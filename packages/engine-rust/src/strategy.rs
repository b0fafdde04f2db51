//! Fork-join orchestration.
//!
//! [`ForkJoinStrategy::fork_join`] consumes the routing pairs left to right,
//! assigns each its index at submission, admits it through an
//! [`AdmissionGate`], runs it on its own task through the route pipeline and
//! hands the index-ordered outcomes to a [`ResultAggregator`].
//!
//! Only the orchestration task records outcomes and releases permits. A
//! finished route hands its permit back together with its outcome, so a
//! fail-fast short-circuit is always observed before a sibling can be
//! admitted into the freed slot.
//!
//! Under an invocation deadline every admitted route and every admission
//! wait expires at the same instant. Once one of them reports the miss, the
//! orchestrator collects all in-flight routes before failing, so fail-fast
//! reports the lowest-index failure regardless of which timer fired first.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use scatter_core::Event;
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::aggregator::{CollectList, ResultAggregator};
use crate::config::{AggregationPolicy, EngineConfig, TimeoutScope};
use crate::context::{AggregationContext, OutcomeSlots};
use crate::error::ForkJoinError;
use crate::executor::RouteCall;
use crate::gate::{AdmissionError, AdmissionGate, AdmissionPermit, StateGate};
use crate::middleware::build_route_pipeline;
use crate::outcome::Outcome;
use crate::pair::RoutingPair;

// ---------------------------------------------------------------------------
// ForkJoinStrategy
// ---------------------------------------------------------------------------

/// Fans one event out to many routes and joins their results.
///
/// A strategy holds no per-invocation state: each call builds its own
/// admission gate, outcome slots, and cancellation token. The only state
/// shared across calls is the aggregator, the default policy, and the
/// shutdown flag.
pub struct ForkJoinStrategy {
    aggregator: Arc<dyn ResultAggregator>,
    default_policy: ArcSwap<AggregationPolicy>,
    shutdown: StateGate,
}

impl ForkJoinStrategy {
    #[must_use]
    pub fn new(aggregator: Arc<dyn ResultAggregator>) -> Self {
        Self {
            aggregator,
            default_policy: ArcSwap::from_pointee(AggregationPolicy::default()),
            shutdown: StateGate::new(false),
        }
    }

    #[must_use]
    pub fn with_aggregator<A: ResultAggregator + 'static>(aggregator: A) -> Self {
        Self::new(Arc::new(aggregator))
    }

    /// Builds a `CollectList` strategy whose default policy comes from `config`.
    ///
    /// # Errors
    ///
    /// Returns `ForkJoinError::InvalidArgument` if the configured policy is invalid.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ForkJoinError> {
        let strategy = Self::default();
        strategy.set_default_policy(config.policy()?)?;
        Ok(strategy)
    }

    #[must_use]
    pub fn aggregator(&self) -> &Arc<dyn ResultAggregator> {
        &self.aggregator
    }

    /// Snapshot of the policy used by [`fork_join_default`](Self::fork_join_default).
    #[must_use]
    pub fn default_policy(&self) -> Arc<AggregationPolicy> {
        self.default_policy.load_full()
    }

    /// Replaces the default policy. Invocations already running keep theirs.
    ///
    /// # Errors
    ///
    /// Returns `ForkJoinError::InvalidArgument` and keeps the previous policy
    /// if `policy` is invalid.
    pub fn set_default_policy(&self, policy: AggregationPolicy) -> Result<(), ForkJoinError> {
        policy.validate()?;
        self.default_policy.store(Arc::new(policy));
        Ok(())
    }

    /// Stops admitting routes. Pending and future admissions fail with
    /// `AdmissionRejected`; routes already running are unaffected.
    pub fn shutdown(&self) {
        if !self.shutdown.set(true) {
            info!(aggregator = self.aggregator.name(), "fork-join strategy shutting down");
        }
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.get()
    }

    /// Starts a fork-join invocation and returns a handle to its result.
    ///
    /// `pairs` is consumed exactly once, left to right, on the orchestration
    /// task; the position of each pair is its route index.
    ///
    /// # Errors
    ///
    /// Returns `ForkJoinError::InvalidArgument` for an invalid policy and
    /// `ForkJoinError::Internal` when called outside a tokio runtime. In both
    /// cases no route runs.
    pub fn fork_join<I>(
        &self,
        original: Event,
        pairs: I,
        policy: &AggregationPolicy,
    ) -> Result<ForkJoinHandle, ForkJoinError>
    where
        I: IntoIterator<Item = RoutingPair>,
        I::IntoIter: Send + 'static,
    {
        policy.validate()?;
        let runtime = Handle::try_current()
            .map_err(|err| ForkJoinError::Internal(format!("no tokio runtime: {err}")))?;

        let cancel = CancellationToken::new();
        let span = info_span!(
            "fork_join",
            correlation_id = original.correlation_id(),
            aggregator = self.aggregator.name(),
            delay_errors = policy.delay_errors,
            max_concurrency = ?policy.max_concurrency,
            timeout_ms = policy.timeout_ms(),
        );

        let invocation = Invocation {
            original,
            pairs: Box::new(pairs.into_iter()),
            policy: policy.clone(),
            aggregator: Arc::clone(&self.aggregator),
            shutdown: self.shutdown.clone(),
            cancel: cancel.clone(),
        };
        let join = runtime.spawn(invocation.run().instrument(span));

        Ok(ForkJoinHandle { join, cancel })
    }

    /// [`fork_join`](Self::fork_join) with the current default policy.
    ///
    /// # Errors
    ///
    /// Same as [`fork_join`](Self::fork_join).
    pub fn fork_join_default<I>(
        &self,
        original: Event,
        pairs: I,
    ) -> Result<ForkJoinHandle, ForkJoinError>
    where
        I: IntoIterator<Item = RoutingPair>,
        I::IntoIter: Send + 'static,
    {
        let policy = self.default_policy();
        self.fork_join(original, pairs, &policy)
    }
}

impl Default for ForkJoinStrategy {
    fn default() -> Self {
        Self::with_aggregator(CollectList)
    }
}

impl fmt::Debug for ForkJoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkJoinStrategy")
            .field("aggregator", &self.aggregator.name())
            .field("default_policy", &self.default_policy.load_full())
            .field("shutdown", &self.shutdown.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ForkJoinHandle
// ---------------------------------------------------------------------------

/// Handle to a running invocation. Resolves exactly once.
///
/// Dropping the handle does not stop the invocation; call
/// [`cancel`](Self::cancel) for that.
#[derive(Debug)]
pub struct ForkJoinHandle {
    join: JoinHandle<Result<Event, ForkJoinError>>,
    cancel: CancellationToken,
}

impl ForkJoinHandle {
    /// Cancels the invocation. It resolves with `ForkJoinError::Cancelled`
    /// unless it already finished; running routes see their tokens fire.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Future for ForkJoinHandle {
    type Output = Result<Event, ForkJoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.join).poll(cx).map(|joined| {
            joined.unwrap_or_else(|err| {
                Err(ForkJoinError::Internal(format!("orchestration task failed: {err}")))
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

type Settled = (Outcome, Option<AdmissionPermit>);

struct Invocation {
    original: Event,
    pairs: Box<dyn Iterator<Item = RoutingPair> + Send>,
    policy: AggregationPolicy,
    aggregator: Arc<dyn ResultAggregator>,
    shutdown: StateGate,
    cancel: CancellationToken,
}

impl Invocation {
    async fn run(self) -> Result<Event, ForkJoinError> {
        let Self {
            original,
            pairs,
            policy,
            aggregator,
            shutdown,
            cancel,
        } = self;

        let started = Instant::now();
        let deadline = match policy.timeout_scope {
            TimeoutScope::Invocation => policy.effective_timeout().map(|t| started + t),
            TimeoutScope::PerRoute => None,
        };
        let gate = policy
            .max_concurrency
            .map(|limit| AdmissionGate::new(limit, shutdown.clone()));
        let pipeline = build_route_pipeline(&policy);
        let mut progress = Progress::new(cancel.clone(), policy.delay_errors, deadline.is_some());

        for pair in pairs {
            if cancel.is_cancelled() {
                return Err(progress.cancelled());
            }
            progress.drain_ready().await?;

            let index = progress.slots.reserve();
            let admitted = match &gate {
                Some(gate) => progress.admit(gate, deadline).await?,
                None if shutdown.get() => Err(AdmissionError::Rejected),
                None if deadline.is_some_and(|d| d <= Instant::now()) => Err(AdmissionError::Timeout),
                None => Ok(None),
            };

            match admitted {
                Ok(permit) => {
                    let call = RouteCall::new(index, pair, cancel.child_token())
                        .with_deadline(deadline);
                    let route = pipeline.clone();
                    progress.in_flight.spawn(
                        async move {
                            let outcome = match route.oneshot(call).await {
                                Ok(outcome) => outcome,
                                Err(never) => match never {},
                            };
                            (outcome, permit)
                        }
                        .in_current_span(),
                    );
                }
                Err(err) => {
                    debug!(index, error = %err, "route not admitted");
                    let (event, _route) = pair.into_parts();
                    progress.record(Outcome::failure(index, event, err.into()))?;
                    progress.settle_expired().await?;
                }
            }
        }

        progress.wait_all().await?;

        let routes = progress.slots.len();
        let failures = progress.slots.failed();
        let context = progress.into_context(original)?;
        let result = aggregator.aggregate(context);

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            routes,
            failures,
            elapsed_ms,
            aggregated = result.is_ok(),
            "fork-join complete"
        );
        result
    }
}

/// Mutable state of one running invocation, owned by its orchestration task.
struct Progress {
    slots: OutcomeSlots,
    in_flight: JoinSet<Settled>,
    cancel: CancellationToken,
    delay_errors: bool,
    /// Every route shares one invocation deadline.
    shared_deadline: bool,
    /// The shared deadline has been reported by at least one route.
    expired: bool,
}

impl Progress {
    fn new(cancel: CancellationToken, delay_errors: bool, shared_deadline: bool) -> Self {
        Self {
            slots: OutcomeSlots::default(),
            in_flight: JoinSet::new(),
            cancel,
            delay_errors,
            shared_deadline,
            expired: false,
        }
    }

    /// Waits for a permit while settling routes that finish in the meantime.
    ///
    /// The outer error ends the invocation; the inner one becomes the route's outcome.
    async fn admit(
        &mut self,
        gate: &AdmissionGate,
        deadline: Option<Instant>,
    ) -> Result<Result<Option<AdmissionPermit>, AdmissionError>, ForkJoinError> {
        if gate.is_saturated() {
            debug!(
                limit = gate.limit(),
                in_flight = gate.in_flight(),
                "admission gate saturated, waiting for a permit"
            );
        }
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(self.cancelled()),
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.settle(joined)?;
                    self.settle_expired().await?;
                }
                admitted = gate.acquire(deadline) => return Ok(admitted.map(Some)),
            }
        }
    }

    /// Barrier: every admitted route reaches a terminal outcome.
    async fn wait_all(&mut self) -> Result<(), ForkJoinError> {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(self.cancelled()),
                joined = self.in_flight.join_next() => match joined {
                    Some(joined) => {
                        self.settle(joined)?;
                        self.settle_expired().await?;
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    async fn drain_ready(&mut self) -> Result<(), ForkJoinError> {
        while let Some(joined) = self.in_flight.try_join_next() {
            self.settle(joined)?;
        }
        self.settle_expired().await
    }

    /// Once the shared deadline is reported, collects every route still in
    /// flight and fails fast with the lowest-index failure.
    ///
    /// All in-flight routes are bounded by the same deadline, so this wait
    /// ends within the instant it passed.
    async fn settle_expired(&mut self) -> Result<(), ForkJoinError> {
        if !self.expired {
            return Ok(());
        }
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(self.cancelled()),
                joined = self.in_flight.join_next() => match joined {
                    Some(joined) => self.settle(joined)?,
                    None => break,
                },
            }
        }

        let Some(outcome) = self.slots.first_failure() else {
            return Ok(());
        };
        let index = outcome.index();
        let err = match outcome.as_failure() {
            Some(failure) => {
                ForkJoinError::route(index, failure.event.clone(), failure.cause.clone())
            }
            None => return Ok(()),
        };
        warn!(
            index,
            kind = %err.kind(),
            error = %err,
            "invocation deadline passed, cancelling fork-join"
        );
        self.abandon();
        Err(err)
    }

    fn settle(&mut self, joined: Result<Settled, JoinError>) -> Result<(), ForkJoinError> {
        let (outcome, permit) = match joined {
            Ok(settled) => settled,
            Err(err) => {
                self.abandon();
                return Err(ForkJoinError::Internal(format!("route task failed: {err}")));
            }
        };
        let recorded = self.record(outcome);
        drop(permit);
        recorded
    }

    /// Stores an outcome, or short-circuits on the first failure in fail-fast mode.
    ///
    /// A miss of the shared deadline is stored instead and marks the
    /// invocation expired; [`settle_expired`](Self::settle_expired) reports it.
    fn record(&mut self, outcome: Outcome) -> Result<(), ForkJoinError> {
        match outcome.as_failure() {
            Some(failure)
                if !self.delay_errors
                    && (self.expired || (self.shared_deadline && failure.cause.missed_deadline())) =>
            {
                self.expired = true;
                self.slots.record(outcome);
                Ok(())
            }
            Some(failure) if !self.delay_errors => {
                let index = outcome.index();
                warn!(
                    index,
                    kind = %failure.cause.kind(),
                    error = %failure.cause,
                    "route failed, cancelling fork-join"
                );
                let err = ForkJoinError::route(index, failure.event.clone(), failure.cause.clone());
                self.abandon();
                Err(err)
            }
            _ => {
                self.slots.record(outcome);
                Ok(())
            }
        }
    }

    /// Signals every route still running and stops tracking them.
    ///
    /// Routes are left to wind down on their own tokens; nothing is aborted.
    fn abandon(&mut self) {
        self.cancel.cancel();
        self.in_flight.detach_all();
    }

    fn cancelled(&mut self) -> ForkJoinError {
        info!(in_flight = self.in_flight.len(), "fork-join cancelled by caller");
        self.abandon();
        ForkJoinError::Cancelled
    }

    fn into_context(self, original: Event) -> Result<AggregationContext, ForkJoinError> {
        self.slots.into_context(original)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
