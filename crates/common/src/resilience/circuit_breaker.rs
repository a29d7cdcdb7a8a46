//! Circuit breaker state machine
//!
//! A breaker guards one logical downstream dependency. It starts CLOSED and
//! lets calls through; `failure_threshold` consecutive failures open it. While
//! OPEN every attempt is rejected until `reset_timeout` has elapsed, at which
//! point the next attempt is admitted as a trial and the breaker moves to
//! HALF_OPEN. `success_threshold` consecutive trial successes close it again;
//! any trial failure reopens it.
//!
//! All mutable state sits behind one mutex, so each transition is atomic with
//! respect to concurrent callers. The lock is never held while the wrapped
//! operation or a state-change callback runs. Transitions are queued under the
//! state lock and delivered, in order, before the call that caused them
//! returns.
//!
//! ```
//! use std::time::Duration;
//!
//! use storefront_common::resilience::{
//!     CircuitBreaker, CircuitBreakerConfig, CircuitState, MockClock,
//! };
//!
//! let clock = MockClock::at(0);
//! let breaker = CircuitBreaker::builder(
//!     CircuitBreakerConfig::named("tax-authority")
//!         .with_failure_threshold(2)
//!         .with_reset_timeout(Duration::from_secs(1)),
//! )
//! .clock(clock.clone())
//! .build()?;
//!
//! for _ in 0..2 {
//!     let _ = breaker.call(|| Err::<(), _>(std::io::Error::other("timeout")));
//! }
//! assert_eq!(breaker.state(), CircuitState::Open);
//!
//! clock.advance(Duration::from_secs(1));
//! assert_eq!(breaker.call(|| Ok::<_, std::io::Error>(42))?, 42);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::config::CircuitBreakerConfig;
use super::error::{ConfigResult, Rejected, ResilienceError, ResilienceResult};
use super::metrics::CircuitBreakerMetrics;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    #[default]
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionReason {
    /// CLOSED: consecutive failures reached `failure_threshold`.
    FailureThreshold,
    /// OPEN: `reset_timeout` elapsed and an attempt was admitted as a trial.
    ResetTimeoutElapsed,
    /// HALF_OPEN: a trial call failed.
    TrialFailed,
    /// HALF_OPEN: consecutive trial successes reached `success_threshold`.
    SuccessThreshold,
    /// Operator `trip(reason)`.
    ManualTrip(String),
    /// Operator `reset()`.
    ManualReset,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailureThreshold => write!(f, "failure threshold reached"),
            Self::ResetTimeoutElapsed => write!(f, "reset timeout elapsed"),
            Self::TrialFailed => write!(f, "trial call failed"),
            Self::SuccessThreshold => write!(f, "success threshold reached"),
            Self::ManualTrip(reason) => write!(f, "manual trip: {reason}"),
            Self::ManualReset => write!(f, "manual reset"),
        }
    }
}

/// A single state change, as delivered to `on_state_change` listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub name: Arc<str>,
    pub from: CircuitState,
    pub to: CircuitState,
    /// Clock reading at the moment of the transition.
    pub at_millis: u64,
    pub reason: TransitionReason,
}

/// Callback invoked synchronously for every transition.
pub type StateChangeListener = Arc<dyn Fn(&StateTransition) + Send + Sync>;

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<u64>,
    half_open_in_flight: u32,
    total_successes: u64,
    total_failures: u64,
    open_count: u64,
    rejections: u64,
    /// Bumped on every entry into HALF_OPEN (and on reset). Only trials of the
    /// current period release a slot or decide the next transition.
    trial_epoch: u64,
    pending: VecDeque<StateTransition>,
}

impl BreakerState {
    fn transition(&mut self, name: &Arc<str>, to: CircuitState, now: u64, reason: TransitionReason) {
        self.pending.push_back(StateTransition {
            name: Arc::clone(name),
            from: self.state,
            to,
            at_millis: now,
            reason,
        });
        self.state = to;
    }

    fn open(&mut self, name: &Arc<str>, now: u64, reason: TransitionReason) {
        self.consecutive_successes = 0;
        self.opened_at = Some(now);
        self.open_count = self.open_count.saturating_add(1);
        self.transition(name, CircuitState::Open, now, reason);
    }

    fn open_elapsed(&self, now: u64) -> Option<u64> {
        self.opened_at.map(|opened_at| now.saturating_sub(opened_at))
    }

    /// Returns `true` if the permit was a trial of the current period.
    fn release_trial(&mut self, trial_epoch: Option<u64>) -> bool {
        let current = trial_epoch == Some(self.trial_epoch);
        if current {
            self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
        }
        current
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

/// Builder for a [`CircuitBreaker`] with a custom clock or listener.
pub struct CircuitBreakerBuilder {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    listener: Option<StateChangeListener>,
}

impl CircuitBreakerBuilder {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, clock: Arc::new(SystemClock), listener: None }
    }

    /// Set the time source (useful for testing)
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Use a clock shared with other breakers.
    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a callback fired synchronously on every transition.
    pub fn on_state_change<F>(mut self, listener: F) -> Self
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn listener(mut self, listener: StateChangeListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreaker> {
        self.config.validate()?;

        Ok(CircuitBreaker {
            name: Arc::from(self.config.name.as_str()),
            config: self.config,
            clock: self.clock,
            listener: self.listener,
            inner: Mutex::new(BreakerState::default()),
            dispatch: ReentrantMutex::new(()),
        })
    }
}

impl fmt::Debug for CircuitBreakerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerBuilder")
            .field("config", &self.config)
            .field("has_listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

/// Circuit breaker guarding one downstream dependency.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    listener: Option<StateChangeListener>,
    inner: Mutex<BreakerState>,
    dispatch: ReentrantMutex<()>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a breaker on the wall clock with no listener.
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        CircuitBreakerBuilder::new(config).build()
    }

    /// Create a breaker with a custom clock (useful for testing)
    pub fn with_clock<C: Clock + 'static>(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        CircuitBreakerBuilder::new(config).clock(clock).build()
    }

    pub fn builder(config: CircuitBreakerConfig) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether an attempt made now would be admitted.
    ///
    /// Pure query: an OPEN breaker whose cooldown has elapsed reports `true`
    /// but stays OPEN until an actual attempt moves it to HALF_OPEN.
    pub fn can_execute(&self) -> bool {
        let now = self.clock.millis_since_epoch();
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                inner.half_open_in_flight < self.config.half_open_max_requests
            }
            CircuitState::Open => inner
                .open_elapsed(now)
                .map_or(true, |elapsed| elapsed >= self.config.reset_timeout_millis()),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consistent snapshot of every counter.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            name: self.name.to_string(),
            state: inner.state,
            successes: inner.total_successes,
            failures: inner.total_failures,
            open_count: inner.open_count,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            half_open_in_flight: inner.half_open_in_flight,
            rejections: inner.rejections,
            opened_at_millis: inner.opened_at,
        }
    }

    /// Remaining cooldown while OPEN; `None` in any other state.
    pub fn retry_after(&self) -> Option<Duration> {
        let now = self.clock.millis_since_epoch();
        let inner = self.inner.lock();
        self.remaining_cooldown(&inner, now)
    }

    fn remaining_cooldown(&self, inner: &BreakerState, now: u64) -> Option<Duration> {
        if inner.state != CircuitState::Open {
            return None;
        }
        let elapsed = inner.open_elapsed(now)?;
        Some(Duration::from_millis(self.config.reset_timeout_millis().saturating_sub(elapsed)))
    }

    /// Ask for admission without wrapping the work in a closure.
    ///
    /// The returned [`Permit`] must be resolved with
    /// [`Permit::record_success`] or [`Permit::record_failure`]; dropping it
    /// unresolved frees its trial slot without touching any counter.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Rejected> {
        let admitted = self.admit();
        self.dispatch_pending();
        admitted.map(|trial_epoch| Permit { breaker: self, trial_epoch, resolved: false })
    }

    fn admit(&self) -> Result<Option<u64>, Rejected> {
        let now = self.clock.millis_since_epoch();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => return Ok(None),
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_requests {
                    inner.half_open_in_flight += 1;
                    return Ok(Some(inner.trial_epoch));
                }
            }
            CircuitState::Open => {
                let cooled_down = inner
                    .open_elapsed(now)
                    .map_or(true, |elapsed| elapsed >= self.config.reset_timeout_millis());
                if cooled_down {
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                    inner.trial_epoch = inner.trial_epoch.wrapping_add(1);
                    inner.half_open_in_flight = 1;
                    inner.transition(
                        &self.name,
                        CircuitState::HalfOpen,
                        now,
                        TransitionReason::ResetTimeoutElapsed,
                    );
                    return Ok(Some(inner.trial_epoch));
                }
            }
        }

        inner.rejections = inner.rejections.saturating_add(1);
        let rejected = Rejected {
            name: self.name.to_string(),
            state: inner.state,
            retry_after: self.remaining_cooldown(&inner, now),
        };
        drop(inner);

        debug!(breaker = %self.name, state = %rejected.state, "circuit breaker rejecting call");
        Err(rejected)
    }

    fn record(&self, trial_epoch: Option<u64>, outcome: Outcome) {
        let now = self.clock.millis_since_epoch();
        {
            let mut inner = self.inner.lock();
            let current_trial = inner.release_trial(trial_epoch);

            match outcome {
                Outcome::Success => inner.total_successes = inner.total_successes.saturating_add(1),
                Outcome::Failure => inner.total_failures = inner.total_failures.saturating_add(1),
            }

            match (inner.state, outcome) {
                (CircuitState::Closed, Outcome::Success) => inner.consecutive_failures = 0,
                (CircuitState::Closed, Outcome::Failure) => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.open(&self.name, now, TransitionReason::FailureThreshold);
                    }
                }
                (CircuitState::HalfOpen, _) if !current_trial => {
                    debug!(breaker = %self.name, ?outcome, "non-trial outcome resolved while half-open");
                }
                (CircuitState::HalfOpen, Outcome::Success) => {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.config.success_threshold {
                        inner.consecutive_failures = 0;
                        inner.consecutive_successes = 0;
                        inner.transition(
                            &self.name,
                            CircuitState::Closed,
                            now,
                            TransitionReason::SuccessThreshold,
                        );
                    }
                }
                (CircuitState::HalfOpen, Outcome::Failure) => {
                    inner.open(&self.name, now, TransitionReason::TrialFailed);
                }
                (CircuitState::Open, _) => {
                    debug!(breaker = %self.name, ?outcome, "outcome resolved while circuit is open");
                }
            }
        }
        self.dispatch_pending();
    }

    fn release(&self, trial_epoch: Option<u64>) {
        let _ = self.inner.lock().release_trial(trial_epoch);
    }

    /// Execute an async operation with circuit breaker protection
    ///
    /// Rejections come back as [`ResilienceError::CircuitOpen`] and the
    /// operation is never called. Operation errors are recorded as failures
    /// and returned unchanged inside [`ResilienceError::Operation`].
    #[instrument(skip(self, operation), fields(breaker = %self.name))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        match operation().await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(error) => {
                permit.record_failure();
                Err(ResilienceError::Operation(error))
            }
        }
    }

    /// Execute a synchronous operation with circuit breaker protection
    #[instrument(skip(self, operation), fields(breaker = %self.name))]
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire()?;
        match operation() {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(error) => {
                permit.record_failure();
                Err(ResilienceError::Operation(error))
            }
        }
    }

    /// Force the breaker OPEN and restart its cooldown.
    ///
    /// `open_count` only moves if the breaker was not already OPEN.
    pub fn trip(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let now = self.clock.millis_since_epoch();
        {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::Open {
                inner.opened_at = Some(now);
                debug!(breaker = %self.name, %reason, "trip on open circuit restarted cooldown");
            } else {
                inner.open(&self.name, now, TransitionReason::ManualTrip(reason));
            }
        }
        self.dispatch_pending();
    }

    /// Force the breaker CLOSED and zero every counter.
    pub fn reset(&self) {
        let now = self.clock.millis_since_epoch();
        {
            let mut inner = self.inner.lock();
            let from = inner.state;

            inner.consecutive_failures = 0;
            inner.consecutive_successes = 0;
            inner.opened_at = None;
            inner.half_open_in_flight = 0;
            inner.total_successes = 0;
            inner.total_failures = 0;
            inner.open_count = 0;
            inner.rejections = 0;
            inner.trial_epoch = inner.trial_epoch.wrapping_add(1);

            if from == CircuitState::Closed {
                debug!(breaker = %self.name, "reset on closed circuit cleared counters");
            } else {
                inner.transition(&self.name, CircuitState::Closed, now, TransitionReason::ManualReset);
            }
        }
        self.dispatch_pending();
    }

    /// Deliver queued transitions in order.
    ///
    /// The dispatch lock is reentrant so a listener may call back into this
    /// breaker; the state lock is never held while a listener runs.
    fn dispatch_pending(&self) {
        let _dispatch = self.dispatch.lock();
        loop {
            let next = self.inner.lock().pending.pop_front();
            let Some(transition) = next else {
                break;
            };

            if transition.to == CircuitState::Open {
                warn!(
                    breaker = %transition.name,
                    from = %transition.from,
                    to = %transition.to,
                    reason = %transition.reason,
                    "circuit breaker opened"
                );
            } else {
                info!(
                    breaker = %transition.name,
                    from = %transition.from,
                    to = %transition.to,
                    reason = %transition.reason,
                    "circuit breaker state changed"
                );
            }

            if let Some(listener) = &self.listener {
                listener(&transition);
            }
        }
    }
}

/// Admission token for one guarded execution.
#[must_use = "an unresolved permit records nothing"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial_epoch: Option<u64>,
    resolved: bool,
}

impl Permit<'_> {
    /// `true` when this execution is a HALF_OPEN trial.
    pub const fn is_trial(&self) -> bool {
        self.trial_epoch.is_some()
    }

    pub fn record_success(mut self) {
        self.resolved = true;
        self.breaker.record(self.trial_epoch, Outcome::Success);
    }

    pub fn record_failure(mut self) {
        self.resolved = true;
        self.breaker.record(self.trial_epoch, Outcome::Failure);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.release(self.trial_epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the breaker state machine
    //!
    //! Cover every row of the transition table, HALF_OPEN admission control,
    //! callback ordering and reentrancy, and concurrent access.

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::resilience::MockClock;

    fn config(failures: u32, timeout_ms: u64, successes: u32, trials: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig::named("test")
            .with_failure_threshold(failures)
            .with_reset_timeout(Duration::from_millis(timeout_ms))
            .with_success_threshold(successes)
            .with_half_open_max_requests(trials)
    }

    fn breaker(config: CircuitBreakerConfig, clock: &MockClock) -> CircuitBreaker {
        CircuitBreaker::with_clock(config, clock.clone()).expect("valid config")
    }

    fn recording(
        config: CircuitBreakerConfig,
        clock: &MockClock,
    ) -> (CircuitBreaker, Arc<Mutex<Vec<(CircuitState, CircuitState)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let breaker = CircuitBreaker::builder(config)
            .clock(clock.clone())
            .on_state_change(move |t| sink.lock().push((t.from, t.to)))
            .build()
            .expect("valid config");
        (breaker, seen)
    }

    fn fail(cb: &CircuitBreaker) -> ResilienceResult<(), &'static str> {
        cb.call(|| Err("downstream"))
    }

    fn succeed(cb: &CircuitBreaker) -> ResilienceResult<(), &'static str> {
        cb.call(|| Ok(()))
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let result = CircuitBreaker::new(config(0, 10, 1, 1));
        assert!(result.is_err());
    }

    /// Validates a fresh breaker is CLOSED with zeroed metrics.
    ///
    /// Assertions:
    /// - Confirms `state()` equals `CircuitState::Closed`.
    /// - Ensures `can_execute()` is true and `opened_at_millis` is `None`.
    #[test]
    fn test_initial_state() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default()).expect("valid config");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());

        let metrics = cb.metrics();
        assert_eq!(metrics.completed_calls(), 0);
        assert_eq!(metrics.open_count, 0);
        assert_eq!(metrics.opened_at_millis, None);
    }

    /// Validates exactly `N` consecutive failures open the circuit.
    ///
    /// Assertions:
    /// - Confirms the breaker stays CLOSED after each of the first `N-1`.
    /// - Confirms the `N`th failure opens it with `open_count == 1`.
    #[test]
    fn test_opens_after_exactly_threshold_failures() {
        for threshold in 1..=6 {
            let clock = MockClock::at(500);
            let cb = breaker(config(threshold, 1_000, 1, 1), &clock);

            for _ in 1..threshold {
                let _ = fail(&cb);
                assert_eq!(cb.state(), CircuitState::Closed);
            }
            let _ = fail(&cb);

            let metrics = cb.metrics();
            assert_eq!(metrics.state, CircuitState::Open);
            assert_eq!(metrics.open_count, 1);
            assert_eq!(metrics.opened_at_millis, Some(500));
            assert_eq!(metrics.failures, u64::from(threshold));
        }
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let clock = MockClock::new();
        let cb = breaker(config(3, 1_000, 1, 1), &clock);

        let _ = fail(&cb);
        let _ = fail(&cb);
        assert_eq!(cb.metrics().consecutive_failures, 2);

        let _ = succeed(&cb);
        assert_eq!(cb.metrics().consecutive_failures, 0);

        let _ = fail(&cb);
        let _ = fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    /// Validates OPEN rejects without invoking the operation for any count.
    ///
    /// Assertions:
    /// - Confirms every attempt returns `CircuitOpen` naming the breaker.
    /// - Confirms the operation counter stays at zero.
    /// - Confirms rejections are not counted as failures.
    #[test]
    fn test_open_rejects_without_invoking() {
        let clock = MockClock::new();
        let cb = breaker(config(1, 1_000, 1, 1), &clock);
        let _ = fail(&cb);

        let invoked = AtomicU32::new(0);
        for _ in 0..25 {
            clock.advance_millis(10);
            let result = cb.call(|| {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            });
            match result {
                Err(ResilienceError::CircuitOpen { name, state, .. }) => {
                    assert_eq!(name, "test");
                    assert_eq!(state, CircuitState::Open);
                }
                other => panic!("expected rejection, got {other:?}"),
            }
        }

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        let metrics = cb.metrics();
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.rejections, 25);
    }

    /// Validates `can_execute` flips exactly at the reset timeout and never
    /// performs the OPEN to HALF_OPEN transition itself.
    ///
    /// Assertions:
    /// - Ensures `can_execute()` is false at 999ms and true at 1000ms.
    /// - Confirms the state is still OPEN after the query.
    #[test]
    fn test_can_execute_is_pure() {
        let clock = MockClock::at(10_000);
        let (cb, seen) = recording(config(1, 1_000, 1, 1), &clock);
        let _ = fail(&cb);

        clock.advance_millis(999);
        assert!(!cb.can_execute());

        clock.advance_millis(1);
        assert!(cb.can_execute());
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_retry_after_counts_down() {
        let clock = MockClock::new();
        let cb = breaker(config(1, 1_000, 1, 1), &clock);
        assert_eq!(cb.retry_after(), None);

        let _ = fail(&cb);
        clock.advance_millis(300);
        assert_eq!(cb.retry_after(), Some(Duration::from_millis(700)));

        match succeed(&cb) {
            Err(ResilienceError::CircuitOpen { retry_after, .. }) => {
                assert_eq!(retry_after, Some(Duration::from_millis(700)));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    /// The documented scenario: threshold 2, timeout 1000ms, one success to
    /// close, three trial slots.
    ///
    /// Assertions:
    /// - Confirms rejection at t+999.
    /// - Confirms a successful call at t+1001 closes the breaker with
    ///   `consecutive_failures == 0`.
    #[test]
    fn test_scenario_recovery() {
        let clock = MockClock::at(50_000);
        let (cb, seen) = recording(config(2, 1_000, 1, 3), &clock);

        let _ = fail(&cb);
        let _ = fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance_millis(999);
        assert!(succeed(&cb).is_err_and(|e| e.is_rejection()));

        clock.advance_millis(2);
        assert!(succeed(&cb).is_ok());

        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.consecutive_failures, 0);
        assert_eq!(metrics.half_open_in_flight, 0);
        assert_eq!(
            *seen.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    /// Alternative branch of the scenario: the trial at t+1001 fails.
    ///
    /// Assertions:
    /// - Confirms the breaker is OPEN with `open_count == 2`.
    /// - Confirms `opened_at_millis` moved to the trial failure time.
    #[test]
    fn test_scenario_trial_failure_reopens() {
        let clock = MockClock::at(50_000);
        let cb = breaker(config(2, 1_000, 1, 3), &clock);

        let _ = fail(&cb);
        let _ = fail(&cb);

        clock.advance_millis(1_001);
        let result = fail(&cb);
        assert!(matches!(result, Err(ResilienceError::Operation("downstream"))));

        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(metrics.open_count, 2);
        assert_eq!(metrics.opened_at_millis, Some(51_001));
        assert!(!cb.can_execute());
    }

    /// Validates exactly `M` consecutive trial successes close the breaker
    /// and a failure discards progress.
    ///
    /// Assertions:
    /// - Confirms HALF_OPEN persists for the first `M-1` successes.
    /// - Confirms one failure after `M-1` successes reopens.
    #[test]
    fn test_success_threshold_and_progress_discard() {
        for threshold in 1..=4 {
            let clock = MockClock::new();
            let cb = breaker(config(1, 100, threshold, 1), &clock);

            let _ = fail(&cb);
            clock.advance_millis(100);
            for _ in 1..threshold {
                assert!(succeed(&cb).is_ok());
                assert_eq!(cb.state(), CircuitState::HalfOpen);
            }
            assert!(succeed(&cb).is_ok());
            assert_eq!(cb.state(), CircuitState::Closed);
        }

        let clock = MockClock::new();
        let cb = breaker(config(1, 100, 3, 1), &clock);
        let _ = fail(&cb);
        clock.advance_millis(100);
        let _ = succeed(&cb);
        let _ = succeed(&cb);
        assert_eq!(cb.metrics().consecutive_successes, 2);

        let _ = fail(&cb);
        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(metrics.consecutive_successes, 0);

        clock.advance_millis(100);
        let _ = succeed(&cb);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.metrics().consecutive_successes, 1);
    }

    /// Validates HALF_OPEN bounds concurrently outstanding trials.
    ///
    /// Assertions:
    /// - Confirms two permits are granted, the third rejected as HALF_OPEN.
    /// - Confirms resolving one trial frees a slot.
    #[test]
    fn test_half_open_admission_control() {
        let clock = MockClock::new();
        let cb = breaker(config(1, 100, 5, 2), &clock);
        let _ = fail(&cb);
        clock.advance_millis(100);

        let first = cb.try_acquire().expect("first trial admitted");
        assert!(first.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let second = cb.try_acquire().expect("second trial admitted");
        assert!(!cb.can_execute());

        let rejected = cb.try_acquire().expect_err("saturated");
        assert_eq!(rejected.state, CircuitState::HalfOpen);
        assert_eq!(rejected.retry_after, None);

        first.record_success();
        assert_eq!(cb.metrics().half_open_in_flight, 1);
        assert!(cb.can_execute());

        second.record_success();
        assert_eq!(cb.metrics().half_open_in_flight, 0);
    }

    /// Validates a dropped permit releases its trial slot without recording.
    ///
    /// Assertions:
    /// - Confirms `half_open_in_flight` returns to zero.
    /// - Confirms success/failure totals are unchanged.
    #[test]
    fn test_dropped_permit_releases_slot() {
        let clock = MockClock::new();
        let cb = breaker(config(1, 100, 1, 1), &clock);
        let _ = fail(&cb);
        clock.advance_millis(100);

        let permit = cb.try_acquire().expect("trial admitted");
        assert!(!cb.can_execute());
        drop(permit);

        let metrics = cb.metrics();
        assert_eq!(metrics.half_open_in_flight, 0);
        assert_eq!(metrics.successes, 0);
        assert_eq!(metrics.failures, 1);
        assert!(cb.can_execute());
    }

    /// Validates an outstanding trial that resolves after the breaker
    /// reopened is counted but causes no transition, and does not free a slot
    /// in a later probing period.
    ///
    /// Assertions:
    /// - Confirms the late success leaves the breaker OPEN.
    /// - Confirms totals include the late outcome.
    /// - Confirms the next HALF_OPEN period's in-flight count is unaffected.
    #[test]
    fn test_late_trial_outcome() {
        let clock = MockClock::new();
        let cb = breaker(config(1, 100, 1, 2), &clock);
        let _ = fail(&cb);
        clock.advance_millis(100);

        let slow = cb.try_acquire().expect("trial admitted");
        let _ = fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        slow.record_success();
        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(metrics.successes, 1);
        assert_eq!(metrics.failures, 2);
        assert_eq!(metrics.open_count, 2);

        clock.advance_millis(100);
        let _current = cb.try_acquire().expect("new trial admitted");
        assert_eq!(cb.metrics().half_open_in_flight, 1);
    }

    #[test]
    fn test_sub_millisecond_cooldown_is_not_skipped() {
        let clock = MockClock::new();
        let cb = breaker(
            CircuitBreakerConfig::named("test")
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_micros(500)),
            &clock,
        );
        let _ = fail(&cb);

        assert!(!cb.can_execute());
        assert_eq!(cb.retry_after(), Some(Duration::from_millis(1)));
        clock.advance_millis(1);
        assert!(cb.can_execute());
    }

    /// Validates a call admitted while CLOSED cannot close a HALF_OPEN breaker.
    ///
    /// Assertions:
    /// - Confirms its success counts toward totals only.
    /// - Confirms the breaker stays HALF_OPEN until the real trial resolves.
    #[test]
    fn test_closed_admitted_success_does_not_close_half_open() {
        let clock = MockClock::new();
        let cb = breaker(config(1, 100, 1, 1), &clock);

        let before_outage = cb.try_acquire().expect("admitted while closed");
        assert!(!before_outage.is_trial());
        let _ = fail(&cb);
        clock.advance_millis(100);
        let trial = cb.try_acquire().expect("trial admitted");

        before_outage.record_success();
        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::HalfOpen);
        assert_eq!(metrics.half_open_in_flight, 1);
        assert_eq!(metrics.consecutive_successes, 0);
        assert_eq!(metrics.successes, 1);

        trial.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_closed_admitted_failure_does_not_reopen_half_open() {
        let clock = MockClock::new();
        let cb = breaker(config(1, 100, 1, 1), &clock);

        let before_outage = cb.try_acquire().expect("admitted while closed");
        let _ = fail(&cb);
        clock.advance_millis(100);
        let _trial = cb.try_acquire().expect("trial admitted");

        before_outage.record_failure();
        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::HalfOpen);
        assert_eq!(metrics.open_count, 1);
        assert_eq!(metrics.failures, 2);
    }

    /// Validates a trial from an earlier probing period has no say in the
    /// current one.
    ///
    /// # Test Steps
    /// 1. Open, admit a trial, and reopen via a failed trial while `stale` is in flight
    /// 2. Enter a new HALF_OPEN period with a fresh trial
    /// 3. Resolve `stale` as a failure, then the fresh trial as a success
    #[test]
    fn test_stale_trial_outcome_does_not_decide_new_period() {
        let clock = MockClock::new();
        let cb = breaker(config(1, 100, 2, 2), &clock);
        let _ = fail(&cb);
        clock.advance_millis(100);

        let stale = cb.try_acquire().expect("trial admitted");
        let _ = fail(&cb);
        assert_eq!(cb.metrics().open_count, 2);
        clock.advance_millis(100);
        let current = cb.try_acquire().expect("trial admitted in new period");

        stale.record_failure();
        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::HalfOpen);
        assert_eq!(metrics.open_count, 2);
        assert_eq!(metrics.failures, 3);
        assert_eq!(metrics.half_open_in_flight, 1);

        current.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.metrics().consecutive_successes, 1);
        let _ = succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stale_permit_does_not_release_new_period_slot() {
        let clock = MockClock::new();
        let cb = breaker(config(1, 100, 3, 2), &clock);
        let _ = fail(&cb);
        clock.advance_millis(100);

        let stale = cb.try_acquire().expect("trial admitted");
        let _ = fail(&cb);
        clock.advance_millis(100);
        let current = cb.try_acquire().expect("trial admitted in new period");
        assert_eq!(cb.metrics().half_open_in_flight, 1);

        drop(stale);
        assert_eq!(cb.metrics().half_open_in_flight, 1);
        drop(current);
        assert_eq!(cb.metrics().half_open_in_flight, 0);
    }

    /// Validates manual trip from every state.
    ///
    /// Assertions:
    /// - Confirms OPEN and `can_execute() == false` immediately after.
    /// - Confirms repeated trips do not bump `open_count` or fire callbacks.
    #[test]
    fn test_trip() {
        let clock = MockClock::at(1_000);
        let (cb, seen) = recording(config(3, 500, 1, 1), &clock);

        cb.trip("gateway maintenance window");
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert_eq!(cb.metrics().open_count, 1);

        clock.advance_millis(400);
        cb.trip("still down");
        let metrics = cb.metrics();
        assert_eq!(metrics.open_count, 1);
        assert_eq!(metrics.opened_at_millis, Some(1_400));
        assert_eq!(seen.lock().len(), 1);

        clock.advance_millis(499);
        assert!(!cb.can_execute());
        clock.advance_millis(1);
        assert!(cb.can_execute());

        let permit = cb.try_acquire().expect("trial admitted");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.trip("abort probing");
        assert_eq!(cb.metrics().open_count, 2);
        permit.record_success();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    /// Validates reset zeroes counters and fires only on a state change.
    ///
    /// Assertions:
    /// - Confirms CLOSED, `can_execute()`, zeroed totals after reset.
    /// - Confirms resetting an already-CLOSED breaker fires no callback.
    #[test]
    fn test_reset() {
        let clock = MockClock::new();
        let (cb, seen) = recording(config(2, 500, 1, 1), &clock);

        let _ = succeed(&cb);
        let _ = fail(&cb);
        let _ = fail(&cb);
        let _ = succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        let metrics = cb.metrics();
        assert_eq!(metrics.successes, 0);
        assert_eq!(metrics.failures, 0);
        assert_eq!(metrics.open_count, 0);
        assert_eq!(metrics.rejections, 0);
        assert_eq!(metrics.opened_at_millis, None);
        assert_eq!(seen.lock().len(), 2);

        let _ = fail(&cb);
        cb.reset();
        assert_eq!(cb.metrics().consecutive_failures, 0);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_totals_match_completed_calls() {
        let clock = MockClock::new();
        let cb = breaker(config(2, 100, 1, 1), &clock);

        let outcomes = [true, false, true, false, false, true, true, false];
        for (i, ok) in outcomes.iter().enumerate() {
            clock.advance_millis(if i % 3 == 0 { 100 } else { 1 });
            let _ = if *ok { succeed(&cb) } else { fail(&cb) };
        }

        let metrics = cb.metrics();
        assert_eq!(metrics.completed_calls() + metrics.rejections, outcomes.len() as u64);
    }

    /// Validates transition details delivered to the listener.
    ///
    /// Assertions:
    /// - Confirms name, timestamps and reasons for the full cycle.
    #[test]
    fn test_transition_details() {
        let clock = MockClock::at(7);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = CircuitBreaker::builder(config(1, 10, 1, 1))
            .clock(clock.clone())
            .on_state_change(move |t| sink.lock().push(t.clone()))
            .build()
            .expect("valid config");

        let _ = fail(&cb);
        clock.advance_millis(10);
        let _ = succeed(&cb);
        cb.trip("drill");
        cb.reset();

        let seen = seen.lock();
        let reasons: Vec<_> = seen.iter().map(|t| t.reason.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                TransitionReason::FailureThreshold,
                TransitionReason::ResetTimeoutElapsed,
                TransitionReason::SuccessThreshold,
                TransitionReason::ManualTrip("drill".to_string()),
                TransitionReason::ManualReset,
            ]
        );
        assert!(seen.iter().all(|t| &*t.name == "test"));
        assert_eq!(seen[0].at_millis, 7);
        assert_eq!(seen[1].at_millis, 17);
    }

    /// Validates a listener may call back into the breaker.
    ///
    /// Assertions:
    /// - Confirms a listener reading metrics and resetting on open does not
    ///   deadlock and both transitions are observed in order.
    #[test]
    fn test_reentrant_listener() {
        let clock = MockClock::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Arc<CircuitBreaker>>>> = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&seen);
        let handle = Arc::clone(&slot);
        let cb = Arc::new(
            CircuitBreaker::builder(config(1, 100, 1, 1))
                .clock(clock.clone())
                .on_state_change(move |t| {
                    sink.lock().push((t.from, t.to));
                    let target = handle.lock().clone();
                    if let Some(cb) = target {
                        let _ = cb.metrics();
                        if t.to == CircuitState::Open {
                            cb.reset();
                        }
                    }
                })
                .build()
                .expect("valid config"),
        );
        *slot.lock() = Some(Arc::clone(&cb));

        let _ = fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(
            *seen.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::Closed),
            ]
        );
        slot.lock().take();
    }

    /// Validates counters stay exact under many threads.
    ///
    /// Assertions:
    /// - Confirms `successes` equals the number of successful calls.
    #[test]
    fn test_concurrent_calls() {
        let cb = Arc::new(CircuitBreaker::new(config(1_000, 1_000, 1, 1)).expect("valid config"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        let _ = cb.call(|| Ok::<_, &str>(()));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread");
        }

        assert_eq!(cb.metrics().successes, 2_000);
    }

    /// Validates concurrent failures open the breaker exactly once.
    ///
    /// Assertions:
    /// - Confirms `open_count == 1` and one CLOSED to OPEN callback.
    #[test]
    fn test_concurrent_failures_open_once() {
        let clock = MockClock::new();
        let (cb, seen) = recording(config(10, 60_000, 1, 1), &clock);
        let cb = Arc::new(cb);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        let _ = cb.call(|| Err::<(), _>("down"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread");
        }

        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(metrics.open_count, 1);
        assert_eq!(metrics.failures + metrics.rejections, 160);
        assert_eq!(*seen.lock(), vec![(CircuitState::Closed, CircuitState::Open)]);
    }

    #[test]
    fn test_clock_moving_backwards_does_not_underflow() {
        let clock = MockClock::at(10_000);
        let cb = breaker(config(1, 100, 1, 1), &clock);
        let _ = fail(&cb);

        clock.set_millis(5_000);
        assert!(!cb.can_execute());
        assert_eq!(cb.retry_after(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_zero_timeout_admits_immediately() {
        let clock = MockClock::new();
        let cb = breaker(config(1, 0, 1, 1), &clock);
        let _ = fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.can_execute());
        assert!(succeed(&cb).is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_closure_clock() {
        let now = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let source = Arc::clone(&now);
        let cb = CircuitBreaker::with_clock(config(1, 50, 1, 1), move || {
            source.load(std::sync::atomic::Ordering::SeqCst)
        })
        .expect("valid config");

        let _ = fail(&cb);
        assert!(!cb.can_execute());
        now.store(50, std::sync::atomic::Ordering::SeqCst);
        assert!(cb.can_execute());
    }
}
