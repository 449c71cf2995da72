//! Circuit breaker state machine.
//!
//! Prevents cascading failures by monitoring operation failures per named
//! operation and temporarily blocking calls once a failure threshold is
//! reached. States:
//!
//! - CLOSED: calls flow; consecutive failures are counted.
//! - OPEN: calls are rejected until the recovery timeout elapses.
//! - HALF_OPEN: a bounded number of trial calls probe recovery; a single
//!   success closes the circuit, a single failure reopens it.
//!
//! Supports both async and sync operations, with a configurable [`Clock`]
//! for deterministic timeout testing.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use crate::metrics::ResilienceMetrics;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally; failures are counted.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// Limited trial calls are allowed to probe recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
///
/// Invalid values fail construction via [`CircuitBreakerConfig::builder`];
/// nothing is clamped.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit (1..=100).
    pub failure_threshold: u32,
    /// Time to wait in OPEN before allowing trial calls (1s..=3600s).
    pub recovery_timeout: Duration,
    /// Maximum trial calls admitted while HALF_OPEN (1..=10).
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration against its documented ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 || self.failure_threshold > 100 {
            return Err(ConfigError::new("failure_threshold", "must be between 1 and 100"));
        }
        if self.recovery_timeout < Duration::from_secs(1)
            || self.recovery_timeout > Duration::from_secs(3600)
        {
            return Err(ConfigError::new(
                "recovery_timeout",
                "must be between 1 and 3600 seconds",
            ));
        }
        if self.half_open_max_calls == 0 || self.half_open_max_calls > 10 {
            return Err(ConfigError::new("half_open_max_calls", "must be between 1 and 10"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Serializable point-in-time view of a circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub half_open_max_calls: u32,
    /// Seconds until the breaker re-evaluates, when OPEN.
    pub retry_after_secs: Option<u64>,
}

/// Circuit breaker for one named operation.
///
/// Thread-safe; clones share state. The breaker also owns the operation's
/// [`ResilienceMetrics`], so metrics survive as long as the breaker does.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    operation: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    half_open_calls: AtomicU32,
    last_failure_time: RwLock<Option<Instant>>,
    metrics: Arc<ResilienceMetrics>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("operation", &self.operation)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Acquire))
            .field("config", &self.config)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker with the given configuration and system clock.
    pub fn new<S: Into<String>>(operation: S, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(operation, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing).
    pub fn with_clock<S: Into<String>>(
        operation: S,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::with_clock_unchecked(operation, config, clock))
    }

    /// Create a breaker from a configuration already known to be valid
    /// (derived from a strategy bundle or validated upstream).
    pub(crate) fn with_clock_unchecked<S: Into<String>>(
        operation: S,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> Self {
        Self {
            operation: operation.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            half_open_calls: AtomicU32::new(0),
            last_failure_time: RwLock::new(None),
            metrics: Arc::new(ResilienceMetrics::new()),
            clock,
        }
    }

    /// The operation this breaker guards.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Shared handle to this operation's metrics.
    pub fn metrics(&self) -> Arc<ResilienceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Check whether a call may proceed, advancing the state machine.
    ///
    /// Returns `false` while OPEN before the recovery timeout and while
    /// HALF_OPEN once the trial-call budget is spent. An affirmative answer
    /// in HALF_OPEN consumes one trial slot, so callers must follow through
    /// with `record_success` or `record_failure`.
    pub fn can_execute(&self) -> bool {
        let state = *self.state.read();

        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = (*self.last_failure_time.read())
                    .map(|failure_time| self.clock.now().duration_since(failure_time));
                match elapsed {
                    Some(elapsed) if elapsed >= self.config.recovery_timeout => {
                        let mut state = self.state.write();
                        // Another thread may have won the transition.
                        if *state == CircuitState::Open {
                            *state = CircuitState::HalfOpen;
                            self.half_open_calls.store(1, Ordering::Release);
                            self.metrics.record_half_open();
                            info!(
                                operation = %self.operation,
                                "circuit breaker half-open, allowing trial call"
                            );
                            true
                        } else {
                            drop(state);
                            self.admit_half_open()
                        }
                    }
                    _ => false,
                }
            }
            CircuitState::HalfOpen => self.admit_half_open(),
        }
    }

    fn admit_half_open(&self) -> bool {
        let previous = self.half_open_calls.fetch_add(1, Ordering::AcqRel);
        if previous < self.config.half_open_max_calls {
            true
        } else {
            self.half_open_calls.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    /// Record a successful operation.
    ///
    /// In HALF_OPEN a single success closes the circuit and resets the
    /// failure count. In CLOSED it resets the consecutive-failure count.
    pub fn record_success(&self) {
        self.metrics.record_success();

        let current = *self.state.read();
        match current {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let mut state = self.state.write();
                if *state == CircuitState::HalfOpen {
                    *state = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::Release);
                    self.half_open_calls.store(0, Ordering::Release);
                    self.metrics.record_close();
                    info!(operation = %self.operation, "circuit breaker closed after trial success");
                }
            }
            CircuitState::Open => {
                // A success can land here if the state flipped mid-call.
                debug!(operation = %self.operation, "success recorded while circuit open");
            }
        }
    }

    /// Record a failed operation.
    ///
    /// In CLOSED, reaching the failure threshold opens the circuit. In
    /// HALF_OPEN, any failure reopens the circuit and restarts the recovery
    /// timer.
    pub fn record_failure(&self) {
        self.metrics.record_failure();
        let failure_count = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        let now = self.clock.now();
        *self.last_failure_time.write() = Some(now);

        let current = *self.state.read();
        match current {
            CircuitState::Closed => {
                if failure_count >= self.config.failure_threshold {
                    let mut state = self.state.write();
                    if *state == CircuitState::Closed {
                        *state = CircuitState::Open;
                        self.metrics.record_open();
                        warn!(
                            operation = %self.operation,
                            failures = failure_count,
                            "circuit breaker opened"
                        );
                    }
                }
            }
            CircuitState::HalfOpen => {
                let mut state = self.state.write();
                if *state == CircuitState::HalfOpen {
                    *state = CircuitState::Open;
                    self.half_open_calls.store(0, Ordering::Release);
                    self.metrics.record_open();
                    warn!(
                        operation = %self.operation,
                        "circuit breaker reopened after trial failure"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Execute an async operation under breaker protection.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.can_execute() {
            self.metrics.record_rejection();
            debug!(operation = %self.operation, "circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen {
                operation: self.operation.clone(),
                retry_after: self.retry_after(),
            });
        }

        match operation().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(error) => {
                self.record_failure();
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Synchronous alternative to [`CircuitBreaker::execute`].
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.can_execute() {
            self.metrics.record_rejection();
            debug!(operation = %self.operation, "circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen {
                operation: self.operation.clone(),
                retry_after: self.retry_after(),
            });
        }

        match operation() {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(error) => {
                self.record_failure();
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Current state without advancing the state machine.
    ///
    /// Pure read: an OPEN breaker whose timeout has elapsed still reports
    /// OPEN until the next `can_execute`.
    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    /// Time remaining until an OPEN breaker re-evaluates, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        if *self.state.read() != CircuitState::Open {
            return None;
        }
        let failure_time = (*self.last_failure_time.read())?;
        let elapsed = self.clock.now().duration_since(failure_time);
        Some(self.config.recovery_timeout.saturating_sub(elapsed))
    }

    /// Force the breaker into a specific state (administrative override).
    pub fn force_state(&self, target: CircuitState) {
        let mut state = self.state.write();
        if *state != target {
            info!(
                operation = %self.operation,
                from = %*state,
                to = %target,
                "circuit breaker state forced"
            );
            *state = target;
            match target {
                CircuitState::Closed => {
                    self.failure_count.store(0, Ordering::Release);
                    self.half_open_calls.store(0, Ordering::Release);
                }
                CircuitState::Open => {
                    *self.last_failure_time.write() = Some(self.clock.now());
                }
                CircuitState::HalfOpen => {
                    self.half_open_calls.store(0, Ordering::Release);
                }
            }
        }
    }

    /// Reset the breaker to CLOSED and clear counters.
    pub fn reset(&self) {
        *self.state.write() = CircuitState::Closed;
        self.failure_count.store(0, Ordering::Release);
        self.half_open_calls.store(0, Ordering::Release);
        *self.last_failure_time.write() = None;
        info!(operation = %self.operation, "circuit breaker reset to closed");
    }

    /// Take a point-in-time snapshot for reporting.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
            half_open_max_calls: self.config.half_open_max_calls,
            retry_after_secs: self.retry_after().map(|d| d.as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::MockClock;
    use crate::error::ClassifiedError;

    use super::*;

    fn breaker_with_clock(
        threshold: u32,
        recovery: Duration,
        clock: MockClock,
    ) -> CircuitBreaker<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .recovery_timeout(recovery)
            .build()
            .unwrap();
        CircuitBreaker::with_clock("test-op", config, clock).unwrap()
    }

    #[test]
    fn test_config_validation_rejects_out_of_range() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().failure_threshold(101).build().is_err());
        assert!(CircuitBreakerConfig::builder()
            .recovery_timeout(Duration::from_millis(500))
            .build()
            .is_err());
        assert!(CircuitBreakerConfig::builder().half_open_max_calls(11).build().is_err());
        assert!(CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .recovery_timeout(Duration::from_secs(30))
            .half_open_max_calls(2)
            .build()
            .is_ok());
    }

    #[test]
    fn test_starts_closed_and_allows_calls() {
        let breaker = breaker_with_clock(3, Duration::from_secs(30), MockClock::new());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn test_opens_at_failure_threshold() {
        let breaker = breaker_with_clock(3, Duration::from_secs(30), MockClock::new());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let breaker = breaker_with_clock(3, Duration::from_secs(30), MockClock::new());

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        // Never three consecutive, so still closed.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(1, Duration::from_secs(30), clock.clone());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());

        clock.advance(Duration::from_secs(29));
        assert!(!breaker.can_execute());

        clock.advance(Duration::from_secs(1));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_state_read_does_not_advance_machine() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(1, Duration::from_secs(30), clock.clone());

        breaker.record_failure();
        clock.advance(Duration::from_secs(60));

        // Pure read: still reports open until can_execute runs.
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_single_trial_success_closes() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(1, Duration::from_secs(30), clock.clone());

        breaker.record_failure();
        clock.advance(Duration::from_secs(30));
        assert!(breaker.can_execute());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn test_trial_failure_reopens_and_restarts_timer() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(1, Duration::from_secs(30), clock.clone());

        breaker.record_failure();
        clock.advance(Duration::from_secs(30));
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Timer restarted: the original timeout point no longer suffices.
        clock.advance(Duration::from_secs(15));
        assert!(!breaker.can_execute());
        clock.advance(Duration::from_secs(15));
        assert!(breaker.can_execute());
    }

    #[test]
    fn test_half_open_call_budget() {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(30))
            .half_open_max_calls(2)
            .build()
            .unwrap();
        let breaker = CircuitBreaker::with_clock("budget-op", config, clock.clone()).unwrap();

        breaker.record_failure();
        clock.advance(Duration::from_secs(30));

        assert!(breaker.can_execute());
        assert!(breaker.can_execute());
        assert!(!breaker.can_execute(), "third trial call must be rejected");
    }

    #[test]
    fn test_retry_after_counts_down() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(1, Duration::from_secs(30), clock.clone());

        assert!(breaker.retry_after().is_none());
        breaker.record_failure();
        assert_eq!(breaker.retry_after(), Some(Duration::from_secs(30)));

        clock.advance(Duration::from_secs(10));
        assert_eq!(breaker.retry_after(), Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_force_state_and_reset() {
        let breaker = breaker_with_clock(3, Duration::from_secs(30), MockClock::new());

        breaker.force_state(CircuitState::Open);
        assert!(!breaker.can_execute());

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[tokio::test]
    async fn test_execute_records_outcomes() {
        let breaker = breaker_with_clock(2, Duration::from_secs(30), MockClock::new());

        let ok: ResilienceResult<u32, ClassifiedError> =
            breaker.execute(|| async { Ok(42) }).await;
        assert_eq!(ok.unwrap(), 42);

        for _ in 0..2 {
            let _res: ResilienceResult<u32, ClassifiedError> = breaker
                .execute(|| async { Err(ClassifiedError::transient("boom")) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected: ResilienceResult<u32, ClassifiedError> =
            breaker.execute(|| async { Ok(1) }).await;
        assert!(rejected.unwrap_err().is_circuit_open());
    }

    #[test]
    fn test_call_sync_path() {
        let breaker = breaker_with_clock(1, Duration::from_secs(30), MockClock::new());

        let res: ResilienceResult<&str, ClassifiedError> =
            breaker.call(|| Err(ClassifiedError::transient("down")));
        assert!(res.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected: ResilienceResult<&str, ClassifiedError> = breaker.call(|| Ok("fine"));
        assert!(rejected.unwrap_err().is_circuit_open());
    }

    #[test]
    fn test_metrics_follow_breaker_activity() {
        let breaker = breaker_with_clock(1, Duration::from_secs(30), MockClock::new());

        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.can_execute());
        // A rejected call is the caller's job to record via metrics; the
        // breaker records it on execute/call paths.

        let snap = breaker.metrics().snapshot();
        assert_eq!(snap.total_calls, 2);
        assert_eq!(snap.circuit_breaker_opens, 1);
    }
}
