//! Orchestrator composing classification, retry, and circuit breaking.
//!
//! One [`Orchestrator`] instance serves a whole process. It keeps a circuit
//! breaker per named operation (created lazily, shared across concurrent
//! callers) and runs each call through the full pipeline: breaker gate,
//! attempt, classification, backoff, retry. Metrics accumulate per
//! operation and are reported through [`Orchestrator::get_all_metrics`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
use crate::classify::ErrorClassifier;
use crate::clock::{Clock, SystemClock};
use crate::config::{OrchestratorSettings, ResilienceConfig, Strategy};
use crate::error::{ErrorClass, ResilienceError, ResilienceResult};
use crate::metrics::{MetricsSnapshot, ResilienceMetrics};
use crate::retry::RetryPolicy;

/// Per-call configuration overrides.
///
/// Resolution order for an operation's effective configuration:
/// custom config, then per-call strategy, then external settings, then the
/// strategy registered for the operation, then [`Strategy::Balanced`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    strategy: Option<Strategy>,
    custom: Option<ResilienceConfig>,
}

impl CallOptions {
    /// No overrides; resolution falls through to registration and defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific strategy for this call.
    pub fn strategy(strategy: Strategy) -> Self {
        Self { strategy: Some(strategy), custom: None }
    }

    /// Use a fully custom configuration for this call.
    pub fn custom(config: ResilienceConfig) -> Self {
        Self { strategy: None, custom: Some(config) }
    }
}

/// Aggregated totals across all operations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsTotals {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub retry_attempts: u64,
}

/// Report entry for one operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub metrics: MetricsSnapshot,
    pub circuit_breaker: CircuitBreakerSnapshot,
}

/// Full metrics report across every operation the orchestrator has seen.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub generated_at: DateTime<Utc>,
    pub operations: BTreeMap<String, OperationReport>,
    pub totals: MetricsTotals,
}

/// Health summary derived from circuit breaker states.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// True when no breaker is open.
    pub healthy: bool,
    pub open_operations: Vec<String>,
    pub half_open_operations: Vec<String>,
    pub total_operations: usize,
    pub timestamp: DateTime<Utc>,
}

/// Records a breaker failure if an in-flight attempt is dropped before its
/// outcome was recorded, so a cancelled future cannot leave the failure
/// count understating reality.
struct AttemptGuard<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    gated: bool,
    armed: bool,
}

impl<'a, C: Clock> AttemptGuard<'a, C> {
    fn new(breaker: &'a CircuitBreaker<C>, gated: bool) -> Self {
        Self { breaker, gated, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<C: Clock> Drop for AttemptGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                operation = %self.breaker.operation(),
                "attempt dropped mid-flight, recording as failure"
            );
            if self.gated {
                self.breaker.record_failure();
            } else {
                self.breaker.metrics().record_failure();
            }
        }
    }
}

/// Process-wide resilience entry point.
///
/// Cheap to share behind an `Arc`; all interior state is concurrent.
pub struct Orchestrator<C: Clock + Clone = SystemClock> {
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    registered: DashMap<String, Strategy>,
    settings: OrchestratorSettings,
    clock: C,
}

impl Orchestrator<SystemClock> {
    /// Create an orchestrator using the system clock and no external
    /// settings.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Create an orchestrator with external per-operation settings.
    pub fn with_settings(settings: OrchestratorSettings) -> Self {
        let mut orchestrator = Self::new();
        orchestrator.settings = settings;
        orchestrator
    }
}

impl Default for Orchestrator<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> Orchestrator<C> {
    /// Create an orchestrator with a custom clock (useful for testing).
    pub fn with_clock(clock: C) -> Self {
        Self {
            breakers: DashMap::new(),
            registered: DashMap::new(),
            settings: OrchestratorSettings::default(),
            clock,
        }
    }

    /// Replace the external settings document.
    pub fn set_settings(&mut self, settings: OrchestratorSettings) {
        self.settings = settings;
    }

    /// Register a default strategy for an operation.
    ///
    /// Idempotent; re-registering overwrites the previous strategy.
    pub fn register_operation<S: Into<String>>(&self, operation: S, strategy: Strategy) {
        let operation = operation.into();
        if let Some(previous) = self.registered.insert(operation.clone(), strategy) {
            if previous != strategy {
                info!(%operation, from = %previous, to = %strategy, "operation re-registered");
            }
        } else {
            debug!(%operation, %strategy, "operation registered");
        }
    }

    /// The strategy registered for an operation, if any.
    pub fn registered_strategy(&self, operation: &str) -> Option<Strategy> {
        self.registered.get(operation).map(|entry| *entry)
    }

    fn resolve_config(&self, operation: &str, options: &CallOptions) -> ResilienceConfig {
        if let Some(custom) = &options.custom {
            return custom.clone();
        }
        if let Some(strategy) = options.strategy {
            return ResilienceConfig::for_strategy(strategy);
        }
        if let Some(config) = self.settings.config_for(operation) {
            return config;
        }
        if let Some(strategy) = self.registered_strategy(operation) {
            return ResilienceConfig::for_strategy(strategy);
        }
        ResilienceConfig::default()
    }

    /// The breaker for an operation, created on first use.
    ///
    /// The breaker's configuration is fixed at creation; later calls with
    /// different options change retry behavior but not breaker thresholds.
    fn breaker_for(&self, operation: &str, config: &ResilienceConfig) -> Arc<CircuitBreaker<C>> {
        if let Some(existing) = self.breakers.get(operation) {
            return Arc::clone(&existing);
        }
        let entry = self.breakers.entry(operation.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::with_clock_unchecked(
                operation,
                config.circuit_breaker.clone(),
                self.clock.clone(),
            ))
        });
        Arc::clone(&entry)
    }

    /// Execute an async operation with full resilience protection.
    ///
    /// The operation closure is called once per attempt. Failures are
    /// classified; permanent ones return immediately, retryable ones are
    /// retried with backoff until attempts are exhausted or the breaker
    /// opens.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: &str,
        options: CallOptions,
        mut attempt_fn: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let config = self.resolve_config(operation, &options);
        let breaker = self.breaker_for(operation, &config);
        let policy = RetryPolicy::new(config.retry.clone());
        let gated = config.enable_circuit_breaker;
        let metrics = breaker.metrics();

        let mut attempt = 1u32;
        loop {
            if gated && !breaker.can_execute() {
                metrics.record_rejection();
                debug!(%operation, "call rejected by open circuit");
                return Err(ResilienceError::CircuitOpen {
                    operation: operation.to_string(),
                    retry_after: breaker.retry_after(),
                });
            }

            let mut guard = AttemptGuard::new(&breaker, gated);
            let outcome = attempt_fn().await;
            guard.disarm();
            drop(guard);

            match outcome {
                Ok(value) => {
                    if gated {
                        breaker.record_success();
                    } else {
                        metrics.record_success();
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let class = ErrorClassifier::classify_err(&error);
                    if gated {
                        breaker.record_failure();
                    } else {
                        metrics.record_failure();
                    }

                    if class == ErrorClass::Permanent {
                        debug!(%operation, attempt, "permanent failure, not retrying");
                        return Err(ResilienceError::Permanent { source: error });
                    }
                    if !config.enable_retry || !policy.should_retry(attempt, class) {
                        warn!(%operation, attempts = attempt, %class, "retries exhausted");
                        return Err(ResilienceError::RetriesExhausted {
                            attempts: attempt,
                            class,
                            source: error,
                        });
                    }

                    let hint = ErrorClassifier::retry_hint_err(&error);
                    let delay = policy.next_delay_after(attempt, class, hint);
                    debug!(
                        %operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %class,
                        "backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    metrics.record_retry();
                    policy.notify(attempt, delay);
                }
            }
        }
    }

    /// Execute with a fallback that runs after any terminal failure.
    ///
    /// The fallback runs exactly once and is never retried; its own failure
    /// surfaces as [`ResilienceError::FallbackFailed`].
    pub async fn execute_with_fallback<F, Fut, FB, FbFut, T, E>(
        &self,
        operation: &str,
        options: CallOptions,
        attempt_fn: F,
        fallback: FB,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        match self.execute(operation, options, attempt_fn).await {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(%operation, %error, "primary path failed, running fallback");
                match fallback().await {
                    Ok(value) => Ok(value),
                    Err(fallback_error) => {
                        Err(ResilienceError::FallbackFailed { source: fallback_error })
                    }
                }
            }
        }
    }

    /// Synchronous alternative to [`Orchestrator::execute`].
    ///
    /// Blocks the calling thread during backoff; use from non-async code
    /// only.
    pub fn call<F, T, E>(
        &self,
        operation: &str,
        options: CallOptions,
        mut attempt_fn: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let config = self.resolve_config(operation, &options);
        let breaker = self.breaker_for(operation, &config);
        let policy = RetryPolicy::new(config.retry.clone());
        let gated = config.enable_circuit_breaker;
        let metrics = breaker.metrics();

        let mut attempt = 1u32;
        loop {
            if gated && !breaker.can_execute() {
                metrics.record_rejection();
                debug!(%operation, "call rejected by open circuit");
                return Err(ResilienceError::CircuitOpen {
                    operation: operation.to_string(),
                    retry_after: breaker.retry_after(),
                });
            }

            match attempt_fn() {
                Ok(value) => {
                    if gated {
                        breaker.record_success();
                    } else {
                        metrics.record_success();
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let class = ErrorClassifier::classify_err(&error);
                    if gated {
                        breaker.record_failure();
                    } else {
                        metrics.record_failure();
                    }

                    if class == ErrorClass::Permanent {
                        return Err(ResilienceError::Permanent { source: error });
                    }
                    if !config.enable_retry || !policy.should_retry(attempt, class) {
                        warn!(%operation, attempts = attempt, %class, "retries exhausted");
                        return Err(ResilienceError::RetriesExhausted {
                            attempts: attempt,
                            class,
                            source: error,
                        });
                    }

                    let hint = ErrorClassifier::retry_hint_err(&error);
                    let delay = policy.next_delay_after(attempt, class, hint);
                    std::thread::sleep(delay);
                    attempt += 1;
                    metrics.record_retry();
                    policy.notify(attempt, delay);
                }
            }
        }
    }

    /// Synchronous alternative to [`Orchestrator::execute_with_fallback`].
    pub fn call_with_fallback<F, FB, T, E>(
        &self,
        operation: &str,
        options: CallOptions,
        attempt_fn: F,
        fallback: FB,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
        FB: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        match self.call(operation, options, attempt_fn) {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(%operation, %error, "primary path failed, running fallback");
                fallback().map_err(|fallback_error| ResilienceError::FallbackFailed {
                    source: fallback_error,
                })
            }
        }
    }

    /// Bind an operation name and options into a reusable handle.
    pub fn wrap<'a, S: Into<String>>(&'a self, operation: S, options: CallOptions) -> Wrapped<'a, C> {
        Wrapped { orchestrator: self, operation: operation.into(), options }
    }

    /// The breaker handle for an operation, if one has been created.
    pub fn breaker(&self, operation: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.get(operation).map(|entry| Arc::clone(&entry))
    }

    /// Current breaker state for an operation, if one has been created.
    pub fn circuit_state(&self, operation: &str) -> Option<CircuitState> {
        self.breakers.get(operation).map(|entry| entry.state())
    }

    /// Metrics snapshot for one operation, if it has been called.
    pub fn get_metrics(&self, operation: &str) -> Option<MetricsSnapshot> {
        self.breakers.get(operation).map(|entry| entry.metrics().snapshot())
    }

    /// Metrics handle for one operation, creating its breaker if needed.
    pub fn metrics_for(&self, operation: &str, options: &CallOptions) -> Arc<ResilienceMetrics> {
        let config = self.resolve_config(operation, options);
        self.breaker_for(operation, &config).metrics()
    }

    /// Full report across every operation seen so far.
    pub fn get_all_metrics(&self) -> MetricsReport {
        let mut operations = BTreeMap::new();
        let mut totals = MetricsTotals::default();

        for entry in self.breakers.iter() {
            let metrics = entry.metrics().snapshot();
            totals.total_calls += metrics.total_calls;
            totals.successful_calls += metrics.successful_calls;
            totals.failed_calls += metrics.failed_calls;
            totals.retry_attempts += metrics.retry_attempts;
            operations.insert(
                entry.key().clone(),
                OperationReport { metrics, circuit_breaker: entry.snapshot() },
            );
        }

        MetricsReport { generated_at: Utc::now(), operations, totals }
    }

    /// Reset metrics for one operation, or all of them.
    ///
    /// Breaker states are untouched; an open circuit stays open.
    pub fn reset_metrics(&self, operation: Option<&str>) {
        match operation {
            Some(name) => {
                if let Some(entry) = self.breakers.get(name) {
                    entry.metrics().reset();
                }
            }
            None => {
                for entry in self.breakers.iter() {
                    entry.metrics().reset();
                }
            }
        }
    }

    /// Reset one operation's breaker to CLOSED.
    pub fn reset_breaker(&self, operation: &str) {
        if let Some(entry) = self.breakers.get(operation) {
            entry.reset();
        }
    }

    /// Whether every breaker is currently closed or probing.
    pub fn is_healthy(&self) -> bool {
        self.breakers.iter().all(|entry| entry.state() != CircuitState::Open)
    }

    /// Health summary across all operations.
    pub fn get_health_status(&self) -> HealthStatus {
        let mut open_operations = Vec::new();
        let mut half_open_operations = Vec::new();
        let mut total_operations = 0usize;

        for entry in self.breakers.iter() {
            total_operations += 1;
            match entry.state() {
                CircuitState::Open => open_operations.push(entry.key().clone()),
                CircuitState::HalfOpen => half_open_operations.push(entry.key().clone()),
                CircuitState::Closed => {}
            }
        }
        open_operations.sort();
        half_open_operations.sort();

        HealthStatus {
            healthy: open_operations.is_empty(),
            open_operations,
            half_open_operations,
            total_operations,
            timestamp: Utc::now(),
        }
    }
}

/// An operation name and options bound to an orchestrator.
///
/// Lets call sites hold one handle instead of repeating the name and
/// options on every call.
pub struct Wrapped<'a, C: Clock + Clone = SystemClock> {
    orchestrator: &'a Orchestrator<C>,
    operation: String,
    options: CallOptions,
}

impl<'a, C: Clock + Clone> Wrapped<'a, C> {
    /// The bound operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Execute an async attempt through the bound configuration.
    pub async fn execute<F, Fut, T, E>(&self, attempt_fn: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.orchestrator.execute(&self.operation, self.options.clone(), attempt_fn).await
    }

    /// Execute with a fallback through the bound configuration.
    pub async fn execute_with_fallback<F, Fut, FB, FbFut, T, E>(
        &self,
        attempt_fn: F,
        fallback: FB,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.orchestrator
            .execute_with_fallback(&self.operation, self.options.clone(), attempt_fn, fallback)
            .await
    }

    /// Synchronous alternative to [`Wrapped::execute`].
    pub fn call<F, T, E>(&self, attempt_fn: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.orchestrator.call(&self.operation, self.options.clone(), attempt_fn)
    }

    /// Synchronous alternative to [`Wrapped::execute_with_fallback`].
    pub fn call_with_fallback<F, FB, T, E>(
        &self,
        attempt_fn: F,
        fallback: FB,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
        FB: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.orchestrator
            .call_with_fallback(&self.operation, self.options.clone(), attempt_fn, fallback)
    }
}
