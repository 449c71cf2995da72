//! Per-operation resilience metrics.
//!
//! One [`ResilienceMetrics`] instance is owned by each operation's circuit
//! breaker and updated on every attempt. Counters are atomic so concurrent
//! callers on the same operation never lose updates. Resetting metrics never
//! touches the breaker's open/closed state.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Mutable counters for a single operation.
#[derive(Debug, Default)]
pub struct ResilienceMetrics {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    retry_attempts: AtomicU64,
    circuit_breaker_opens: AtomicU64,
    circuit_breaker_half_opens: AtomicU64,
    circuit_breaker_closes: AtomicU64,
    last_success: RwLock<Option<DateTime<Utc>>>,
    last_failure: RwLock<Option<DateTime<Utc>>>,
}

impl ResilienceMetrics {
    /// Create a fresh, zeroed metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.successful_calls.fetch_add(1, Ordering::Relaxed);
        *self.last_success.write() = Some(Utc::now());
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.write() = Some(Utc::now());
    }

    /// Record a call rejected by an open circuit.
    ///
    /// Rejections count as failed calls so `total_calls ==
    /// successful_calls + failed_calls` holds for every observable call.
    pub fn record_rejection(&self) {
        self.record_failure();
    }

    /// Record one retry (an attempt beyond the first).
    pub fn record_retry(&self) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a CLOSED/HALF_OPEN → OPEN transition.
    pub fn record_open(&self) {
        self.circuit_breaker_opens.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an OPEN → HALF_OPEN transition.
    pub fn record_half_open(&self) {
        self.circuit_breaker_half_opens.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a HALF_OPEN → CLOSED transition.
    pub fn record_close(&self) {
        self.circuit_breaker_closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Success rate as a percentage; 0.0 when no calls have been made.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_calls.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let successes = self.successful_calls.load(Ordering::Relaxed);
        successes as f64 / total as f64 * 100.0
    }

    /// Total number of observed calls (attempts plus rejections).
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Number of retry attempts recorded.
    pub fn retry_attempts(&self) -> u64 {
        self.retry_attempts.load(Ordering::Relaxed)
    }

    /// Take a point-in-time snapshot for reporting.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
            circuit_breaker_opens: self.circuit_breaker_opens.load(Ordering::Relaxed),
            circuit_breaker_half_opens: self.circuit_breaker_half_opens.load(Ordering::Relaxed),
            circuit_breaker_closes: self.circuit_breaker_closes.load(Ordering::Relaxed),
            success_rate: self.success_rate(),
            last_success: *self.last_success.read(),
            last_failure: *self.last_failure.read(),
        }
    }

    /// Zero all counters and clear timestamps.
    ///
    /// The owning circuit breaker's state machine is unaffected.
    pub fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.successful_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
        self.retry_attempts.store(0, Ordering::Relaxed);
        self.circuit_breaker_opens.store(0, Ordering::Relaxed);
        self.circuit_breaker_half_opens.store(0, Ordering::Relaxed);
        self.circuit_breaker_closes.store(0, Ordering::Relaxed);
        *self.last_success.write() = None;
        *self.last_failure.write() = None;
    }
}

/// Serializable point-in-time view of [`ResilienceMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub retry_attempts: u64,
    pub circuit_breaker_opens: u64,
    pub circuit_breaker_half_opens: u64,
    pub circuit_breaker_closes: u64,
    /// Percentage in [0, 100].
    pub success_rate: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}
