//! Time abstraction so timeout-driven behavior is deterministically testable.
//!
//! Circuit breakers use real system time in production and controlled mock
//! time in tests, so recovery-timeout behavior can be verified without
//! actual delays.

use std::time::Instant;

use parking_lot::Mutex;
use std::sync::Arc;

/// Trait for monotonic time operations.
pub trait Clock: Send + Sync + 'static {
    /// Get the current instant (monotonic time).
    fn now(&self) -> Instant;
}

/// Real system clock for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Mock clock for deterministic testing.
///
/// Clones share the same underlying elapsed time, so a test can hold one
/// handle and advance time for a circuit breaker holding another.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<std::time::Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant.
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(std::time::Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration.
    pub fn advance(&self, duration: std::time::Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the mock clock by milliseconds (convenience method).
    pub fn advance_millis(&self, millis: u64) {
        self.advance(std::time::Duration::from_millis(millis));
    }

    /// Get the currently simulated elapsed time.
    pub fn elapsed(&self) -> std::time::Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock()
    }
}
