//! Classified retry with exponential backoff and jitter.
//!
//! [`RetryPolicy`] decides whether a failure is retried and how long to wait
//! before the next attempt. Decisions are driven by the failure's
//! [`ErrorClass`]: permanent failures are never retried, rate-limited
//! failures wait twice as long as ordinary transient ones.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::classify::ErrorClassifier;
use crate::config::RetryConfig;
use crate::error::{ErrorClass, ResilienceError, ResilienceResult};

/// Callback invoked before each retry, with the attempt number about to run
/// and the delay just waited.
pub type OnRetry = Arc<dyn Fn(u32, Duration) + Send + Sync>;

/// Outcome of a retry decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after waiting this long.
    Retry(Duration),
    /// Give up; the failure is terminal for this call.
    Stop,
}

/// Retry decision engine for one operation.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    on_retry: Option<OnRetry>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl RetryPolicy {
    /// Create a policy from a validated configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config, on_retry: None }
    }

    /// Attach an observer called before every retry.
    ///
    /// The callback is contained: a panic inside it is caught and logged,
    /// never aborting the retry loop.
    pub fn with_on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// The policy's configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether another attempt should be made after `attempt` (1-based)
    /// failed with a failure of `class`.
    pub fn should_retry(&self, attempt: u32, class: ErrorClass) -> bool {
        attempt < self.config.max_attempts && class.is_retryable()
    }

    /// Combined decision for a failed attempt: retry with a computed delay,
    /// or stop.
    pub fn decide(&self, attempt: u32, class: ErrorClass) -> RetryDecision {
        if self.should_retry(attempt, class) {
            RetryDecision::Retry(self.next_delay(attempt, class))
        } else {
            RetryDecision::Stop
        }
    }

    /// Delay before the retry that follows failed attempt `attempt`
    /// (1-based).
    ///
    /// Exponential: `base * multiplier^(attempt - 1)`, doubled for
    /// rate-limited failures, capped at `max_delay`, then jittered by a
    /// uniform factor in [0.5, 1.5) when enabled. Jitter can push the delay
    /// up to 1.5x the cap; the cap bounds the pre-jitter value.
    pub fn next_delay(&self, attempt: u32, class: ErrorClass) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let mut delay_ms =
            self.config.base_delay.as_millis() as f64 * self.config.multiplier.powi(exponent as i32);

        if class == ErrorClass::RateLimited {
            delay_ms *= 2.0;
        }

        delay_ms = delay_ms.min(self.config.max_delay.as_millis() as f64);

        if self.config.jitter {
            delay_ms *= rand::thread_rng().gen_range(0.5..1.5);
        }

        Duration::from_millis(delay_ms as u64)
    }

    /// Delay before the next retry, honoring a server-suggested delay.
    ///
    /// A delay carried by the failure itself (an HTTP `Retry-After`, a
    /// quota reset) replaces the computed backoff. It is still capped at
    /// `max_delay` and never jittered: the server named an exact time.
    pub fn next_delay_after(
        &self,
        attempt: u32,
        class: ErrorClass,
        server_hint: Option<Duration>,
    ) -> Duration {
        match server_hint {
            Some(hint) => hint.min(self.config.max_delay),
            None => self.next_delay(attempt, class),
        }
    }

    /// Run the on-retry callback, containing any panic it raises.
    pub(crate) fn notify(&self, next_attempt: u32, delay: Duration) {
        if let Some(callback) = &self.on_retry {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(next_attempt, delay)));
            if result.is_err() {
                warn!(attempt = next_attempt, "on-retry callback panicked, continuing");
            }
        }
    }

    /// Execute an async operation under this policy alone (no circuit
    /// breaker).
    ///
    /// Failures are classified with [`ErrorClassifier`]; permanent failures
    /// return immediately, retryable ones are retried with backoff until
    /// attempts are exhausted.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut attempt = 1u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let class = ErrorClassifier::classify_err(&error);
                    if class == ErrorClass::Permanent {
                        return Err(ResilienceError::Permanent { source: error });
                    }
                    if !self.should_retry(attempt, class) {
                        return Err(ResilienceError::RetriesExhausted {
                            attempts: attempt,
                            class,
                            source: error,
                        });
                    }

                    let hint = ErrorClassifier::retry_hint_err(&error);
                    let delay = self.next_delay_after(attempt, class, hint);
                    debug!(
                        attempt,
                        next_attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        %class,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    self.notify(attempt, delay);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
