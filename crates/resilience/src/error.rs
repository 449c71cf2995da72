//! Error taxonomy for the resilience layer.
//!
//! Every failure observed by the orchestrator falls into one of four classes
//! ([`ErrorClass`]) which drive the retry/no-retry decision:
//!
//! | Class | Retried | Typical causes |
//! |-------|---------|----------------|
//! | `Transient` | yes | timeouts, connection resets, HTTP 5xx |
//! | `RateLimited` | yes, stronger backoff | HTTP 429, quota errors |
//! | `ServiceUnavailable` | yes | open circuit, unreachable dependency |
//! | `Permanent` | never | HTTP 4xx, validation failures |
//!
//! Callers that already know how their error should be treated can tag it
//! with [`ClassifiedError`]; the classifier honors the tag over any
//! heuristic.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failure, driving the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Expected to succeed if retried (timeouts, 5xx, connection errors).
    Transient,
    /// Will not succeed on retry (4xx client errors, validation failures).
    Permanent,
    /// Retryable, but the dependency asked us to slow down (429).
    RateLimited,
    /// The dependency is down or our own circuit breaker says so.
    ServiceUnavailable,
}

impl ErrorClass {
    /// Whether a failure of this class is eligible for retry.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::ServiceUnavailable => write!(f, "service_unavailable"),
        }
    }
}

/// Standard interface for errors that know their own classification.
pub trait ErrorClassification {
    /// The class this error belongs to.
    fn error_class(&self) -> ErrorClass;

    /// Whether the error is retryable.
    fn is_retryable(&self) -> bool {
        self.error_class().is_retryable()
    }

    /// Suggested delay before retrying, if the error carries one.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// An error explicitly tagged with its classification.
///
/// The classifier uses the tag directly, bypassing all heuristics, so this
/// is the escape hatch for callers whose failures don't look like network
/// or HTTP errors.
#[derive(Debug, Clone, Error)]
#[error("{class} error: {message}")]
pub struct ClassifiedError {
    class: ErrorClass,
    message: String,
    retry_after: Option<Duration>,
}

impl ClassifiedError {
    /// Create a tagged error with an arbitrary class.
    pub fn new<S: Into<String>>(class: ErrorClass, message: S) -> Self {
        Self { class, message: message.into(), retry_after: None }
    }

    /// Tag an error as transient (retry-eligible).
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    /// Tag an error as permanent (never retried).
    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorClass::Permanent, message)
    }

    /// Tag an error as rate-limited, optionally carrying the server's
    /// suggested delay.
    pub fn rate_limited<S: Into<String>>(message: S, retry_after: Option<Duration>) -> Self {
        Self { class: ErrorClass::RateLimited, message: message.into(), retry_after }
    }

    /// Tag an error as service-unavailable.
    pub fn service_unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorClass::ServiceUnavailable, message)
    }

    /// The class this error was tagged with.
    pub fn class(&self) -> ErrorClass {
        self.class
    }
}

impl ErrorClassification for ClassifiedError {
    fn error_class(&self) -> ErrorClass {
        self.class
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// An error carrying an explicit HTTP status code.
///
/// Transport adapters wrap upstream responses in this type so the classifier
/// can apply the status-code rules (429 → rate limited, 5xx → transient,
/// other 4xx → permanent).
#[derive(Debug, Clone, Error)]
#[error("HTTP {status}: {message}")]
pub struct HttpStatusError {
    status: u16,
    message: String,
}

impl HttpStatusError {
    /// Create a status-code error.
    pub fn new<S: Into<String>>(status: u16, message: S) -> Self {
        Self { status, message: message.into() }
    }

    /// The HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }
}

impl ErrorClassification for HttpStatusError {
    fn error_class(&self) -> ErrorClass {
        match self.status {
            429 => ErrorClass::RateLimited,
            500..=599 => ErrorClass::Transient,
            400..=499 => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        }
    }
}

/// Configuration validation error.
///
/// Invalid parameters fail construction; nothing is silently clamped.
#[derive(Debug, Clone, Error)]
#[error("invalid configuration for '{field}': {message}")]
pub struct ConfigError {
    /// Name of the offending field.
    pub field: &'static str,
    /// What was wrong with it.
    pub message: String,
}

impl ConfigError {
    pub(crate) fn new<S: Into<String>>(field: &'static str, message: S) -> Self {
        Self { field, message: message.into() }
    }
}

/// Result type for configuration construction.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Terminal errors produced by a resilience-wrapped operation.
///
/// Generic over the wrapped operation's error type `E` so the original
/// failure is preserved as the `source`.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The operation's circuit breaker is open; the call never ran.
    ///
    /// Reported distinctly from an operation failure so operators can tell
    /// "service down per our own detection" from "service call failed".
    #[error("circuit breaker open for operation '{operation}'")]
    CircuitOpen {
        /// Operation whose breaker rejected the call.
        operation: String,
        /// Time remaining until the breaker re-evaluates, if known.
        retry_after: Option<Duration>,
    },

    /// All retry attempts were exhausted on retryable failures.
    #[error("retries exhausted after {attempts} attempts (last failure was {class})")]
    RetriesExhausted {
        /// Number of attempts actually made.
        attempts: u32,
        /// Classification of the final failure.
        class: ErrorClass,
        /// The final failure.
        #[source]
        source: E,
    },

    /// The first failure was permanent; no retries were made.
    #[error("permanent failure, not retried")]
    Permanent {
        /// The underlying failure.
        #[source]
        source: E,
    },

    /// The operation failed once, with no retry policy involved.
    ///
    /// Produced by bare circuit-breaker calls that run outside the retry
    /// machinery.
    #[error("operation failed")]
    OperationFailed {
        /// The underlying failure.
        #[source]
        source: E,
    },

    /// The caller-supplied fallback itself failed.
    ///
    /// Propagated as-is; fallbacks are never retried.
    #[error("fallback failed")]
    FallbackFailed {
        /// The fallback's failure.
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether this terminal error was produced by an open circuit rather
    /// than by running the operation.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Consume the error and return the underlying operation error, if any.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::CircuitOpen { .. } => None,
            Self::RetriesExhausted { source, .. }
            | Self::Permanent { source }
            | Self::OperationFailed { source }
            | Self::FallbackFailed { source } => Some(source),
        }
    }
}

/// Result type for resilience-wrapped operations.
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_class_retryability() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(ErrorClass::RateLimited.is_retryable());
        assert!(ErrorClass::ServiceUnavailable.is_retryable());
        assert!(!ErrorClass::Permanent.is_retryable());
    }

    #[test]
    fn test_error_class_display() {
        assert_eq!(ErrorClass::Transient.to_string(), "transient");
        assert_eq!(ErrorClass::RateLimited.to_string(), "rate_limited");
    }

    #[test]
    fn test_classified_error_carries_tag() {
        let err = ClassifiedError::permanent("bad request body");
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad request body"));
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let err = ClassifiedError::rate_limited("quota", Some(Duration::from_secs(30)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_http_status_classification() {
        assert_eq!(HttpStatusError::new(429, "slow down").error_class(), ErrorClass::RateLimited);
        assert_eq!(HttpStatusError::new(503, "down").error_class(), ErrorClass::Transient);
        assert_eq!(HttpStatusError::new(404, "missing").error_class(), ErrorClass::Permanent);
        assert_eq!(HttpStatusError::new(302, "moved").error_class(), ErrorClass::Transient);
    }

    #[test]
    fn test_resilience_error_into_source() {
        let err: ResilienceError<ClassifiedError> = ResilienceError::Permanent {
            source: ClassifiedError::permanent("nope"),
        };
        assert!(err.into_source().is_some());

        let open: ResilienceError<ClassifiedError> =
            ResilienceError::CircuitOpen { operation: "x".into(), retry_after: None };
        assert!(open.is_circuit_open());
        assert!(open.into_source().is_none());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::new("failure_threshold", "must be between 1 and 100");
        assert!(err.to_string().contains("failure_threshold"));
        assert!(err.to_string().contains("between 1 and 100"));
    }
}
