//! Pure failure classification.
//!
//! [`ErrorClassifier`] is the single source of truth for "should this be
//! retried". It is stateless and side-effect free so the mapping can be
//! unit-tested in isolation from the retry machinery.

use std::error::Error as StdError;
use std::time::Duration;

use crate::error::{ClassifiedError, ErrorClass, ErrorClassification, HttpStatusError};

/// Stateless classifier mapping any error to an [`ErrorClass`].
///
/// Rules, in priority order:
/// 1. Errors tagged with [`ClassifiedError`] use their tag directly.
/// 2. An [`HttpStatusError`] classifies by status code (429 → rate limited,
///    5xx → transient, other 4xx → permanent).
/// 3. A `std::io::Error` anywhere in the source chain is transient
///    (connection/network level).
/// 4. Deterministic message heuristics catch stringly-typed transport
///    failures (rate-limit wording, timeouts, connection errors).
/// 5. Anything else is transient.
///
/// Unknown errors default to transient deliberately: retrying an unknown
/// failure is preferred over silently dropping it. The cost is that a
/// genuinely permanent bug may be retried until attempts are exhausted;
/// callers that know better should tag with [`ClassifiedError::permanent`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error, walking its `source()` chain.
    pub fn classify(error: &(dyn StdError + 'static)) -> ErrorClass {
        let mut current: Option<&(dyn StdError + 'static)> = Some(error);
        while let Some(err) = current {
            if let Some(class) = Self::classify_one(err) {
                return class;
            }
            current = err.source();
        }

        Self::classify_message(&error.to_string()).unwrap_or(ErrorClass::Transient)
    }

    /// Convenience wrapper for concrete error types.
    pub fn classify_err<E>(error: &E) -> ErrorClass
    where
        E: StdError + 'static,
    {
        Self::classify(error)
    }

    /// Server-suggested retry delay carried by the error, if any.
    ///
    /// Walks the `source()` chain like [`ErrorClassifier::classify`]; the
    /// first tagged error carrying a delay wins.
    pub fn retry_hint(error: &(dyn StdError + 'static)) -> Option<Duration> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(error);
        while let Some(err) = current {
            if let Some(tagged) = err.downcast_ref::<ClassifiedError>() {
                if let Some(delay) = tagged.retry_after() {
                    return Some(delay);
                }
            }
            current = err.source();
        }
        None
    }

    /// Convenience wrapper for concrete error types.
    pub fn retry_hint_err<E>(error: &E) -> Option<Duration>
    where
        E: StdError + 'static,
    {
        Self::retry_hint(error)
    }

    fn classify_one(error: &(dyn StdError + 'static)) -> Option<ErrorClass> {
        if let Some(tagged) = error.downcast_ref::<ClassifiedError>() {
            return Some(tagged.error_class());
        }
        if let Some(status) = error.downcast_ref::<HttpStatusError>() {
            return Some(status.error_class());
        }
        if error.downcast_ref::<std::io::Error>().is_some() {
            return Some(ErrorClass::Transient);
        }
        None
    }

    /// Deterministic substring heuristics for errors that only carry a
    /// message. Rate-limit wording is checked first so "429 too many
    /// requests, connection will be throttled" classifies as rate limited.
    fn classify_message(message: &str) -> Option<ErrorClass> {
        let lower = message.to_lowercase();

        const RATE_LIMIT: &[&str] = &["rate limit", "too many requests", "429", "quota exceeded"];
        const TRANSIENT: &[&str] =
            &["timed out", "timeout", "connection", "broken pipe", "temporarily unavailable"];

        if RATE_LIMIT.iter().any(|needle| lower.contains(needle)) {
            return Some(ErrorClass::RateLimited);
        }
        if TRANSIENT.iter().any(|needle| lower.contains(needle)) {
            return Some(ErrorClass::Transient);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use super::*;

    /// Opaque error with no useful structure, for the default path.
    #[derive(Debug)]
    struct OpaqueError(&'static str);

    impl fmt::Display for OpaqueError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for OpaqueError {}

    /// Wrapper error whose source is an io::Error.
    #[derive(Debug)]
    struct WrapsIo(std::io::Error);

    impl fmt::Display for WrapsIo {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "model call failed")
        }
    }

    impl std::error::Error for WrapsIo {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_tagged_error_wins() {
        let err = ClassifiedError::permanent("schema mismatch");
        assert_eq!(ErrorClassifier::classify_err(&err), ErrorClass::Permanent);
    }

    #[test]
    fn test_http_status_rules() {
        assert_eq!(
            ErrorClassifier::classify_err(&HttpStatusError::new(429, "slow down")),
            ErrorClass::RateLimited
        );
        assert_eq!(
            ErrorClassifier::classify_err(&HttpStatusError::new(502, "bad gateway")),
            ErrorClass::Transient
        );
        assert_eq!(
            ErrorClassifier::classify_err(&HttpStatusError::new(401, "no token")),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_io_error_is_transient() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(ErrorClassifier::classify_err(&err), ErrorClass::Transient);
    }

    #[test]
    fn test_source_chain_is_walked() {
        let err =
            WrapsIo(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer"));
        assert_eq!(ErrorClassifier::classify_err(&err), ErrorClass::Transient);
    }

    #[test]
    fn test_message_heuristics() {
        assert_eq!(
            ErrorClassifier::classify_err(&OpaqueError("upstream rate limit hit")),
            ErrorClass::RateLimited
        );
        assert_eq!(
            ErrorClassifier::classify_err(&OpaqueError("request timed out")),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_unknown_defaults_to_transient() {
        assert_eq!(
            ErrorClassifier::classify_err(&OpaqueError("something inexplicable")),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_retry_hint_from_tagged_error() {
        let hinted = ClassifiedError::rate_limited("quota", Some(Duration::from_secs(30)));
        assert_eq!(ErrorClassifier::retry_hint_err(&hinted), Some(Duration::from_secs(30)));

        let unhinted = ClassifiedError::rate_limited("quota", None);
        assert_eq!(ErrorClassifier::retry_hint_err(&unhinted), None);
        assert_eq!(ErrorClassifier::retry_hint_err(&OpaqueError("429")), None);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let err = OpaqueError("429 too many requests, connection throttled");
        let first = ErrorClassifier::classify_err(&err);
        let second = ErrorClassifier::classify_err(&err);
        assert_eq!(first, second);
        assert_eq!(first, ErrorClass::RateLimited);
    }
}
