//! Resilience orchestration for unreliable dependencies.
//!
//! Wraps calls to external services with classified retries, exponential
//! backoff, and per-operation circuit breakers, composed behind a single
//! [`Orchestrator`] entry point. Strategy presets trade failure-detection
//! speed against patience, and [`PresetManager`] can recommend one from the
//! detected deployment environment.
//!
//! # Quick start
//!
//! ```no_run
//! use aegis_resilience::{CallOptions, Orchestrator, ResilienceResult, Strategy};
//!
//! # async fn demo() -> ResilienceResult<String, std::io::Error> {
//! let orchestrator = Orchestrator::new();
//! orchestrator.register_operation("fetch-profile", Strategy::Balanced);
//!
//! orchestrator
//!     .execute("fetch-profile", CallOptions::new(), || async {
//!         // call the flaky dependency here
//!         Ok("profile".to_string())
//!     })
//!     .await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod circuit_breaker;
pub mod classify;
pub mod clock;
pub mod config;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod preset;
pub mod retry;

// Re-export commonly used types for convenience
// ------------------------------
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerSnapshot,
    CircuitState,
};
pub use classify::ErrorClassifier;
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{
    OrchestratorSettings, ResilienceConfig, RetryConfig, RetryConfigBuilder, Strategy,
};
pub use environment::{
    ConfidenceTuning, DetectedEnvironment, DetectionResult, EnvironmentDetector, EnvironmentProbe,
    MockProbe, SystemProbe,
};
pub use error::{
    ClassifiedError, ConfigError, ConfigResult, ErrorClass, ErrorClassification, HttpStatusError,
    ResilienceError, ResilienceResult,
};
pub use metrics::{MetricsSnapshot, ResilienceMetrics};
pub use orchestrator::{
    CallOptions, HealthStatus, MetricsReport, MetricsTotals, OperationReport, Orchestrator,
    Wrapped,
};
pub use preset::{EnvironmentRecommendation, PresetManager, ResiliencePreset};
pub use retry::{OnRetry, RetryDecision, RetryPolicy};
