//! Strategy presets and resilience configuration.
//!
//! A [`Strategy`] names one of four pre-tuned trade-offs between fast
//! failure detection and patience with a struggling dependency. Each maps to
//! a fixed bundle of retry and circuit-breaker parameters via
//! [`ResilienceConfig::for_strategy`]. Custom configurations are validated
//! on construction; invalid values fail loudly instead of being clamped.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ConfigError, ConfigResult};

/// Named resilience trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Fail fast, recover fast. Interactive paths where latency matters
    /// more than success rate.
    Aggressive,
    /// Moderate retries and thresholds. The default for typical service
    /// calls.
    Balanced,
    /// Few retries, long timeouts. Expensive operations, strict rate-limit
    /// regimes.
    Conservative,
    /// Maximum persistence. Operations that must eventually succeed.
    Critical,
}

impl Strategy {
    /// All strategies, in documentation order.
    pub const ALL: [Strategy; 4] =
        [Strategy::Aggressive, Strategy::Balanced, Strategy::Conservative, Strategy::Critical];

    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Aggressive => "aggressive",
            Strategy::Balanced => "balanced",
            Strategy::Conservative => "conservative",
            Strategy::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aggressive" => Ok(Strategy::Aggressive),
            "balanced" => Ok(Strategy::Balanced),
            "conservative" => Ok(Strategy::Conservative),
            "critical" => Ok(Strategy::Critical),
            other => Err(ConfigError::new("strategy", format!("unknown strategy '{other}'"))),
        }
    }
}

/// Retry behavior parameters.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first (>= 1; 1 disables retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
    /// Exponential growth factor (>= 1.0).
    pub multiplier: f64,
    /// Whether to randomize delays to avoid thundering herds.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::new("max_attempts", "must be at least 1"));
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::new("multiplier", "must be at least 1.0"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::new("max_delay", "must be at least base_delay"));
        }
        Ok(())
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Complete resilience configuration for one operation.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// The strategy this configuration was derived from.
    pub strategy: Strategy,
    /// Retry parameters.
    pub retry: RetryConfig,
    /// Circuit breaker parameters.
    pub circuit_breaker: CircuitBreakerConfig,
    /// When false, failures are not retried (breaker still applies).
    pub enable_retry: bool,
    /// When false, calls are never gated or counted by the breaker.
    pub enable_circuit_breaker: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self::for_strategy(Strategy::Balanced)
    }
}

impl ResilienceConfig {
    /// The pre-tuned parameter bundle for a strategy.
    pub fn for_strategy(strategy: Strategy) -> Self {
        let (retry, circuit_breaker) = match strategy {
            Strategy::Aggressive => (
                RetryConfig {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(100),
                    max_delay: Duration::from_secs(5),
                    multiplier: 2.0,
                    jitter: true,
                },
                CircuitBreakerConfig {
                    failure_threshold: 3,
                    recovery_timeout: Duration::from_secs(15),
                    half_open_max_calls: 2,
                },
            ),
            Strategy::Balanced => (
                RetryConfig {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(500),
                    max_delay: Duration::from_secs(10),
                    multiplier: 2.0,
                    jitter: true,
                },
                CircuitBreakerConfig {
                    failure_threshold: 5,
                    recovery_timeout: Duration::from_secs(60),
                    half_open_max_calls: 1,
                },
            ),
            Strategy::Conservative => (
                RetryConfig {
                    max_attempts: 2,
                    base_delay: Duration::from_secs(1),
                    max_delay: Duration::from_secs(30),
                    multiplier: 2.0,
                    jitter: true,
                },
                CircuitBreakerConfig {
                    failure_threshold: 10,
                    recovery_timeout: Duration::from_secs(120),
                    half_open_max_calls: 1,
                },
            ),
            Strategy::Critical => (
                RetryConfig {
                    max_attempts: 5,
                    base_delay: Duration::from_millis(500),
                    max_delay: Duration::from_secs(60),
                    multiplier: 2.0,
                    jitter: true,
                },
                CircuitBreakerConfig {
                    failure_threshold: 15,
                    recovery_timeout: Duration::from_secs(120),
                    half_open_max_calls: 3,
                },
            ),
        };

        Self { strategy, retry, circuit_breaker, enable_retry: true, enable_circuit_breaker: true }
    }

    /// Build a custom configuration, validating both halves.
    pub fn custom(
        retry: RetryConfig,
        circuit_breaker: CircuitBreakerConfig,
    ) -> ConfigResult<Self> {
        retry.validate()?;
        circuit_breaker.validate()?;
        Ok(Self {
            strategy: Strategy::Balanced,
            retry,
            circuit_breaker,
            enable_retry: true,
            enable_circuit_breaker: true,
        })
    }

    /// Disable retries, keeping the breaker.
    pub fn without_retry(mut self) -> Self {
        self.enable_retry = false;
        self
    }

    /// Disable the circuit breaker, keeping retries.
    pub fn without_circuit_breaker(mut self) -> Self {
        self.enable_circuit_breaker = false;
        self
    }
}

/// Per-operation entry in an external settings document.
///
/// Every field beyond `strategy` is an optional override applied on top of
/// the strategy's bundle. Field names are a closed whitelist
/// (`deny_unknown_fields`), so typos fail the entry instead of being
/// silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct OperationSettings {
    strategy: Strategy,
    #[serde(default)]
    enable_retry: Option<bool>,
    #[serde(default)]
    enable_circuit_breaker: Option<bool>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    base_delay_ms: Option<u64>,
    #[serde(default)]
    max_delay_ms: Option<u64>,
    #[serde(default)]
    multiplier: Option<f64>,
    #[serde(default)]
    failure_threshold: Option<u32>,
    #[serde(default)]
    recovery_timeout_secs: Option<u64>,
    #[serde(default)]
    half_open_max_calls: Option<u32>,
}

impl OperationSettings {
    /// Apply this entry on top of its strategy bundle, range-checking the
    /// result. Out-of-range overrides fail the whole entry.
    fn resolve(&self) -> ConfigResult<ResilienceConfig> {
        let mut config = ResilienceConfig::for_strategy(self.strategy);

        if let Some(enable) = self.enable_retry {
            config.enable_retry = enable;
        }
        if let Some(enable) = self.enable_circuit_breaker {
            config.enable_circuit_breaker = enable;
        }
        if let Some(attempts) = self.max_attempts {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = self.base_delay_ms {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = self.multiplier {
            config.retry.multiplier = multiplier;
        }
        if let Some(threshold) = self.failure_threshold {
            config.circuit_breaker.failure_threshold = threshold;
        }
        if let Some(secs) = self.recovery_timeout_secs {
            config.circuit_breaker.recovery_timeout = Duration::from_secs(secs);
        }
        if let Some(calls) = self.half_open_max_calls {
            config.circuit_breaker.half_open_max_calls = calls;
        }

        config.retry.validate()?;
        config.circuit_breaker.validate()?;
        Ok(config)
    }
}

/// External per-operation strategy overrides, loaded from JSON.
///
/// Degrades instead of failing: a structurally malformed document loads
/// nothing, and a malformed or out-of-range entry falls back to Balanced
/// for that operation, both with a warning. The system must keep running
/// on defaults rather than crash on bad config.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    operations: std::collections::HashMap<String, ResilienceConfig>,
}

impl OrchestratorSettings {
    /// Parse settings from a JSON document of the form
    /// `{"operations": {"name": {"strategy": "balanced", ...overrides}}}`.
    pub fn from_json(raw: &str) -> Self {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Document {
            #[serde(default)]
            operations: std::collections::HashMap<String, serde_json::Value>,
        }

        let doc = match serde_json::from_str::<Document>(raw) {
            Ok(doc) => doc,
            Err(error) => {
                warn!(%error, "malformed resilience settings, using defaults");
                return Self::default();
            }
        };

        let mut operations = std::collections::HashMap::new();
        for (name, value) in doc.operations {
            let config = match serde_json::from_value::<OperationSettings>(value) {
                Ok(entry) => match entry.resolve() {
                    Ok(config) => config,
                    Err(error) => {
                        warn!(operation = %name, %error, "out-of-range settings entry, using balanced");
                        ResilienceConfig::default()
                    }
                },
                Err(error) => {
                    warn!(operation = %name, %error, "malformed settings entry, using balanced");
                    ResilienceConfig::default()
                }
            };
            operations.insert(name, config);
        }
        Self { operations }
    }

    /// Resolve the configuration for an operation, if the document names it.
    pub fn config_for(&self, operation: &str) -> Option<ResilienceConfig> {
        self.operations.get(operation).cloned()
    }

    /// Number of operations the document names.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the document names any operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
