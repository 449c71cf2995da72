//! Deployment environment detection.
//!
//! Inspects the process environment through an injectable
//! [`EnvironmentProbe`] and produces a deterministic, confidence-scored
//! guess at where the process is running. Signals in descending trust:
//!
//! 1. an explicit caller hint,
//! 2. well-known environment variables,
//! 3. hostname naming patterns,
//! 4. filesystem markers (Kubernetes service account, `.dockerenv`, `.git`).
//!
//! Agreement between signals raises confidence, disagreement lowers it, and
//! confidence never reaches 1.0 since detection is always a guess.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

/// Environment variables consulted for detection, most trusted first.
const ENV_VAR_HIERARCHY: [&str; 5] =
    ["AEGIS_ENV", "DEPLOYMENT_ENV", "APP_ENV", "ENVIRONMENT", "NODE_ENV"];

/// Detected deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedEnvironment {
    Development,
    Staging,
    Production,
}

impl fmt::Display for DetectedEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl DetectedEnvironment {
    fn from_value(value: &str) -> Option<Self> {
        let lower = value.trim().to_lowercase();
        match lower.as_str() {
            "prod" | "production" => Some(Self::Production),
            "stage" | "staging" | "preprod" => Some(Self::Staging),
            "dev" | "development" | "local" | "test" => Some(Self::Development),
            _ => None,
        }
    }

    /// Tie-break ordering: ambiguity resolves toward the more
    /// production-like environment.
    fn caution_rank(self) -> u8 {
        match self {
            Self::Development => 0,
            Self::Staging => 1,
            Self::Production => 2,
        }
    }

    fn from_hostname(hostname: &str) -> Option<Self> {
        let lower = hostname.to_lowercase();
        if lower.contains("prod") {
            Some(Self::Production)
        } else if lower.contains("staging") || lower.contains("stage") {
            Some(Self::Staging)
        } else if lower.contains("dev") || lower.contains("local") {
            Some(Self::Development)
        } else {
            None
        }
    }
}

/// Read-only view of the process environment, injectable for tests.
pub trait EnvironmentProbe: Send + Sync {
    /// Value of an environment variable, if set and non-empty.
    fn env_var(&self, name: &str) -> Option<String>;

    /// The machine's hostname, if discoverable.
    fn hostname(&self) -> Option<String>;

    /// Whether a filesystem path exists.
    fn path_exists(&self, path: &Path) -> bool;
}

/// Probe backed by the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl EnvironmentProbe for SystemProbe {
    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|value| !value.trim().is_empty())
    }

    fn hostname(&self) -> Option<String> {
        if let Some(name) = self.env_var("HOSTNAME") {
            return Some(name);
        }
        std::fs::read_to_string("/etc/hostname")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Fully scripted probe for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    env_vars: HashMap<String, String>,
    hostname: Option<String>,
    existing_paths: HashSet<PathBuf>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env_var<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.env_vars.insert(name.into(), value.into());
        self
    }

    pub fn with_hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_existing_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.existing_paths.insert(path.into());
        self
    }
}

impl EnvironmentProbe for MockProbe {
    fn env_var(&self, name: &str) -> Option<String> {
        self.env_vars.get(name).cloned()
    }

    fn hostname(&self) -> Option<String> {
        self.hostname.clone()
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.existing_paths.contains(path)
    }
}

/// Per-source confidence weights.
///
/// Confidence saturates below 1.0: detection is never certain, even when
/// every signal agrees.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceTuning {
    /// Weight of an explicit caller hint.
    pub explicit_hint: f64,
    /// Weight of the most trusted environment variable found.
    pub env_var: f64,
    /// Weight of a hostname naming pattern.
    pub hostname: f64,
    /// Weight of a filesystem marker.
    pub file_marker: f64,
    /// Confidence added per additional agreeing signal.
    pub agreement_boost: f64,
    /// Fraction of each conflicting signal's weight subtracted.
    pub conflict_penalty: f64,
    /// Hard ceiling on reported confidence.
    pub cap: f64,
    /// Hard floor on reported confidence.
    pub floor: f64,
    /// Confidence reported when no signals exist at all.
    pub no_signal: f64,
}

impl Default for ConfidenceTuning {
    fn default() -> Self {
        Self {
            explicit_hint: 0.95,
            env_var: 0.85,
            hostname: 0.6,
            file_marker: 0.5,
            agreement_boost: 0.05,
            conflict_penalty: 0.3,
            cap: 0.97,
            floor: 0.05,
            no_signal: 0.2,
        }
    }
}

/// One piece of evidence about the environment.
#[derive(Debug, Clone)]
struct Signal {
    environment: DetectedEnvironment,
    weight: f64,
    reason: String,
}

/// Outcome of a detection run.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    /// Best-guess environment.
    pub environment: DetectedEnvironment,
    /// Confidence in [floor, cap]; never 1.0.
    pub confidence: f64,
    /// Human-readable evidence trail, one line per signal considered.
    pub reasoning: Vec<String>,
}

/// Environment detector with tunable confidence weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentDetector {
    tuning: ConfidenceTuning,
}

impl EnvironmentDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tuning(tuning: ConfidenceTuning) -> Self {
        Self { tuning }
    }

    /// Detect the environment from the probe's view of the world.
    ///
    /// Deterministic: identical probe state and hint always produce the
    /// same result. An explicit `hint` outranks every probed signal.
    pub fn detect(
        &self,
        probe: &dyn EnvironmentProbe,
        hint: Option<DetectedEnvironment>,
    ) -> DetectionResult {
        let signals = self.collect_signals(probe, hint);

        if signals.is_empty() {
            return DetectionResult {
                environment: DetectedEnvironment::Development,
                confidence: self.tuning.no_signal,
                reasoning: vec![
                    "no signals available, assuming development".to_string(),
                ],
            };
        }

        // The single most trusted signal decides the environment outright;
        // weaker signals never outvote it, they only adjust confidence.
        // Equal-weight ties resolve toward production.
        let mut winner = signals[0].environment;
        let mut best_weight = signals[0].weight;
        for signal in &signals[1..] {
            let outranks = signal.weight > best_weight
                || (signal.weight == best_weight
                    && signal.environment.caution_rank() > winner.caution_rank());
            if outranks {
                winner = signal.environment;
                best_weight = signal.weight;
            }
        }

        let mut agreeing = 0usize;
        let mut conflict_weight = 0.0;
        for signal in &signals {
            if signal.environment == winner {
                agreeing += 1;
            } else {
                conflict_weight += signal.weight;
            }
        }

        let mut confidence = best_weight
            + self.tuning.agreement_boost * agreeing.saturating_sub(1) as f64
            - self.tuning.conflict_penalty * conflict_weight;
        confidence = confidence.clamp(self.tuning.floor, self.tuning.cap);

        let mut reasoning: Vec<String> =
            signals.iter().map(|signal| signal.reason.clone()).collect();
        if conflict_weight > 0.0 {
            let disagreeing = signals.len() - agreeing;
            reasoning.push(format!(
                "conflict: {disagreeing} signal(s) disagree with {winner}, \
                 confidence reduced by {:.2}",
                self.tuning.conflict_penalty * conflict_weight
            ));
        }
        debug!(environment = %winner, confidence, "environment detected");

        DetectionResult { environment: winner, confidence, reasoning }
    }

    fn collect_signals(
        &self,
        probe: &dyn EnvironmentProbe,
        hint: Option<DetectedEnvironment>,
    ) -> Vec<Signal> {
        let mut signals = Vec::new();

        if let Some(environment) = hint {
            signals.push(Signal {
                environment,
                weight: self.tuning.explicit_hint,
                reason: format!("explicit hint: {environment}"),
            });
        }

        // Each step down the variable hierarchy halves the weight, so a
        // low-trust variable can never outvote a higher one on its own.
        let mut env_weight = self.tuning.env_var;
        for name in ENV_VAR_HIERARCHY {
            if let Some(value) = probe.env_var(name) {
                if let Some(environment) = DetectedEnvironment::from_value(&value) {
                    signals.push(Signal {
                        environment,
                        weight: env_weight,
                        reason: format!("{name}={value} indicates {environment}"),
                    });
                    env_weight /= 2.0;
                }
            }
        }

        if let Some(hostname) = probe.hostname() {
            if let Some(environment) = DetectedEnvironment::from_hostname(&hostname) {
                signals.push(Signal {
                    environment,
                    weight: self.tuning.hostname,
                    reason: format!("hostname '{hostname}' indicates {environment}"),
                });
            }
        }

        const FILE_MARKERS: [(&str, DetectedEnvironment); 3] = [
            (
                "/var/run/secrets/kubernetes.io/serviceaccount",
                DetectedEnvironment::Production,
            ),
            ("/.dockerenv", DetectedEnvironment::Production),
            (".git", DetectedEnvironment::Development),
        ];
        for (marker, environment) in FILE_MARKERS {
            if probe.path_exists(Path::new(marker)) {
                signals.push(Signal {
                    environment,
                    weight: self.tuning.file_marker,
                    reason: format!("marker '{marker}' indicates {environment}"),
                });
            }
        }

        signals
    }
}
