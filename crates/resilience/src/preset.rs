//! Named preset catalog and environment-aware recommendation.
//!
//! A [`ResiliencePreset`] packages a strategy with a human-readable purpose
//! so operators pick protection levels by name ("production") instead of by
//! individual thresholds. [`PresetManager`] holds the catalog, validates
//! user-supplied presets, and recommends one based on detected environment.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ResilienceConfig, Strategy};
use crate::environment::{
    DetectedEnvironment, DetectionResult, EnvironmentDetector, EnvironmentProbe,
};
use crate::error::{ConfigError, ConfigResult};

fn default_true() -> bool {
    true
}

/// A named, documented bundle of resilience settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResiliencePreset {
    /// Catalog key, unique within a manager.
    pub name: String,
    /// One-line summary of the protection level.
    pub description: String,
    /// When to pick this preset.
    pub use_case: String,
    /// Strategy whose parameter bundle this preset applies.
    pub strategy: Strategy,
    #[serde(default = "default_true")]
    pub enable_retry: bool,
    #[serde(default = "default_true")]
    pub enable_circuit_breaker: bool,
}

impl ResiliencePreset {
    /// Validate the preset's fields.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::new("name", "preset name must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(ConfigError::new("description", "preset description must not be empty"));
        }
        Ok(())
    }

    /// Materialize this preset into a per-operation configuration.
    pub fn config(&self) -> ResilienceConfig {
        let mut config = ResilienceConfig::for_strategy(self.strategy);
        config.enable_retry = self.enable_retry;
        config.enable_circuit_breaker = self.enable_circuit_breaker;
        config
    }
}

/// A preset recommendation with its supporting evidence.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentRecommendation {
    /// Name of the recommended preset, resolvable via [`PresetManager::get`].
    pub preset_name: String,
    /// Environment the recommendation is based on.
    pub environment: DetectedEnvironment,
    /// Detection confidence in (0, 1); never 1.0.
    pub confidence: f64,
    /// One line per signal that contributed to the detection.
    pub reasoning: Vec<String>,
}

/// Catalog of presets, seeded with the built-in three.
#[derive(Debug, Clone)]
pub struct PresetManager {
    presets: BTreeMap<String, ResiliencePreset>,
    detector: EnvironmentDetector,
}

impl Default for PresetManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in presets shared by every manager instance.
static BUILTIN_PRESETS: Lazy<Vec<ResiliencePreset>> = Lazy::new(|| {
    vec![
        ResiliencePreset {
            name: "simple".to_string(),
            description: "Retries only, no circuit breaker".to_string(),
            use_case: "Scripts and one-shot tools where breaker state has no time to matter"
                .to_string(),
            strategy: Strategy::Balanced,
            enable_retry: true,
            enable_circuit_breaker: false,
        },
        ResiliencePreset {
            name: "development".to_string(),
            description: "Fast failure for tight feedback loops".to_string(),
            use_case: "Local development and CI, where waiting on retries wastes time".to_string(),
            strategy: Strategy::Aggressive,
            enable_retry: true,
            enable_circuit_breaker: true,
        },
        ResiliencePreset {
            name: "production".to_string(),
            description: "Patient retries with conservative breaker thresholds".to_string(),
            use_case: "Deployed services where dependency blips must not page anyone".to_string(),
            strategy: Strategy::Conservative,
            enable_retry: true,
            enable_circuit_breaker: true,
        },
    ]
});

impl PresetManager {
    /// Create a manager holding the built-in presets: `simple`,
    /// `development`, and `production`.
    pub fn new() -> Self {
        let presets = BUILTIN_PRESETS
            .iter()
            .map(|preset| (preset.name.clone(), preset.clone()))
            .collect();
        Self { presets, detector: EnvironmentDetector::new() }
    }

    /// Look up a preset by name.
    pub fn get(&self, name: &str) -> Option<&ResiliencePreset> {
        self.presets.get(name)
    }

    /// All preset names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    /// Register a preset, replacing any existing one with the same name.
    pub fn register(&mut self, preset: ResiliencePreset) -> ConfigResult<()> {
        preset.validate()?;
        if self.presets.contains_key(&preset.name) {
            info!(preset = %preset.name, "replacing existing preset");
        }
        self.presets.insert(preset.name.clone(), preset);
        Ok(())
    }

    /// Load presets from a JSON array document.
    ///
    /// Invalid entries are skipped with a warning; valid ones are still
    /// registered. A structurally malformed document loads nothing.
    /// Returns the number of presets registered.
    pub fn load_from_json(&mut self, raw: &str) -> usize {
        let entries: Vec<serde_json::Value> = match serde_json::from_str(raw) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(%error, "malformed preset document, loading nothing");
                return 0;
            }
        };

        let mut loaded = 0;
        for entry in entries {
            match serde_json::from_value::<ResiliencePreset>(entry) {
                Ok(preset) => match self.register(preset) {
                    Ok(()) => loaded += 1,
                    Err(error) => warn!(%error, "skipping invalid preset"),
                },
                Err(error) => warn!(%error, "skipping unparseable preset entry"),
            }
        }
        loaded
    }

    /// Load presets from a JSON file on disk.
    pub fn load_from_file(&mut self, path: &Path) -> std::io::Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        Ok(self.load_from_json(&raw))
    }

    /// Recommend a preset for the environment seen through `probe`.
    ///
    /// Staging gets the production preset: pre-production should rehearse
    /// production behavior, not develop its own.
    pub fn recommend(
        &self,
        probe: &dyn EnvironmentProbe,
        hint: Option<DetectedEnvironment>,
    ) -> EnvironmentRecommendation {
        let DetectionResult { environment, confidence, reasoning } =
            self.detector.detect(probe, hint);

        let preset_name = match environment {
            DetectedEnvironment::Development => "development",
            DetectedEnvironment::Staging | DetectedEnvironment::Production => "production",
        };

        info!(preset = preset_name, %environment, confidence, "preset recommended");
        EnvironmentRecommendation {
            preset_name: preset_name.to_string(),
            environment,
            confidence,
            reasoning,
        }
    }
}
