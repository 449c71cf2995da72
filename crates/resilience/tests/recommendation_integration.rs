//! Integration tests for environment detection and preset recommendation
//!
//! Drives the detector and preset manager through the public API with
//! scripted probes, and wires a recommendation into a live orchestrator.

use std::io::Write;

use aegis_resilience::{
    CallOptions, ClassifiedError, DetectedEnvironment, EnvironmentDetector, MockClock, MockProbe,
    Orchestrator, PresetManager, ResilienceResult, Strategy,
};

/// Capture detection logs in test output; safe to call from every test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter("debug").try_init();
}

/// Validates a fully corroborated production environment yields the
/// production preset with high confidence.
///
/// # Test Steps
/// 1. Script a probe with a production env var, hostname, and k8s marker
/// 2. Recommend a preset and verify it is "production"
/// 3. Verify confidence is high but strictly below 1.0
/// 4. Verify the reasoning names every contributing signal
#[test]
fn test_production_signals_agree() {
    init_tracing();
    let probe = MockProbe::new()
        .with_env_var("DEPLOYMENT_ENV", "production")
        .with_hostname("prod-api-01.internal")
        .with_existing_path("/var/run/secrets/kubernetes.io/serviceaccount");
    let manager = PresetManager::new();

    let rec = manager.recommend(&probe, None);
    assert_eq!(rec.preset_name, "production");
    assert_eq!(rec.environment, DetectedEnvironment::Production);
    assert!(rec.confidence > 0.85, "corroborated detection: {}", rec.confidence);
    assert!(rec.confidence < 1.0, "confidence is never certainty");
    assert_eq!(rec.reasoning.len(), 3);
}

/// Validates conflicting signals still resolve deterministically, with the
/// conflict reflected in lowered confidence.
///
/// # Test Steps
/// 1. Script a production env var against a development hostname
/// 2. Verify the more-trusted env var wins
/// 3. Verify confidence is lower than with the env var alone
/// 4. Run detection twice and verify identical output
#[test]
fn test_conflicting_signals_resolve_deterministically() {
    init_tracing();
    let detector = EnvironmentDetector::new();
    let clean_probe = MockProbe::new().with_env_var("DEPLOYMENT_ENV", "production");
    let conflicted_probe = MockProbe::new()
        .with_env_var("DEPLOYMENT_ENV", "production")
        .with_hostname("dev-laptop.local");

    let clean = detector.detect(&clean_probe, None);
    let conflicted = detector.detect(&conflicted_probe, None);

    assert_eq!(conflicted.environment, DetectedEnvironment::Production);
    assert!(conflicted.confidence < clean.confidence);

    let again = detector.detect(&conflicted_probe, None);
    assert_eq!(again.environment, conflicted.environment);
    assert_eq!(again.confidence, conflicted.confidence);
}

/// Validates the silent-environment fallback.
///
/// # Test Steps
/// 1. Recommend with an empty probe
/// 2. Verify development preset, low confidence, explanatory reasoning
#[test]
fn test_no_signals_recommends_development() {
    init_tracing();
    let manager = PresetManager::new();
    let rec = manager.recommend(&MockProbe::new(), None);

    assert_eq!(rec.preset_name, "development");
    assert!(rec.confidence < 0.5);
    assert!(rec.reasoning.iter().any(|line| line.contains("no signals available")));
}

/// Validates an explicit hint outranks every probed signal.
///
/// # Test Steps
/// 1. Script a probe screaming "production"
/// 2. Pass a development hint
/// 3. Verify the hint wins
#[test]
fn test_explicit_hint_outranks_probe() {
    init_tracing();
    let probe = MockProbe::new()
        .with_env_var("AEGIS_ENV", "production")
        .with_hostname("prod-worker-9")
        .with_existing_path("/.dockerenv");
    let manager = PresetManager::new();

    let rec = manager.recommend(&probe, Some(DetectedEnvironment::Development));
    assert_eq!(rec.environment, DetectedEnvironment::Development);
    assert_eq!(rec.preset_name, "development");
}

/// Validates staging rehearses production rather than getting its own
/// preset.
///
/// # Test Steps
/// 1. Script a staging env var
/// 2. Verify the detected environment is staging but the preset is
///    "production"
#[test]
fn test_staging_maps_to_production_preset() {
    init_tracing();
    let manager = PresetManager::new();
    let rec = manager
        .recommend(&MockProbe::new().with_env_var("DEPLOYMENT_ENV", "staging"), None);

    assert_eq!(rec.environment, DetectedEnvironment::Staging);
    assert_eq!(rec.preset_name, "production");
}

/// Validates presets loaded from disk join the catalog and survive
/// round-tripping through the recommendation flow.
///
/// # Test Steps
/// 1. Write a preset document to a temp file and load it
/// 2. Verify the preset resolves by name and materializes a config
/// 3. Verify an invalid entry in the same document is skipped
#[test]
fn test_preset_file_loading() {
    init_tracing();
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"[
            {{
                "name": "ingest",
                "description": "Critical persistence for the ingest pipeline",
                "use_case": "Queue consumers that must not drop work",
                "strategy": "critical"
            }},
            {{"name": "", "description": "d", "use_case": "u", "strategy": "balanced"}}
        ]"#
    )
    .expect("write presets");

    let mut manager = PresetManager::new();
    let loaded = manager.load_from_file(file.path()).expect("file reads");
    assert_eq!(loaded, 1, "empty-name preset must be skipped");

    let preset = manager.get("ingest").expect("loaded preset resolves");
    assert_eq!(preset.strategy, Strategy::Critical);
    let config = preset.config();
    assert_eq!(config.retry.max_attempts, 5);
}

/// Validates the recommendation wires into a live orchestrator end to end.
///
/// # Test Steps
/// 1. Recommend a preset for a scripted development environment
/// 2. Materialize the preset's config into call options
/// 3. Run a failing operation and verify the preset's attempt budget
///    (development preset is Aggressive: 3 attempts)
#[tokio::test(start_paused = true)]
async fn test_recommendation_drives_orchestrator() {
    init_tracing();
    let manager = PresetManager::new();
    let probe = MockProbe::new()
        .with_env_var("DEPLOYMENT_ENV", "dev")
        .with_existing_path(".git");

    let rec = manager.recommend(&probe, None);
    assert_eq!(rec.preset_name, "development");
    let preset = manager.get(&rec.preset_name).expect("recommended preset exists");

    let orchestrator = Orchestrator::with_clock(MockClock::new());
    let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter = std::sync::Arc::clone(&attempts);

    let _result: ResilienceResult<&str, ClassifiedError> = orchestrator
        .execute("ingest", CallOptions::custom(preset.config()), move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(ClassifiedError::transient("down")) }
        })
        .await;

    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
}

/// Validates every recommendation the manager can produce resolves to a
/// preset in its own catalog.
///
/// # Test Steps
/// 1. Recommend across development, staging, and production probes
/// 2. Verify each preset name resolves via `get`
#[test]
fn test_recommendations_always_resolve() {
    init_tracing();
    let manager = PresetManager::new();
    let probes = [
        MockProbe::new(),
        MockProbe::new().with_env_var("DEPLOYMENT_ENV", "dev"),
        MockProbe::new().with_env_var("DEPLOYMENT_ENV", "staging"),
        MockProbe::new().with_env_var("DEPLOYMENT_ENV", "production"),
    ];

    for probe in &probes {
        let rec = manager.recommend(probe, None);
        assert!(
            manager.get(&rec.preset_name).is_some(),
            "recommendation '{}' must resolve",
            rec.preset_name
        );
    }
}
