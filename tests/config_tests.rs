use palisade::circuit::presets;
use palisade::config::{PalisadeConfig, DEFAULT_CONFIG_FILE};
use palisade::error::PalisadeError;
use palisade::{ErrorCategory, RetryPolicy};

#[tokio::test]
async fn save_and_reload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DEFAULT_CONFIG_FILE);

    let mut config = PalisadeConfig::default();
    config
        .retry
        .insert(ErrorCategory::Network, RetryPolicy::new(5, 250));
    config
        .circuits
        .insert("orders-api".to_string(), presets::critical_service());
    config.fallback.default_ttl_secs = 120;
    config.recovery.max_attempts_per_key = 7;

    config.save(&path).await.unwrap();
    let reloaded = PalisadeConfig::load(&path).await.unwrap();

    assert_eq!(reloaded.retry[&ErrorCategory::Network].max_retries, 5);
    assert_eq!(reloaded.circuits["orders-api"].failure_threshold, 3);
    assert_eq!(reloaded.fallback.default_ttl_secs, 120);
    assert_eq!(reloaded.recovery.max_attempts_per_key, 7);
}

#[tokio::test]
async fn load_rejects_invalid_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DEFAULT_CONFIG_FILE);

    tokio::fs::write(
        &path,
        r#"
        [circuits.bad]
        failure_threshold = 0
        expected_error_rate = 0.5
        minimum_requests = 5
        recovery_timeout_secs = 30
        monitoring_period_secs = 600
        call_timeout_secs = 10
        healthy_quiet_period_secs = 30
        "#,
    )
    .await
    .unwrap();

    let error = PalisadeConfig::load(&path).await.unwrap_err();
    assert!(matches!(error, PalisadeError::Config(_)));
    assert!(error.to_string().contains("failure_threshold"));
}

#[tokio::test]
async fn load_rejects_malformed_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DEFAULT_CONFIG_FILE);
    tokio::fs::write(&path, "not [valid toml").await.unwrap();

    let error = PalisadeConfig::load(&path).await.unwrap_err();
    assert!(matches!(error, PalisadeError::Toml(_)));
}

#[tokio::test]
async fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nowhere").join(DEFAULT_CONFIG_FILE);

    let config = PalisadeConfig::load_or_default(&path).await.unwrap();
    assert!(config.validate().is_ok());
    assert!(config.circuits.is_empty());
    assert_eq!(config.circuit_for("anything").failure_threshold, 5);
}
