use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::circuit::{presets, CircuitBreakerConfig};
use crate::classifier::ErrorCategory;
use crate::error::{PalisadeError, Result};
use crate::fallback::FallbackStoreConfig;
use crate::recovery::RecoveryConfig;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "palisade.toml";

/// Whole-engine configuration, loaded once at construction. There is no
/// dynamic reconfiguration; changing the file requires a rebuild of the
/// facade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PalisadeConfig {
    /// Per-category retry policy overrides. Unlisted categories use the
    /// built-in defaults.
    pub retry: HashMap<ErrorCategory, RetryPolicy>,
    /// Per-dependency circuit breaker thresholds. Unlisted dependencies use
    /// the external-API preset.
    pub circuits: HashMap<String, CircuitBreakerConfig>,
    pub fallback: FallbackStoreConfig,
    pub recovery: RecoveryConfig,
}

impl PalisadeConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Defaults when the file does not exist; parse errors still fail.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Breaker thresholds for `name`, falling back to the external-API
    /// preset.
    pub fn circuit_for(&self, name: &str) -> CircuitBreakerConfig {
        self.circuits
            .get(name)
            .cloned()
            .unwrap_or_else(presets::external_api)
    }

    /// Collect every problem rather than failing on the first one.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        for (name, circuit) in &self.circuits {
            if circuit.failure_threshold == 0 {
                errors.push(format!("circuit '{name}': failure_threshold must be > 0"));
            }
            if circuit.minimum_requests == 0 {
                errors.push(format!("circuit '{name}': minimum_requests must be > 0"));
            }
            if !(0.0..=1.0).contains(&circuit.expected_error_rate)
                || circuit.expected_error_rate == 0.0
            {
                errors.push(format!(
                    "circuit '{name}': expected_error_rate must be in (0.0, 1.0]"
                ));
            }
            if circuit.recovery_timeout_secs == 0 {
                errors.push(format!("circuit '{name}': recovery_timeout_secs must be > 0"));
            }
        }

        for (category, policy) in &self.retry {
            if policy.max_retries > 0 && policy.max_delay_ms < policy.base_delay_ms {
                errors.push(format!(
                    "retry '{category}': max_delay_ms must be >= base_delay_ms"
                ));
            }
        }

        if self.fallback.default_ttl_secs == 0 {
            errors.push("fallback: default_ttl_secs must be > 0".to_string());
        }
        if self.recovery.max_attempts_per_key == 0 {
            errors.push("recovery: max_attempts_per_key must be > 0".to_string());
        }
        if self.recovery.max_concurrent_recoveries == 0 {
            errors.push("recovery: max_concurrent_recoveries must be > 0".to_string());
        }
        if self.recovery.strategy_timeout_secs == 0 {
            errors.push("recovery: strategy_timeout_secs must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PalisadeError::Config(errors.join("; ")))
        }
    }
}
