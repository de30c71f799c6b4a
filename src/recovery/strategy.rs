use async_trait::async_trait;

use crate::classifier::ClassifiedError;
use crate::error::RawError;

/// What a strategy achieved for one classified error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// The error condition was resolved; normal operation may resume.
    Recovered,
    /// The strategy could not resolve it and no further strategy should try.
    FallbackRequired,
    /// The strategy ran but did not resolve it; try the next one.
    NotRecovered,
}

/// A pluggable procedure attempting to resolve one category of error before
/// fallback is invoked. Strategies are stored as ordered lists per category.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap eligibility check, consulted before `execute`.
    fn can_handle(&self, error: &ClassifiedError) -> bool;

    async fn execute(&self, error: &ClassifiedError) -> Result<StrategyOutcome, RawError>;
}

/// Waits out transient network failures before declaring the dependency
/// reachable again. Real connectivity probing is the caller's domain; this
/// strategy only delays and defers to retryability.
#[derive(Debug)]
pub struct ConnectivityPauseStrategy {
    pause_ms: u64,
}

impl ConnectivityPauseStrategy {
    pub fn new(pause_ms: u64) -> Self {
        Self { pause_ms }
    }
}

impl Default for ConnectivityPauseStrategy {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl RecoveryStrategy for ConnectivityPauseStrategy {
    fn name(&self) -> &'static str {
        "connectivity_pause"
    }

    fn can_handle(&self, error: &ClassifiedError) -> bool {
        error.retryable
    }

    async fn execute(&self, error: &ClassifiedError) -> Result<StrategyOutcome, RawError> {
        if !error.retryable {
            return Ok(StrategyOutcome::FallbackRequired);
        }
        tokio::time::sleep(std::time::Duration::from_millis(self.pause_ms)).await;
        Ok(StrategyOutcome::Recovered)
    }
}

/// Deterministic failures cannot be recovered by automation; route straight
/// to the fallback chain.
#[derive(Debug, Default)]
pub struct FallbackOnlyStrategy;

#[async_trait]
impl RecoveryStrategy for FallbackOnlyStrategy {
    fn name(&self) -> &'static str {
        "fallback_only"
    }

    fn can_handle(&self, _error: &ClassifiedError) -> bool {
        true
    }

    async fn execute(&self, _error: &ClassifiedError) -> Result<StrategyOutcome, RawError> {
        Ok(StrategyOutcome::FallbackRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ErrorClassifier, ErrorContext};

    #[tokio::test]
    async fn test_connectivity_pause_recovers_retryable_errors() {
        let error = ErrorClassifier::new()
            .classify_message("connection refused", &ErrorContext::new("api", "get"));
        assert!(error.retryable);

        let strategy = ConnectivityPauseStrategy::new(1);
        assert!(strategy.can_handle(&error));
        assert_eq!(
            strategy.execute(&error).await.unwrap(),
            StrategyOutcome::Recovered
        );
    }

    #[tokio::test]
    async fn test_fallback_only_always_defers() {
        let error = ErrorClassifier::new()
            .classify_message("permission denied", &ErrorContext::new("admin", "delete"));

        let strategy = FallbackOnlyStrategy;
        assert!(strategy.can_handle(&error));
        assert_eq!(
            strategy.execute(&error).await.unwrap(),
            StrategyOutcome::FallbackRequired
        );
    }
}
