use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::{ClassifiedError, ErrorCategory};
use crate::clock::{SharedClock, SystemClock};
use crate::events::{EventKind, EventSink, ResilienceEvent, TracingSink};

use super::ledger::{LedgerStats, RecoveryAttemptLedger};
use super::strategy::{ConnectivityPauseStrategy, RecoveryStrategy, StrategyOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Global per-key ceiling, independent of any retry policy.
    pub max_attempts_per_key: u32,
    /// Each strategy execution is raced against this deadline.
    pub strategy_timeout_secs: u64,
    /// Ledger entries older than this are pruned.
    pub ledger_entry_max_age_secs: u64,
    /// Concurrently in-flight recoveries allowed process-wide.
    pub max_concurrent_recoveries: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_key: 3,
            strategy_timeout_secs: 30,
            ledger_entry_max_age_secs: 300,
            max_concurrent_recoveries: 4,
        }
    }
}

/// Outcome of one `recover` call.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResult {
    pub recovered: bool,
    pub fallback_required: bool,
    pub budget_exceeded: bool,
    /// Name of the strategy that recovered, when one did.
    pub strategy: Option<&'static str>,
    pub attempts: u32,
}

impl RecoveryResult {
    fn recovered_by(strategy: &'static str, attempts: u32) -> Self {
        Self {
            recovered: true,
            fallback_required: false,
            budget_exceeded: false,
            strategy: Some(strategy),
            attempts,
        }
    }

    fn fallback(attempts: u32) -> Self {
        Self {
            recovered: false,
            fallback_required: true,
            budget_exceeded: false,
            strategy: None,
            attempts,
        }
    }

    fn budget_exceeded(attempts: u32) -> Self {
        Self {
            recovered: false,
            fallback_required: true,
            budget_exceeded: true,
            strategy: None,
            attempts,
        }
    }
}

/// Selects and runs recovery strategies for classified errors, bounded by
/// the per-key attempt ledger.
pub struct RecoveryCoordinator {
    config: RecoveryConfig,
    strategies: RwLock<HashMap<ErrorCategory, Vec<Arc<dyn RecoveryStrategy>>>>,
    ledger: RecoveryAttemptLedger,
    events: Arc<dyn EventSink>,
}

impl RecoveryCoordinator {
    pub fn new(config: RecoveryConfig) -> Self {
        Self::with_parts(config, Arc::new(SystemClock), Arc::new(TracingSink))
    }

    pub fn with_parts(
        config: RecoveryConfig,
        clock: SharedClock,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let ledger = RecoveryAttemptLedger::new(
            config.max_attempts_per_key,
            Duration::from_secs(config.ledger_entry_max_age_secs),
            clock,
        );
        Self {
            config,
            strategies: RwLock::new(HashMap::new()),
            ledger,
            events,
        }
    }

    /// Register the built-in strategies: transient network failures pause
    /// and resume; everything else goes straight to the fallback chain.
    pub fn with_default_strategies(self) -> Self {
        self.register_strategy(
            ErrorCategory::Network,
            Arc::new(ConnectivityPauseStrategy::default()),
        );
        self
    }

    pub fn register_strategy(&self, category: ErrorCategory, strategy: Arc<dyn RecoveryStrategy>) {
        self.strategies
            .write()
            .entry(category)
            .or_default()
            .push(strategy);
    }

    pub fn ledger_stats(&self) -> LedgerStats {
        self.ledger.stats()
    }

    /// Try each eligible strategy for the error's category, stopping at the
    /// first success or at the first explicit fallback signal. A strategy
    /// error is a failed attempt, not an abort; later strategies still run.
    pub async fn recover(&self, error: &ClassifiedError) -> RecoveryResult {
        let key = error.recovery_key();

        if self.ledger.is_exhausted(&key) {
            let attempts = self.ledger.attempts_for(&key);
            warn!(key = %key, attempts = attempts, "Recovery budget exhausted");
            self.events.emit(
                &ResilienceEvent::new(EventKind::RecoveryBudgetExceeded)
                    .with_dependency(error.context.component.clone())
                    .with_category(error.category)
                    .with_attempt(attempts),
            );
            return RecoveryResult::budget_exceeded(attempts);
        }

        let eligible: Vec<Arc<dyn RecoveryStrategy>> = self
            .strategies
            .read()
            .get(&error.category)
            .map(|chain| {
                chain
                    .iter()
                    .filter(|s| s.can_handle(error))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // An error no strategy can handle is free: it does not count
        // against the key's budget.
        if eligible.is_empty() {
            debug!(key = %key, category = %error.category, "No eligible recovery strategy");
            self.emit_fallback(error);
            return RecoveryResult::fallback(self.ledger.attempts_for(&key));
        }

        let attempts = self.ledger.record_attempt(&key);
        let timeout = Duration::from_secs(self.config.strategy_timeout_secs);

        for strategy in eligible {
            let outcome = tokio::time::timeout(timeout, strategy.execute(error)).await;
            match outcome {
                Ok(Ok(StrategyOutcome::Recovered)) => {
                    self.ledger.clear(&key);
                    info!(key = %key, strategy = strategy.name(), "Recovery succeeded");
                    self.events.emit(
                        &ResilienceEvent::new(EventKind::RecoverySucceeded)
                            .with_dependency(error.context.component.clone())
                            .with_category(error.category)
                            .with_attempt(attempts)
                            .with_message(strategy.name()),
                    );
                    return RecoveryResult::recovered_by(strategy.name(), attempts);
                }
                Ok(Ok(StrategyOutcome::FallbackRequired)) => {
                    debug!(key = %key, strategy = strategy.name(), "Strategy deferred to fallback");
                    self.emit_fallback(error);
                    return RecoveryResult::fallback(attempts);
                }
                Ok(Ok(StrategyOutcome::NotRecovered)) => {
                    debug!(key = %key, strategy = strategy.name(), "Strategy did not recover");
                }
                Ok(Err(strategy_error)) => {
                    warn!(
                        key = %key,
                        strategy = strategy.name(),
                        error = %strategy_error,
                        "Recovery strategy failed"
                    );
                }
                Err(_) => {
                    warn!(
                        key = %key,
                        strategy = strategy.name(),
                        timeout_secs = timeout.as_secs(),
                        "Recovery strategy timed out"
                    );
                }
            }
        }

        self.emit_fallback(error);
        RecoveryResult::fallback(attempts)
    }

    fn emit_fallback(&self, error: &ClassifiedError) {
        self.events.emit(
            &ResilienceEvent::new(EventKind::RecoveryFallback)
                .with_dependency(error.context.component.clone())
                .with_category(error.category)
                .with_severity(error.severity),
        );
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .finish()
    }
}
