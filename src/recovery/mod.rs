//! Recovery orchestration.
//!
//! Strategies are registered per error category and tried in order under an
//! execution timeout. The attempt ledger enforces a global per-key ceiling
//! so a persistently failing key cannot loop through strategies forever.

mod coordinator;
mod ledger;
mod strategy;

pub use coordinator::{RecoveryConfig, RecoveryCoordinator, RecoveryResult};
pub use ledger::{LedgerStats, RecoveryAttemptLedger};
pub use strategy::{
    ConnectivityPauseStrategy, FallbackOnlyStrategy, RecoveryStrategy, StrategyOutcome,
};
