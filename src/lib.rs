//! Palisade: an in-process resilience engine.
//!
//! Protects calls to unreliable dependencies with error classification,
//! per-dependency circuit breakers, category-aware retries, a degraded-mode
//! fallback store, and budget-bounded recovery strategies. [`ResilienceFacade`]
//! is the single entry point composing all of them; each component also
//! works standalone.
//!
//! ```no_run
//! use palisade::{PalisadeConfig, ProtectionOptions, ResilienceFacade};
//! use serde_json::json;
//!
//! # async fn demo() -> palisade::Result<()> {
//! let facade = ResilienceFacade::new(PalisadeConfig::default());
//! let options = ProtectionOptions::for_dependency("orders-api")
//!     .with_cache_key("orders")
//!     .with_static_fallback(json!([]));
//!
//! let served = facade
//!     .execute_with_protection(|| async { Ok(json!(["o1"])) }, &options)
//!     .await?;
//! if served.degraded {
//!     // show a "data may be outdated" indicator
//! }
//! # Ok(())
//! # }
//! ```

pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod facade;
pub mod fallback;
pub mod guard;
pub mod recovery;
pub mod retry;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classifier::{ClassifiedError, ErrorCategory, ErrorClassifier, ErrorContext, Severity};
pub use config::PalisadeConfig;
pub use error::{CircuitOpenError, PalisadeError, RawError, Result};
pub use events::{EventKind, EventSink, ResilienceEvent};
pub use facade::{ProtectionOptions, RecoveryReport, ResilienceFacade, SystemHealthReport};
pub use fallback::{DataSource, FallbackHandler, FallbackStore, Served};
pub use guard::{DependencyGuard, DependencyRegistry, HealthStatus};
pub use recovery::{RecoveryCoordinator, RecoveryResult, RecoveryStrategy, StrategyOutcome};
pub use retry::{Backoff, RetryPolicy, RetryPolicyEngine};
