//! Composition root tying the classifier, circuit breakers, retry engine,
//! fallback store, and recovery coordinator into one entry point.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::circuit::CircuitStats;
use crate::classifier::{ClassifiedError, ErrorCategory, ErrorClassifier, ErrorContext};
use crate::clock::{SharedClock, SystemClock};
use crate::config::PalisadeConfig;
use crate::error::{PalisadeError, RawError, Result};
use crate::events::{EventKind, EventSink, ResilienceEvent, TracingSink};
use crate::fallback::{CacheStats, DataSource, FallbackStore, Served};
use crate::guard::{DependencyRegistry, HealthStatus, RegistryHealth};
use crate::recovery::{LedgerStats, RecoveryCoordinator, RecoveryResult};
use crate::retry::{RetryPolicy, RetryPolicyEngine};

/// Per-call protection settings. Everything is enabled by default.
#[derive(Debug, Clone)]
pub struct ProtectionOptions {
    pub dependency: String,
    pub context: ErrorContext,
    /// Category hint selecting the retry policy; classified from the error
    /// when absent.
    pub category: Option<ErrorCategory>,
    pub enable_circuit_breaker: bool,
    pub enable_retry: bool,
    pub enable_fallback: bool,
    /// Cache key consulted (and populated) by the fallback ladder.
    pub cache_key: Option<String>,
    pub static_fallback: Option<serde_json::Value>,
}

impl ProtectionOptions {
    pub fn for_dependency(dependency: impl Into<String>) -> Self {
        let dependency = dependency.into();
        Self {
            context: ErrorContext::new(dependency.clone(), "call"),
            dependency,
            category: None,
            enable_circuit_breaker: true,
            enable_retry: true,
            enable_fallback: true,
            cache_key: None,
            static_fallback: None,
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_static_fallback(mut self, value: serde_json::Value) -> Self {
        self.static_fallback = Some(value);
        self
    }

    pub fn circuit_breaker(mut self, enabled: bool) -> Self {
        self.enable_circuit_breaker = enabled;
        self
    }

    pub fn retry(mut self, enabled: bool) -> Self {
        self.enable_retry = enabled;
        self
    }

    pub fn fallback(mut self, enabled: bool) -> Self {
        self.enable_fallback = enabled;
        self
    }
}

/// Outcome of `recover_from_error`.
#[derive(Debug)]
pub struct RecoveryReport {
    pub result: RecoveryResult,
    /// Substitute value when the fallback chain resolved one.
    pub fallback: Option<Served<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealth {
    pub name: String,
    pub healthy: bool,
    pub stats: CircuitStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealthReport {
    pub status: HealthStatus,
    pub dependencies: RegistryHealth,
    pub breakers: Vec<BreakerHealth>,
    pub cache: CacheStats,
    pub recovery: LedgerStats,
}

/// Single entry point for protected execution and error recovery.
pub struct ResilienceFacade {
    config: PalisadeConfig,
    classifier: ErrorClassifier,
    retry_engine: Arc<RetryPolicyEngine>,
    registry: DependencyRegistry,
    fallback: Arc<FallbackStore>,
    coordinator: RecoveryCoordinator,
    recovery_slots: Arc<Semaphore>,
    events: Arc<dyn EventSink>,
}

impl ResilienceFacade {
    pub fn new(config: PalisadeConfig) -> Self {
        Self::with_parts(config, Arc::new(SystemClock), Arc::new(TracingSink))
    }

    pub fn with_parts(
        config: PalisadeConfig,
        clock: SharedClock,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let mut retry_engine = RetryPolicyEngine::new().with_events(events.clone());
        for (category, policy) in &config.retry {
            retry_engine.set_policy(*category, policy.clone());
        }
        let retry_engine = Arc::new(retry_engine);

        let registry =
            DependencyRegistry::with_parts(retry_engine.clone(), clock.clone(), events.clone());
        let fallback = Arc::new(
            FallbackStore::with_parts(config.fallback.clone(), clock.clone(), events.clone())
                .with_default_handlers(),
        );
        let coordinator =
            RecoveryCoordinator::with_parts(config.recovery.clone(), clock, events.clone())
                .with_default_strategies();
        let recovery_slots = Arc::new(Semaphore::new(config.recovery.max_concurrent_recoveries));

        Self {
            config,
            classifier: ErrorClassifier::new(),
            retry_engine,
            registry,
            fallback,
            coordinator,
            recovery_slots,
            events,
        }
    }

    pub fn fallback_store(&self) -> &Arc<FallbackStore> {
        &self.fallback
    }

    pub fn registry(&self) -> &DependencyRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &RecoveryCoordinator {
        &self.coordinator
    }

    /// Run one unit of work under the configured protections: circuit
    /// breaker, then retry, then the fallback ladder. Returns the served
    /// value with provenance, or the final classified failure.
    pub async fn execute_with_protection<F, Fut>(
        &self,
        op: F,
        options: &ProtectionOptions,
    ) -> Result<Served<serde_json::Value>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<serde_json::Value, RawError>>,
    {
        let guard = options.enable_circuit_breaker.then(|| {
            self.registry.get_or_register(
                &options.dependency,
                self.config.circuit_for(&options.dependency),
                RetryPolicy::none(),
            )
        });

        let run_once = || async {
            match &guard {
                Some(guard) => guard.execute(|| op()).await,
                None => op().await,
            }
        };

        let policy = self.resolve_policy(options);
        let outcome = self
            .retry_engine
            .run_with_retry(&options.dependency, &policy, run_once)
            .await;

        match outcome.result {
            Ok(value) => {
                if let Some(key) = &options.cache_key {
                    self.fallback.cache(key.clone(), value.clone(), None);
                }
                Ok(Served {
                    value,
                    source: DataSource::Primary,
                    degraded: false,
                    note: "primary source".into(),
                })
            }
            Err(error) => {
                let classified = self
                    .classifier
                    .classify(&error, &options.context)
                    .with_cause(Arc::from(error));
                self.publish_classification(&classified);
                if options.enable_fallback {
                    if let Some(served) = self.degrade(options) {
                        return Ok(served);
                    }
                }
                debug!(
                    dependency = %options.dependency,
                    category = %classified.category,
                    attempts = outcome.attempts,
                    "Protected call failed with no fallback"
                );
                Err(PalisadeError::classified(classified))
            }
        }
    }

    /// The fallback ladder after the primary pipeline has failed: fresh
    /// cache, static value, then expired cache while offline.
    fn degrade(&self, options: &ProtectionOptions) -> Option<Served<serde_json::Value>> {
        if let Some(key) = &options.cache_key {
            if let Some(value) = self.fallback.get(key) {
                return Some(self.fallback.serve_degraded(
                    key,
                    value,
                    DataSource::Cache,
                    "served from cache; data may be stale",
                ));
            }
        }
        if let Some(value) = options.static_fallback.clone() {
            return Some(self.fallback.serve_degraded(
                options.cache_key.as_deref().unwrap_or(&options.dependency),
                value,
                DataSource::StaticFallback,
                "served static fallback value",
            ));
        }
        if self.fallback.is_offline() {
            if let Some(key) = &options.cache_key {
                if let Some(entry) = self.fallback.get_any(key) {
                    return Some(self.fallback.serve_degraded(
                        key,
                        entry.value,
                        DataSource::ExpiredCache,
                        "offline mode: served expired cache entry",
                    ));
                }
            }
        }
        None
    }

    fn resolve_policy(&self, options: &ProtectionOptions) -> RetryPolicy {
        if !options.enable_retry {
            return RetryPolicy::none();
        }
        let base = match options.category {
            Some(category) => self.retry_engine.policy_for(category),
            None => RetryPolicy::default(),
        };
        let classifier = self.classifier;
        let context = options.context.clone();
        base.and_predicate(Arc::new(move |message, _| {
            classifier.classify_message(message, &context).retryable
        }))
    }

    /// Run the recovery pipeline for an already-classified error. Waits for
    /// a free recovery slot when the global concurrency cap is saturated.
    pub async fn recover_from_error(&self, error: &ClassifiedError) -> Result<RecoveryReport> {
        let _permit = self
            .recovery_slots
            .acquire()
            .await
            .map_err(|_| PalisadeError::Other("recovery slots closed".to_string()))?;

        let result = self.coordinator.recover(error).await;
        if !result.fallback_required {
            return Ok(RecoveryReport {
                result,
                fallback: None,
            });
        }

        match self.fallback.execute_fallback(error).await {
            Ok(served) => {
                info!(
                    component = %error.context.component,
                    category = %error.category,
                    "Recovery resolved through fallback chain"
                );
                Ok(RecoveryReport {
                    result,
                    fallback: Some(served),
                })
            }
            Err(_) => Ok(RecoveryReport {
                result,
                fallback: None,
            }),
        }
    }

    /// Classify a raw failure without running recovery.
    pub fn classify(&self, error: &RawError, context: &ErrorContext) -> ClassifiedError {
        let classified = self.classifier.classify(error, context);
        self.publish_classification(&classified);
        classified
    }

    fn publish_classification(&self, classified: &ClassifiedError) {
        self.events.emit(
            &ResilienceEvent::new(EventKind::ErrorClassified)
                .with_dependency(classified.context.component.clone())
                .with_category(classified.category)
                .with_severity(classified.severity)
                .with_message(classified.sanitized_message.clone()),
        );
    }

    /// One report combining breaker states, dependency metrics, cache
    /// stats, and open recovery attempts.
    pub fn system_health(&self) -> SystemHealthReport {
        let dependencies = self.registry.health();
        let mut breakers = Vec::with_capacity(dependencies.dependencies.len());
        let mut healthy_breakers = 0;
        for metrics in &dependencies.dependencies {
            if let Some(guard) = self.registry.get(&metrics.name) {
                let healthy = guard.breaker().is_healthy();
                if healthy {
                    healthy_breakers += 1;
                }
                breakers.push(BreakerHealth {
                    name: metrics.name.clone(),
                    healthy,
                    stats: guard.breaker().stats(),
                });
            }
        }

        // Average the breaker and dependency healthy ratios, then apply the
        // same all/half rollup rule the registry uses.
        let status = if breakers.is_empty() {
            dependencies.status
        } else {
            let breaker_ratio = healthy_breakers as f64 / breakers.len() as f64;
            let dependency_ratio = dependencies.healthy as f64 / dependencies.total as f64;
            let averaged = (breaker_ratio + dependency_ratio) / 2.0;
            if averaged >= 1.0 {
                HealthStatus::Healthy
            } else if averaged > 0.5 {
                HealthStatus::Degraded
            } else {
                HealthStatus::Unhealthy
            }
        };

        SystemHealthReport {
            status,
            dependencies,
            breakers,
            cache: self.fallback.stats(),
            recovery: self.coordinator.ledger_stats(),
        }
    }
}

impl std::fmt::Debug for ResilienceFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceFacade")
            .field("registry", &self.registry)
            .field("fallback", &self.fallback)
            .finish()
    }
}
