use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::circuit::{CircuitBreaker, CircuitError, CircuitState};
use crate::classifier::{ErrorClassifier, ErrorContext};
use crate::clock::SharedClock;
use crate::error::RawError;
use crate::retry::{RetryPolicy, RetryPolicyEngine};

/// Per-dependency call metrics. Never reset except by explicit operator
/// action (`reset_metrics`).
#[derive(Debug, Clone, Serialize)]
pub struct DependencyMetrics {
    pub name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time_ms: f64,
    pub last_request_at: Option<DateTime<Utc>>,
    pub circuit_state: CircuitState,
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    avg_response_time_ms: f64,
    last_request_at: Option<DateTime<Utc>>,
}

/// Binds one external dependency to its circuit breaker and retry policy.
pub struct DependencyGuard {
    name: String,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    retry_engine: Arc<RetryPolicyEngine>,
    classifier: ErrorClassifier,
    metrics: Mutex<MetricsInner>,
    clock: SharedClock,
}

impl DependencyGuard {
    pub fn new(
        name: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
        retry_engine: Arc<RetryPolicyEngine>,
        clock: SharedClock,
    ) -> Self {
        Self {
            name: name.into(),
            breaker,
            policy,
            retry_engine,
            classifier: ErrorClassifier::new(),
            metrics: Mutex::new(MetricsInner::default()),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Route one call through the circuit breaker, recording latency and
    /// outcome. Rejected calls never reach the dependency and are excluded
    /// from its metrics.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, RawError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
    {
        let start = self.clock.now();
        let result = self.breaker.execute(op).await;
        let elapsed_ms = self.clock.now().duration_since(start).as_secs_f64() * 1_000.0;

        match result {
            Ok(value) => {
                self.record_call(true, elapsed_ms);
                Ok(value)
            }
            Err(CircuitError::Open(rejected)) => Err(Box::new(rejected)),
            Err(CircuitError::Operation(error)) => {
                self.record_call(false, elapsed_ms);
                Err(error)
            }
        }
    }

    /// `execute` with each circuit-breaker attempt wrapped in the retry
    /// engine. Stops immediately when the failure classifies as
    /// non-retryable, including circuit-open rejections.
    pub async fn execute_with_retry<T, F, Fut>(&self, op: F) -> Result<T, RawError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
    {
        let policy = self.effective_policy();
        let outcome = self
            .retry_engine
            .run_with_retry(&self.name, &policy, || self.execute(|| op()))
            .await;
        debug!(
            dependency = %self.name,
            attempts = outcome.attempts,
            succeeded = outcome.succeeded(),
            "Guarded call finished"
        );
        outcome.result
    }

    /// The configured policy narrowed by a classification predicate so
    /// deterministic failures are never retried.
    pub fn effective_policy(&self) -> RetryPolicy {
        let classifier = self.classifier;
        let name = self.name.clone();
        self.policy.clone().and_predicate(Arc::new(move |message, _| {
            let context = ErrorContext::new(name.clone(), "call");
            classifier.classify_message(message, &context).retryable
        }))
    }

    fn record_call(&self, succeeded: bool, elapsed_ms: f64) {
        let mut inner = self.metrics.lock();
        inner.total_requests += 1;
        if succeeded {
            inner.successful_requests += 1;
        } else {
            inner.failed_requests += 1;
        }
        // Incremental mean keeps the update O(1) without storing samples
        let n = inner.total_requests as f64;
        inner.avg_response_time_ms += (elapsed_ms - inner.avg_response_time_ms) / n;
        inner.last_request_at = Some(Utc::now());
    }

    pub fn metrics(&self) -> DependencyMetrics {
        let inner = self.metrics.lock();
        DependencyMetrics {
            name: self.name.clone(),
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            avg_response_time_ms: inner.avg_response_time_ms,
            last_request_at: inner.last_request_at,
            circuit_state: self.breaker.state(),
        }
    }

    pub fn reset_metrics(&self) {
        *self.metrics.lock() = MetricsInner::default();
    }

    pub fn is_healthy(&self) -> bool {
        self.breaker.is_healthy()
    }
}

impl std::fmt::Debug for DependencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGuard")
            .field("name", &self.name)
            .field("state", &self.breaker.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{presets, CircuitBreakerConfig};
    use crate::clock::ManualClock;
    use crate::error::CircuitOpenError;
    use crate::events::TracingSink;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn guard_with(config: CircuitBreakerConfig, policy: RetryPolicy) -> DependencyGuard {
        let clock: SharedClock = Arc::new(ManualClock::new());
        let breaker = Arc::new(CircuitBreaker::with_parts(
            "payments",
            config,
            clock.clone(),
            Arc::new(TracingSink),
        ));
        DependencyGuard::new(
            "payments",
            breaker,
            policy,
            Arc::new(RetryPolicyEngine::new()),
            clock,
        )
    }

    fn instant_retries(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff: crate::retry::Backoff::Fixed,
            jitter: false,
            predicate: None,
        }
    }

    #[tokio::test]
    async fn test_metrics_track_successes_and_failures() {
        let guard = guard_with(presets::test(), RetryPolicy::none());

        let _ = guard.execute(|| async { Ok::<_, RawError>(1) }).await;
        let _ = guard
            .execute(|| async { Err::<u32, RawError>("connection reset".into()) })
            .await;

        let metrics = guard.metrics();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.failed_requests, 1);
        assert!(metrics.last_request_at.is_some());
    }

    #[tokio::test]
    async fn test_rejected_calls_do_not_count_against_dependency() {
        let guard = guard_with(presets::test(), RetryPolicy::none());

        // Two failures trip the test preset
        for _ in 0..2 {
            let _ = guard
                .execute(|| async { Err::<u32, RawError>("connection reset".into()) })
                .await;
        }
        let before = guard.metrics().total_requests;

        let result = guard.execute(|| async { Ok::<_, RawError>(1) }).await;
        let error = result.unwrap_err();
        assert!(error.downcast_ref::<CircuitOpenError>().is_some());
        assert_eq!(guard.metrics().total_requests, before);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let guard = guard_with(
            CircuitBreakerConfig {
                failure_threshold: 10,
                minimum_requests: 10,
                ..presets::test()
            },
            instant_retries(3),
        );
        let calls = AtomicU32::new(0);

        let result = guard
            .execute_with_retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err::<u32, RawError>("connection reset".into())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_short_circuits() {
        let guard = guard_with(
            CircuitBreakerConfig {
                failure_threshold: 10,
                minimum_requests: 10,
                ..presets::test()
            },
            instant_retries(5),
        );
        let calls = AtomicU32::new(0);

        let result = guard
            .execute_with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, RawError>("permission denied".into()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_circuit_open_rejection_stops_retries() {
        let guard = guard_with(presets::test(), instant_retries(5));

        for _ in 0..2 {
            let _ = guard
                .execute(|| async { Err::<u32, RawError>("connection reset".into()) })
                .await;
        }

        let calls = AtomicU32::new(0);
        let result = guard
            .execute_with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, RawError>(1) }
            })
            .await;

        assert!(result.is_err());
        // Every attempt was rejected before reaching the operation
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
