use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::classifier::ErrorCategory;
use crate::error::RawError;
use crate::events::{EventKind, EventSink, ResilienceEvent, TracingSink};

use super::policy::RetryPolicy;

/// One row of the attempt history attached to every retried operation.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub delay_before_ms: u64,
    pub at: DateTime<Utc>,
}

/// Result of a retried operation together with its full attempt history.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, RawError>,
    pub attempts: u32,
    pub history: Vec<AttemptRecord>,
}

impl<T> RetryOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Holds per-category retry policies and drives retried executions.
pub struct RetryPolicyEngine {
    overrides: HashMap<ErrorCategory, RetryPolicy>,
    events: Arc<dyn EventSink>,
}

impl Default for RetryPolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicyEngine {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            events: Arc::new(TracingSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn set_policy(&mut self, category: ErrorCategory, policy: RetryPolicy) {
        self.overrides.insert(category, policy);
    }

    /// Configured override for the category, or the built-in default.
    pub fn policy_for(&self, category: ErrorCategory) -> RetryPolicy {
        self.overrides
            .get(&category)
            .cloned()
            .unwrap_or_else(|| RetryPolicy::for_category(category))
    }

    /// Run `op` under `policy`, sleeping the backoff delay between attempts.
    /// Attempt 1 is the initial call; retries are numbered from there.
    pub async fn run_with_retry<T, F, Fut>(
        &self,
        dependency: &str,
        policy: &RetryPolicy,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
    {
        let mut history = Vec::new();
        let mut attempt: u32 = 1;
        let mut delay_before_ms: u64 = 0;

        loop {
            match op().await {
                Ok(value) => {
                    history.push(AttemptRecord {
                        attempt,
                        succeeded: true,
                        error: None,
                        delay_before_ms,
                        at: Utc::now(),
                    });
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        history,
                    };
                }
                Err(error) => {
                    let message = error.to_string();
                    history.push(AttemptRecord {
                        attempt,
                        succeeded: false,
                        error: Some(message.clone()),
                        delay_before_ms,
                        at: Utc::now(),
                    });

                    let retry_number = attempt;
                    if !policy.should_retry(&message, retry_number) {
                        if policy.max_retries > 0 && retry_number > policy.max_retries {
                            warn!(
                                dependency = %dependency,
                                attempts = attempt,
                                error = %message,
                                "Retries exhausted"
                            );
                            self.events.emit(
                                &ResilienceEvent::new(EventKind::RetryExhausted)
                                    .with_dependency(dependency)
                                    .with_attempt(attempt)
                                    .with_message(message),
                            );
                        }
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt,
                            history,
                        };
                    }

                    let delay = policy.jittered_delay(retry_number);
                    delay_before_ms = delay.as_millis() as u64;
                    debug!(
                        dependency = %dependency,
                        attempt = attempt + 1,
                        delay_ms = delay_before_ms,
                        error = %message,
                        "Scheduling retry"
                    );
                    self.events.emit(
                        &ResilienceEvent::new(EventKind::RetryScheduled)
                            .with_dependency(dependency)
                            .with_attempt(attempt + 1)
                            .with_message(message),
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryPolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicyEngine")
            .field("overrides", &self.overrides)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::events::BufferingSink;
    use crate::retry::Backoff;

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff: Backoff::Fixed,
            jitter: false,
            predicate: None,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let engine = RetryPolicyEngine::new();
        let calls = AtomicU32::new(0);

        let outcome = engine
            .run_with_retry("flaky", &instant_policy(3), || {
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

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.history.len(), 3);
        assert!(!outcome.history[0].succeeded);
        assert!(outcome.history[2].succeeded);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let events = Arc::new(BufferingSink::new());
        let engine = RetryPolicyEngine::new().with_events(events.clone());

        let outcome = engine
            .run_with_retry("down", &instant_policy(2), || async {
                Err::<(), RawError>("service unavailable".into())
            })
            .await;

        assert!(!outcome.succeeded());
        // 1 initial + 2 retries
        assert_eq!(outcome.attempts, 3);
        assert_eq!(events.count_of(EventKind::RetryScheduled), 2);
        assert_eq!(events.count_of(EventKind::RetryExhausted), 1);
    }

    #[tokio::test]
    async fn test_none_policy_runs_exactly_once() {
        let engine = RetryPolicyEngine::new();
        let calls = AtomicU32::new(0);

        let outcome = engine
            .run_with_retry("strict", &RetryPolicy::none(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), RawError>("required field missing".into()) }
            })
            .await;

        assert!(!outcome.succeeded());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_predicate_stops_retries_early() {
        let engine = RetryPolicyEngine::new();
        let policy = instant_policy(5)
            .with_predicate(Arc::new(|msg: &str, _| !msg.contains("permanent")));
        let calls = AtomicU32::new(0);

        let outcome = engine
            .run_with_retry("gate", &policy, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), RawError>("permanent failure".into()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!outcome.succeeded());
    }

    #[test]
    fn test_policy_for_prefers_override() {
        let mut engine = RetryPolicyEngine::new();
        engine.set_policy(ErrorCategory::Network, RetryPolicy::new(7, 50));

        assert_eq!(engine.policy_for(ErrorCategory::Network).max_retries, 7);
        // Unconfigured categories fall back to the built-in defaults
        assert_eq!(engine.policy_for(ErrorCategory::Validation).max_retries, 0);
    }
}
