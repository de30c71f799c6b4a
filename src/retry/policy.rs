use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::classifier::{ErrorCategory, ErrorClassifier, ErrorContext};

/// Predicate consulted before each retry: (error message, attempt number).
pub type RetryPredicate = Arc<dyn Fn(&str, u32) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; 0 means try once and give up.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
    /// Randomize each delay by +/-10% to avoid synchronized retry storms.
    pub jitter: bool,
    #[serde(skip)]
    pub predicate: Option<RetryPredicate>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff: Backoff::Exponential,
            jitter: true,
            predicate: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            ..Self::default()
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff: Backoff::Fixed,
            jitter: false,
            predicate: None,
        }
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Narrow this policy with an extra predicate; both must approve.
    pub fn and_predicate(mut self, extra: RetryPredicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => Arc::new(move |msg: &str, attempt: u32| {
                existing(msg, attempt) && extra(msg, attempt)
            }),
            None => extra,
        });
        self
    }

    /// Default retry posture per error category. Validation, authorization,
    /// configuration, and business-logic failures are deterministic and
    /// never retried. Authentication and system failures retry only when
    /// the message classifies as transient (an expired session or a crashed
    /// subsystem gains nothing from blind repetition; a timed-out token
    /// refresh might).
    pub fn for_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Network => Self::new(3, 1_000),
            ErrorCategory::Storage => Self::new(3, 2_000).with_max_delay_ms(60_000),
            ErrorCategory::Authentication => Self::new(1, 500)
                .with_backoff(Backoff::Fixed)
                .with_predicate(transient_cause_gate()),
            ErrorCategory::System => Self::new(2, 5_000).with_predicate(transient_cause_gate()),
            ErrorCategory::Unknown => Self::new(1, 1_000),
            ErrorCategory::Validation
            | ErrorCategory::Authorization
            | ErrorCategory::Configuration
            | ErrorCategory::BusinessLogic => Self::none(),
        }
    }

    /// Nominal delay before retry number `n` (1-based), before jitter.
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        if n == 0 || self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let raw_ms = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Linear => self.base_delay_ms.saturating_mul(u64::from(n)),
            Backoff::Exponential => {
                // Shift saturates well before u64 overflow territory
                let exp = (n - 1).min(32);
                self.base_delay_ms.saturating_mul(1u64 << exp)
            }
        };
        Duration::from_millis(raw_ms.min(self.max_delay_ms))
    }

    /// `delay_for_attempt` with jitter applied when enabled.
    pub fn jittered_delay(&self, n: u32) -> Duration {
        let nominal = self.delay_for_attempt(n);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let nominal_ms = nominal.as_millis() as u64;
        let spread = nominal_ms / 10;
        if spread == 0 {
            return nominal;
        }
        let offset = rand::thread_rng().gen_range(0..=spread * 2);
        Duration::from_millis(nominal_ms - spread + offset)
    }

    /// Whether retry number `n` (1-based) is permitted for this error.
    pub fn should_retry(&self, error_message: &str, n: u32) -> bool {
        if n > self.max_retries {
            return false;
        }
        match &self.predicate {
            Some(predicate) => predicate(error_message, n),
            None => true,
        }
    }
}

/// Predicate backing the Authentication/System defaults: only failures
/// whose message classifies as retryable earn a repeat attempt.
fn transient_cause_gate() -> RetryPredicate {
    Arc::new(|message, _| {
        ErrorClassifier::new()
            .classify_message(message, &ErrorContext::default())
            .retryable
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubling_clamped() {
        let policy = RetryPolicy::new(5, 1_000)
            .with_max_delay_ms(5_000)
            .with_jitter(false);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(5_000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(5_000));
    }

    #[test]
    fn test_linear_and_fixed_backoff() {
        let linear = RetryPolicy::new(3, 500)
            .with_backoff(Backoff::Linear)
            .with_jitter(false);
        assert_eq!(linear.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(1_500));

        let fixed = RetryPolicy::new(3, 500)
            .with_backoff(Backoff::Fixed)
            .with_jitter(false);
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn test_exponential_large_attempt_does_not_overflow() {
        let policy = RetryPolicy::new(100, u64::MAX / 2).with_jitter(false);
        assert_eq!(
            policy.delay_for_attempt(64),
            Duration::from_millis(policy.max_delay_ms)
        );
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::new(3, 10_000).with_max_delay_ms(60_000);
        for _ in 0..100 {
            let d = policy.jittered_delay(1).as_millis() as u64;
            assert!((9_000..=11_000).contains(&d), "jittered delay {d} out of range");
        }
    }

    #[test]
    fn test_should_retry_respects_max_and_predicate() {
        let policy = RetryPolicy::new(2, 100)
            .with_predicate(Arc::new(|msg, _| !msg.contains("fatal")));

        assert!(policy.should_retry("timeout", 1));
        assert!(policy.should_retry("timeout", 2));
        assert!(!policy.should_retry("timeout", 3));
        assert!(!policy.should_retry("fatal disk error", 1));
    }

    #[test]
    fn test_and_predicate_requires_both() {
        let policy = RetryPolicy::new(5, 100)
            .with_predicate(Arc::new(|msg, _| msg.contains("retryable")))
            .and_predicate(Arc::new(|_, n| n <= 2));

        assert!(policy.should_retry("retryable blip", 2));
        assert!(!policy.should_retry("retryable blip", 3));
        assert!(!policy.should_retry("other", 1));
    }

    #[test]
    fn test_authentication_default_retries_only_transient_causes() {
        let policy = RetryPolicy::for_category(ErrorCategory::Authentication);
        assert!(!policy.should_retry("invalid credential supplied", 1));
        assert!(policy.should_retry("token refresh timed out", 1));
    }

    #[test]
    fn test_system_default_retries_only_transient_causes() {
        let policy = RetryPolicy::for_category(ErrorCategory::System);
        assert!(!policy.should_retry("internal error: assertion failed", 1));
        assert!(policy.should_retry("connection reset during startup", 1));
    }

    #[test]
    fn test_deterministic_categories_never_retry() {
        for category in [
            ErrorCategory::Validation,
            ErrorCategory::Authorization,
            ErrorCategory::Configuration,
            ErrorCategory::BusinessLogic,
        ] {
            let policy = RetryPolicy::for_category(category);
            assert_eq!(policy.max_retries, 0, "{category:?} must not retry");
        }
    }
}
