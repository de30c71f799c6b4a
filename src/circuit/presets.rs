//! Breaker configurations tuned per dependency class.

use super::CircuitBreakerConfig;

/// Third-party HTTP APIs: tolerate a burst of failures, back off for 30s.
pub fn external_api() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 5,
        expected_error_rate: 0.5,
        minimum_requests: 5,
        recovery_timeout_secs: 30,
        monitoring_period_secs: 600,
        call_timeout_secs: 10,
        healthy_quiet_period_secs: 30,
    }
}

/// Databases and object stores: slower to trip, slower to retry.
pub fn storage() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 10,
        expected_error_rate: 0.6,
        minimum_requests: 10,
        recovery_timeout_secs: 60,
        monitoring_period_secs: 900,
        call_timeout_secs: 30,
        healthy_quiet_period_secs: 60,
    }
}

/// Dependencies on the critical path: trip early, probe quickly.
pub fn critical_service() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        expected_error_rate: 0.3,
        minimum_requests: 3,
        recovery_timeout_secs: 15,
        monitoring_period_secs: 300,
        call_timeout_secs: 5,
        healthy_quiet_period_secs: 30,
    }
}

/// Deterministic values for tests: no call timeout, tight windows.
pub fn test() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 2,
        expected_error_rate: 0.5,
        minimum_requests: 2,
        recovery_timeout_secs: 1,
        monitoring_period_secs: 60,
        call_timeout_secs: 0,
        healthy_quiet_period_secs: 1,
    }
}
