//! Circuit breaking.
//!
//! One `CircuitBreaker` per external dependency. Transitions are evaluated
//! lazily against the injected clock, so no background task is needed: an
//! open circuit moves to half-open on the first call after the recovery
//! timeout, and counters reset when the monitoring period elapses.

mod breaker;
pub mod presets;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState, CircuitStats};
