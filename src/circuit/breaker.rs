use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::error::{CircuitOpenError, OperationTimeout, RawError};
use crate::events::{EventKind, EventSink, ResilienceEvent, TracingSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Absolute failure count that opens the circuit.
    pub failure_threshold: u32,
    /// Failure-rate ceiling; exceeding it also opens the circuit.
    pub expected_error_rate: f64,
    /// Requests required in the window before either rule applies.
    pub minimum_requests: u32,
    /// Open → HalfOpen after this long since the last failure.
    pub recovery_timeout_secs: u64,
    /// Counters reset wholesale once this long passes without a state change.
    pub monitoring_period_secs: u64,
    /// Deadline raced against each guarded call; 0 disables the race.
    pub call_timeout_secs: u64,
    /// `is_healthy` requires no failure within this window.
    pub healthy_quiet_period_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        super::presets::external_api()
    }
}

/// Failure from a guarded call: either the circuit rejected it outright,
/// or the operation itself failed (timeouts count as operation failures).
#[derive(Debug, Error)]
pub enum CircuitError {
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    #[error("{0}")]
    Operation(RawError),
}

impl CircuitError {
    /// Flatten into a raw error, keeping `CircuitOpenError` downcastable.
    pub fn into_raw(self) -> RawError {
        match self {
            Self::Open(e) => Box::new(e),
            Self::Operation(e) => e,
        }
    }
}

/// Point-in-time snapshot for health reporting and operator inspection.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub request_count: u32,
    pub error_rate: f64,
    pub last_failure_age_ms: Option<u64>,
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    request_count: u32,
    last_failure_at: Option<Instant>,
    last_state_change: Instant,
    next_attempt_at: Option<Instant>,
    /// HalfOpen admits exactly one trial call.
    probe_in_flight: bool,
}

/// Per-dependency state machine guarding against cascading failures.
///
/// Transitions are evaluated atomically relative to the triggering
/// success/failure: the state lock covers both the admission check and the
/// outcome recording, never the operation itself.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    events: Arc<dyn EventSink>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_parts(name, config, Arc::new(SystemClock), Arc::new(TracingSink))
    }

    pub fn with_parts(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            clock,
            events,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                request_count: 0,
                last_failure_at: None,
                last_state_change: now,
                next_attempt_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one operation under the breaker. Rejects immediately with
    /// `CircuitError::Open` when the circuit does not admit the call.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, CircuitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
    {
        let permit = self.try_acquire()?;

        let call_timeout = Duration::from_secs(self.config.call_timeout_secs);
        let outcome = if call_timeout.is_zero() {
            op().await
        } else {
            match tokio::time::timeout(call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(Box::new(OperationTimeout(call_timeout)) as RawError),
            }
        };

        match outcome {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                permit.failure();
                Err(CircuitError::Operation(error))
            }
        }
    }

    fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.maybe_reset_window(&mut inner, now);

        match inner.state {
            CircuitState::Closed => {
                inner.request_count += 1;
                Ok(self.permit(false))
            }
            CircuitState::Open => {
                if let Some(at) = inner.next_attempt_at {
                    if now >= at {
                        self.transition(&mut inner, CircuitState::HalfOpen, now);
                        inner.probe_in_flight = true;
                        inner.request_count += 1;
                        return Ok(self.permit(true));
                    }
                }
                self.emit_rejected(&inner, now);
                Err(CircuitError::Open(self.open_error(&inner, now)))
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    self.emit_rejected(&inner, now);
                    return Err(CircuitError::Open(self.open_error(&inner, now)));
                }
                inner.probe_in_flight = true;
                inner.request_count += 1;
                Ok(self.permit(true))
            }
        }
    }

    fn permit(&self, probe: bool) -> CallPermit<'_> {
        CallPermit {
            breaker: self,
            probe,
            settled: false,
        }
    }

    /// An admitted trial call whose future was dropped never reports an
    /// outcome; count it as a failure so the probe slot is not stranded.
    fn abandon_probe(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            warn!(circuit = %self.name, "Half-open trial call abandoned before completion");
            inner.probe_in_flight = false;
            inner.failure_count += 1;
            inner.last_failure_at = Some(now);
            inner.next_attempt_at =
                Some(now + Duration::from_secs(self.config.recovery_timeout_secs));
            self.transition(&mut inner, CircuitState::Open, now);
        }
    }

    fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.success_count += 1;

        if inner.state == CircuitState::HalfOpen {
            // Trial call succeeded: full counter reset
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.request_count = 0;
            inner.last_failure_at = None;
            inner.next_attempt_at = None;
            inner.probe_in_flight = false;
            self.transition(&mut inner, CircuitState::Closed, now);
        }
    }

    fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_at = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.next_attempt_at =
                    Some(now + Duration::from_secs(self.config.recovery_timeout_secs));
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Closed => {
                if self.should_open(&inner) {
                    inner.next_attempt_at =
                        Some(now + Duration::from_secs(self.config.recovery_timeout_secs));
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn should_open(&self, inner: &Inner) -> bool {
        if inner.request_count < self.config.minimum_requests {
            return false;
        }
        inner.failure_count >= self.config.failure_threshold
            || Self::error_rate(inner) > self.config.expected_error_rate
    }

    fn error_rate(inner: &Inner) -> f64 {
        if inner.request_count == 0 {
            0.0
        } else {
            f64::from(inner.failure_count) / f64::from(inner.request_count)
        }
    }

    /// Stale failure history must not keep a now-healthy dependency
    /// permanently suspect; counters reset wholesale once the monitoring
    /// window elapses without a state change.
    fn maybe_reset_window(&self, inner: &mut Inner, now: Instant) {
        let period = Duration::from_secs(self.config.monitoring_period_secs);
        if !period.is_zero() && now.duration_since(inner.last_state_change) > period {
            debug!(circuit = %self.name, "Monitoring period elapsed, resetting counters");
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.request_count = 0;
            inner.last_state_change = now;
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.last_state_change = now;

        let kind = match to {
            CircuitState::Open => EventKind::CircuitOpened,
            CircuitState::Closed => EventKind::CircuitClosed,
            CircuitState::HalfOpen => EventKind::CircuitHalfOpened,
        };
        if to == CircuitState::Open {
            warn!(circuit = %self.name, from = %from, to = %to, failures = inner.failure_count, "Circuit state changed");
        } else {
            info!(circuit = %self.name, from = %from, to = %to, "Circuit state changed");
        }
        self.events.emit(
            &ResilienceEvent::new(kind)
                .with_dependency(self.name.clone())
                .with_state(to),
        );
    }

    fn open_error(&self, inner: &Inner, now: Instant) -> CircuitOpenError {
        let retry_in_ms = inner
            .next_attempt_at
            .and_then(|at| at.checked_duration_since(now))
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        CircuitOpenError {
            name: self.name.clone(),
            retry_in_ms,
        }
    }

    fn emit_rejected(&self, inner: &Inner, now: Instant) {
        debug!(circuit = %self.name, state = %inner.state, "Call rejected by open circuit");
        self.events.emit(
            &ResilienceEvent::new(EventKind::CircuitRejected)
                .with_dependency(self.name.clone())
                .with_state(inner.state)
                .with_message(self.open_error(inner, now).to_string()),
        );
    }

    /// Operator override for maintenance: reject all calls until the
    /// recovery timeout lapses or `force_close` is called.
    pub fn force_open(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.next_attempt_at =
            Some(now + Duration::from_secs(self.config.recovery_timeout_secs));
        self.transition(&mut inner, CircuitState::Open, now);
    }

    pub fn force_close(&self) {
        self.reset();
    }

    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.request_count = 0;
        inner.last_failure_at = None;
        inner.next_attempt_at = None;
        inner.probe_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed, now);
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> CircuitStats {
        let now = self.clock.now();
        let inner = self.inner.lock();
        CircuitStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            request_count: inner.request_count,
            error_rate: Self::error_rate(&inner),
            last_failure_age_ms: inner
                .last_failure_at
                .map(|at| now.duration_since(at).as_millis() as u64),
            open_remaining_ms: inner
                .next_attempt_at
                .and_then(|at| at.checked_duration_since(now))
                .map(|d| d.as_millis() as u64),
        }
    }

    /// Closed, error rate within expectations, and quiet for the
    /// configured window (30s by default).
    pub fn is_healthy(&self) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            return false;
        }
        if Self::error_rate(&inner) > self.config.expected_error_rate {
            return false;
        }
        let quiet = Duration::from_secs(self.config.healthy_quiet_period_secs);
        inner
            .last_failure_at
            .map(|at| now.duration_since(at) >= quiet)
            .unwrap_or(true)
    }
}

/// Admission token for one guarded call. The outcome must be recorded
/// through it; if the caller's future is dropped mid-call, `Drop` releases
/// an admitted half-open probe slot by recording the abandoned trial as a
/// failure.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.abandon_probe();
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
