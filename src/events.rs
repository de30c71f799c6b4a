//! Structured resilience events.
//!
//! Every classification, circuit transition, retry, fallback, and recovery
//! outcome is emitted as a `ResilienceEvent` with enough structured fields
//! for an external collector to consume without string parsing. The default
//! sink writes tracing records; tests use the buffering sink.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::circuit::CircuitState;
use crate::classifier::{ErrorCategory, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ErrorClassified,
    CircuitOpened,
    CircuitClosed,
    CircuitHalfOpened,
    CircuitRejected,
    RetryScheduled,
    RetryExhausted,
    FallbackServed,
    OfflineModeEntered,
    OfflineModeExited,
    RecoverySucceeded,
    RecoveryFallback,
    RecoveryBudgetExceeded,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorClassified => "error.classified",
            Self::CircuitOpened => "circuit.opened",
            Self::CircuitClosed => "circuit.closed",
            Self::CircuitHalfOpened => "circuit.half_opened",
            Self::CircuitRejected => "circuit.rejected",
            Self::RetryScheduled => "retry.scheduled",
            Self::RetryExhausted => "retry.exhausted",
            Self::FallbackServed => "fallback.served",
            Self::OfflineModeEntered => "offline.entered",
            Self::OfflineModeExited => "offline.exited",
            Self::RecoverySucceeded => "recovery.succeeded",
            Self::RecoveryFallback => "recovery.fallback",
            Self::RecoveryBudgetExceeded => "recovery.budget_exceeded",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpened
                | Self::CircuitRejected
                | Self::RetryExhausted
                | Self::OfflineModeEntered
                | Self::RecoveryBudgetExceeded
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResilienceEvent {
    pub kind: EventKind,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<CircuitState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResilienceEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            created_at: Utc::now(),
            dependency: None,
            category: None,
            severity: None,
            attempt: None,
            state: None,
            message: None,
        }
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_state(mut self, state: CircuitState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ResilienceEvent);
}

/// Default sink: one structured tracing record per event.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &ResilienceEvent) {
        if event.kind.is_error() {
            tracing::warn!(
                kind = event.kind.as_str(),
                dependency = event.dependency.as_deref().unwrap_or(""),
                category = event.category.map(|c| c.as_str()).unwrap_or(""),
                attempt = event.attempt.unwrap_or(0),
                message = event.message.as_deref().unwrap_or(""),
                "Resilience event"
            );
        } else {
            tracing::info!(
                kind = event.kind.as_str(),
                dependency = event.dependency.as_deref().unwrap_or(""),
                category = event.category.map(|c| c.as_str()).unwrap_or(""),
                attempt = event.attempt.unwrap_or(0),
                message = event.message.as_deref().unwrap_or(""),
                "Resilience event"
            );
        }
    }
}

/// Collects events in memory so tests can assert against them.
#[derive(Debug, Default)]
pub struct BufferingSink {
    events: Mutex<Vec<ResilienceEvent>>,
}

impl BufferingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<ResilienceEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn count_of(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

impl EventSink for BufferingSink {
    fn emit(&self, event: &ResilienceEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builders() {
        let event = ResilienceEvent::new(EventKind::CircuitOpened)
            .with_dependency("orders-api")
            .with_state(CircuitState::Open)
            .with_message("failure threshold reached");

        assert_eq!(event.kind.as_str(), "circuit.opened");
        assert_eq!(event.dependency.as_deref(), Some("orders-api"));
        assert!(event.kind.is_error());
    }

    #[test]
    fn test_buffering_sink_counts() {
        let sink = BufferingSink::new();
        sink.emit(&ResilienceEvent::new(EventKind::RetryScheduled));
        sink.emit(&ResilienceEvent::new(EventKind::RetryScheduled));
        sink.emit(&ResilienceEvent::new(EventKind::FallbackServed));

        assert_eq!(sink.count_of(EventKind::RetryScheduled), 2);
        assert_eq!(sink.count_of(EventKind::FallbackServed), 1);
        assert_eq!(sink.take().len(), 3);
        assert!(sink.events().is_empty());
    }
}
