use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::circuit::{CircuitBreaker, CircuitBreakerConfig};
use crate::clock::{SharedClock, SystemClock};
use crate::events::{EventSink, TracingSink};
use crate::retry::{RetryPolicy, RetryPolicyEngine};

use super::dependency::{DependencyGuard, DependencyMetrics};

/// Tri-state health rollup used for registry and system-wide verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// All healthy is healthy; more than half healthy is degraded;
    /// anything less is unhealthy. An empty set counts as healthy.
    pub fn from_ratio(healthy: usize, total: usize) -> Self {
        if total == 0 || healthy == total {
            Self::Healthy
        } else if healthy * 2 > total {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryHealth {
    pub status: HealthStatus,
    pub healthy: usize,
    pub total: usize,
    pub dependencies: Vec<DependencyMetrics>,
}

/// All registered dependency guards, one per external dependency name.
/// Guards are created once and persist for the registry's lifetime.
pub struct DependencyRegistry {
    guards: DashMap<String, Arc<DependencyGuard>>,
    retry_engine: Arc<RetryPolicyEngine>,
    clock: SharedClock,
    events: Arc<dyn EventSink>,
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(RetryPolicyEngine::new()),
            Arc::new(SystemClock),
            Arc::new(TracingSink),
        )
    }

    pub fn with_parts(
        retry_engine: Arc<RetryPolicyEngine>,
        clock: SharedClock,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            guards: DashMap::new(),
            retry_engine,
            clock,
            events,
        }
    }

    /// Register a guard under `name`, replacing any previous registration.
    pub fn register(
        &self,
        name: impl Into<String>,
        breaker_config: CircuitBreakerConfig,
        policy: RetryPolicy,
    ) -> Arc<DependencyGuard> {
        let name = name.into();
        let breaker = Arc::new(CircuitBreaker::with_parts(
            name.clone(),
            breaker_config,
            self.clock.clone(),
            self.events.clone(),
        ));
        let guard = Arc::new(DependencyGuard::new(
            name.clone(),
            breaker,
            policy,
            self.retry_engine.clone(),
            self.clock.clone(),
        ));
        self.guards.insert(name, guard.clone());
        guard
    }

    pub fn get(&self, name: &str) -> Option<Arc<DependencyGuard>> {
        self.guards.get(name).map(|g| g.clone())
    }

    /// Existing guard for `name`, or one created with the given defaults.
    pub fn get_or_register(
        &self,
        name: &str,
        breaker_config: CircuitBreakerConfig,
        policy: RetryPolicy,
    ) -> Arc<DependencyGuard> {
        match self.get(name) {
            Some(guard) => guard,
            None => self.register(name, breaker_config, policy),
        }
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn health(&self) -> RegistryHealth {
        let mut dependencies = Vec::with_capacity(self.guards.len());
        let mut healthy = 0;
        for guard in self.guards.iter() {
            if guard.is_healthy() {
                healthy += 1;
            }
            dependencies.push(guard.metrics());
        }
        dependencies.sort_by(|a, b| a.name.cmp(&b.name));
        RegistryHealth {
            status: HealthStatus::from_ratio(healthy, dependencies.len()),
            healthy,
            total: dependencies.len(),
            dependencies,
        }
    }
}

impl std::fmt::Debug for DependencyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyRegistry")
            .field("guards", &self.guards.len())
            .finish()
    }
}
