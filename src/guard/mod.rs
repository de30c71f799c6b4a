//! Per-dependency guards and the registry that aggregates their health.

mod dependency;
mod registry;

pub use dependency::{DependencyGuard, DependencyMetrics};
pub use registry::{DependencyRegistry, HealthStatus, RegistryHealth};
