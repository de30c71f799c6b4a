//! Degraded-mode data serving.
//!
//! A TTL cache and a per-category chain of fallback handlers. The degradation
//! order for a read is primary source, fresh cache, caller-supplied static
//! value, then (offline only) expired cache. Everything served from a
//! non-primary path carries a `degraded` flag and a provenance note.

mod handlers;
mod store;

pub use handlers::{
    default_handlers, CachedCredentialHandler, CachedReadHandler, CatchAllHandler,
    FallbackDisposition, FallbackHandler, InputPreservationHandler, OfflineModeHandler,
    RESOURCE_CONTEXT_KEY,
};
pub use store::{
    CacheEntry, CacheStats, DataSource, FallbackStore, FallbackStoreConfig, Provenance, Served,
    CREDENTIAL_TOKEN_KEY,
};
