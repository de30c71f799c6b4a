use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::{ClassifiedError, ErrorCategory};
use crate::clock::{SharedClock, SystemClock};
use crate::error::{PalisadeError, RawError, Result};
use crate::events::{EventKind, EventSink, ResilienceEvent, TracingSink};

use super::handlers::{default_handlers, FallbackDisposition, FallbackHandler, RESOURCE_CONTEXT_KEY};

/// Cache key under which a reusable credential token may be stashed.
pub const CREDENTIAL_TOKEN_KEY: &str = "auth.credential_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Api,
    Fallback,
    Offline,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: Instant,
    pub provenance: Provenance,
    pub category: Option<ErrorCategory>,
}

/// Where a served value ultimately came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Primary,
    Cache,
    StaticFallback,
    ExpiredCache,
    Handler,
}

/// A value plus enough provenance for the caller to render a
/// "data may be outdated" indicator without special-casing each path.
#[derive(Debug, Clone)]
pub struct Served<T> {
    pub value: T,
    pub source: DataSource,
    pub degraded: bool,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackStoreConfig {
    pub default_ttl_secs: u64,
    /// When disabled, offline mode never serves expired entries.
    pub offline_mode_enabled: bool,
}

impl Default for FallbackStoreConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            offline_mode_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub expired_entries: usize,
    pub offline: bool,
    pub preserved_inputs: usize,
}

/// TTL cache plus a per-category chain of degradation handlers.
pub struct FallbackStore {
    config: FallbackStoreConfig,
    entries: DashMap<String, CacheEntry>,
    handlers: RwLock<HashMap<ErrorCategory, Vec<Arc<dyn FallbackHandler>>>>,
    offline: AtomicBool,
    preserved_inputs: DashMap<String, HashMap<String, String>>,
    clock: SharedClock,
    events: Arc<dyn EventSink>,
}

impl FallbackStore {
    pub fn new(config: FallbackStoreConfig) -> Self {
        Self::with_parts(config, Arc::new(SystemClock), Arc::new(TracingSink))
    }

    pub fn with_parts(
        config: FallbackStoreConfig,
        clock: SharedClock,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            handlers: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
            preserved_inputs: DashMap::new(),
            clock,
            events,
        }
    }

    /// Register the built-in handler set for each category it covers.
    pub fn with_default_handlers(self) -> Self {
        for (category, handler) in default_handlers() {
            self.register_handler(category, handler);
        }
        self
    }

    /// Values written while disconnected are tagged `offline` so readers can
    /// tell them apart from confirmed API responses.
    pub fn cache(&self, key: impl Into<String>, value: serde_json::Value, ttl: Option<Duration>) {
        let provenance = if self.is_offline() {
            Provenance::Offline
        } else {
            Provenance::Api
        };
        self.cache_tagged(key, value, ttl, provenance, None);
    }

    pub fn cache_tagged(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl: Option<Duration>,
        provenance: Provenance,
        category: Option<ErrorCategory>,
    ) {
        let key = key.into();
        let ttl = ttl.unwrap_or(Duration::from_secs(self.config.default_ttl_secs));
        let entry = CacheEntry {
            key: key.clone(),
            value,
            created_at: Utc::now(),
            expires_at: self.clock.now() + ttl,
            provenance,
            category,
        };
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached fallback entry");
        self.entries.insert(key, entry);
    }

    /// Fresh (unexpired) cached value, if any.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.get(key).and_then(|entry| {
            if self.is_expired(&entry) {
                None
            } else {
                Some(entry.value.clone())
            }
        })
    }

    /// Cached entry regardless of expiry. Offline-mode path only.
    pub fn get_any(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    pub fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.clock.now() >= entry.expires_at
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn invalidate_category(&self, category: ErrorCategory) {
        self.entries.retain(|_, entry| entry.category != Some(category));
    }

    /// Drop every expired entry. Callers decide when; there is no sweeper task.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, entry| now < entry.expires_at);
    }

    /// Flip connectivity state. Entering offline mode relaxes the TTL check
    /// for reads; it never clears the cache.
    pub fn set_online(&self, online: bool) {
        let was_offline = self.offline.swap(!online, Ordering::SeqCst);
        if was_offline == !online {
            return;
        }
        if online {
            info!("Connectivity restored, leaving offline mode");
            self.events
                .emit(&ResilienceEvent::new(EventKind::OfflineModeExited));
        } else {
            warn!("Connectivity lost, entering offline mode");
            self.events
                .emit(&ResilienceEvent::new(EventKind::OfflineModeEntered));
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Follow connectivity transitions from a watch channel. The spawned
    /// task ends when the sender side is dropped.
    pub fn watch_connectivity(
        self: Arc<Self>,
        mut connectivity: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            store.set_online(*connectivity.borrow());
            while connectivity.changed().await.is_ok() {
                let online = *connectivity.borrow();
                store.set_online(online);
            }
        })
    }

    pub fn register_handler(&self, category: ErrorCategory, handler: Arc<dyn FallbackHandler>) {
        self.handlers
            .write()
            .entry(category)
            .or_default()
            .push(handler);
    }

    /// Stash a caller's in-flight input so it survives the failed request.
    pub fn preserve_input(&self, key: impl Into<String>, input: HashMap<String, String>) {
        self.preserved_inputs.insert(key.into(), input);
    }

    /// Take (and clear) input preserved under `key`.
    pub fn take_preserved_input(&self, key: &str) -> Option<HashMap<String, String>> {
        self.preserved_inputs.remove(key).map(|(_, v)| v)
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let expired = self
            .entries
            .iter()
            .filter(|entry| now >= entry.expires_at)
            .count();
        CacheStats {
            entries: self.entries.len(),
            expired_entries: expired,
            offline: self.is_offline(),
            preserved_inputs: self.preserved_inputs.len(),
        }
    }

    /// Try the primary source, then degrade in order: fresh cache, static
    /// fallback, expired cache while offline. Every non-primary path is
    /// flagged `degraded`.
    pub async fn get_with_fallback<F, Fut>(
        &self,
        key: &str,
        primary: F,
        static_fallback: Option<serde_json::Value>,
    ) -> Result<Served<serde_json::Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<serde_json::Value, RawError>>,
    {
        match primary().await {
            Ok(value) => {
                self.cache(key, value.clone(), None);
                return Ok(Served {
                    value,
                    source: DataSource::Primary,
                    degraded: false,
                    note: "primary source".into(),
                });
            }
            Err(error) => {
                debug!(key = %key, error = %error, "Primary source failed, degrading");
            }
        }

        if let Some(value) = self.get(key) {
            return Ok(self.serve_degraded(
                key,
                value,
                DataSource::Cache,
                "served from cache; data may be stale",
            ));
        }

        if let Some(value) = static_fallback {
            return Ok(self.serve_degraded(
                key,
                value,
                DataSource::StaticFallback,
                "served static fallback value",
            ));
        }

        if self.is_offline() && self.config.offline_mode_enabled {
            if let Some(entry) = self.get_any(key) {
                return Ok(self.serve_degraded(
                    key,
                    entry.value,
                    DataSource::ExpiredCache,
                    "offline mode: served expired cache entry",
                ));
            }
        }

        Err(PalisadeError::FallbackUnavailable(key.to_string()))
    }

    pub(crate) fn serve_degraded(
        &self,
        key: &str,
        value: serde_json::Value,
        source: DataSource,
        note: &str,
    ) -> Served<serde_json::Value> {
        info!(key = %key, source = ?source, "Serving degraded result");
        self.events.emit(
            &ResilienceEvent::new(EventKind::FallbackServed)
                .with_dependency(key)
                .with_message(note),
        );
        Served {
            value,
            source,
            degraded: true,
            note: note.to_string(),
        }
    }

    /// Run the handler chain registered for the error's category, stopping
    /// at the first handler that resolves a substitute value.
    pub async fn execute_fallback(
        &self,
        error: &ClassifiedError,
    ) -> Result<Served<serde_json::Value>> {
        let chain: Vec<Arc<dyn FallbackHandler>> = self
            .handlers
            .read()
            .get(&error.category)
            .cloned()
            .unwrap_or_default();

        for handler in chain {
            match handler.handle(error, self).await {
                FallbackDisposition::Resolved { value, note } => {
                    // Substitute values are cached under the failed resource
                    // so later reads can serve them without re-running the chain
                    if let Some(key) = error.context.additional_data.get(RESOURCE_CONTEXT_KEY) {
                        self.cache_tagged(
                            key.clone(),
                            value.clone(),
                            None,
                            Provenance::Fallback,
                            Some(error.category),
                        );
                    }
                    self.events.emit(
                        &ResilienceEvent::new(EventKind::FallbackServed)
                            .with_dependency(error.context.component.clone())
                            .with_category(error.category)
                            .with_message(note.clone()),
                    );
                    return Ok(Served {
                        value,
                        source: DataSource::Handler,
                        degraded: true,
                        note,
                    });
                }
                FallbackDisposition::Unresolved => {
                    debug!(
                        handler = handler.name(),
                        category = %error.category,
                        "Fallback handler did not resolve"
                    );
                }
            }
        }

        Err(PalisadeError::FallbackUnavailable(error.recovery_key()))
    }
}

impl std::fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStore")
            .field("entries", &self.entries.len())
            .field("offline", &self.is_offline())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn manual_store() -> (FallbackStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let store = FallbackStore::with_parts(
            FallbackStoreConfig::default(),
            clock.clone(),
            Arc::new(TracingSink),
        );
        (store, clock)
    }

    #[test]
    fn test_cache_expires_after_ttl() {
        let (store, clock) = manual_store();
        store.cache("user:1", json!({"name": "ada"}), Some(Duration::from_secs(60)));

        assert_eq!(store.get("user:1"), Some(json!({"name": "ada"})));

        clock.advance(Duration::from_secs(61));
        assert_eq!(store.get("user:1"), None);
        // Entry still present for offline reads until purged
        assert!(store.get_any("user:1").is_some());

        store.purge_expired();
        assert!(store.get_any("user:1").is_none());
    }

    #[test]
    fn test_invalidate_by_key_and_category() {
        let (store, _clock) = manual_store();
        store.cache_tagged("a", json!(1), None, Provenance::Api, Some(ErrorCategory::Network));
        store.cache_tagged("b", json!(2), None, Provenance::Api, Some(ErrorCategory::Storage));
        store.cache("c", json!(3), None);

        store.invalidate("c");
        assert!(store.get("c").is_none());

        store.invalidate_category(ErrorCategory::Network);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
    }

    #[tokio::test]
    async fn test_get_with_fallback_prefers_primary() {
        let (store, _clock) = manual_store();
        let served = store
            .get_with_fallback("k", || async { Ok(json!("fresh")) }, None)
            .await
            .unwrap();

        assert_eq!(served.value, json!("fresh"));
        assert_eq!(served.source, DataSource::Primary);
        assert!(!served.degraded);
        // Successful primary result was cached for later degradation
        assert_eq!(store.get("k"), Some(json!("fresh")));
    }

    #[tokio::test]
    async fn test_get_with_fallback_degrades_to_cache() {
        let (store, _clock) = manual_store();
        store.cache("k", json!("cached"), None);

        let served = store
            .get_with_fallback("k", || async { Err::<serde_json::Value, RawError>("down".into()) }, None)
            .await
            .unwrap();

        assert_eq!(served.value, json!("cached"));
        assert_eq!(served.source, DataSource::Cache);
        assert!(served.degraded);
    }

    #[tokio::test]
    async fn test_get_with_fallback_static_then_offline_then_error() {
        let (store, clock) = manual_store();
        store.cache("k", json!("old"), Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(2));

        // Expired entry, online: static fallback wins
        let served = store
            .get_with_fallback(
                "k",
                || async { Err::<serde_json::Value, RawError>("down".into()) },
                Some(json!("static")),
            )
            .await
            .unwrap();
        assert_eq!(served.source, DataSource::StaticFallback);

        // Expired entry, offline, no static: expired cache is allowed
        store.set_online(false);
        let served = store
            .get_with_fallback("k", || async { Err::<serde_json::Value, RawError>("down".into()) }, None)
            .await
            .unwrap();
        assert_eq!(served.source, DataSource::ExpiredCache);
        assert_eq!(served.value, json!("old"));

        // Online again: expired entry no longer served
        store.set_online(true);
        let result = store
            .get_with_fallback("k", || async { Err::<serde_json::Value, RawError>("down".into()) }, None)
            .await;
        assert!(matches!(result, Err(PalisadeError::FallbackUnavailable(_))));
    }

    #[tokio::test]
    async fn test_offline_mode_disabled_never_serves_expired() {
        let clock = Arc::new(ManualClock::new());
        let store = FallbackStore::with_parts(
            FallbackStoreConfig {
                default_ttl_secs: 1,
                offline_mode_enabled: false,
            },
            clock.clone(),
            Arc::new(TracingSink),
        );
        store.cache("k", json!("old"), None);
        clock.advance(Duration::from_secs(2));
        store.set_online(false);

        let result = store
            .get_with_fallback("k", || async { Err::<serde_json::Value, RawError>("down".into()) }, None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_watch_connectivity_flips_offline_flag() {
        let (store, _clock) = manual_store();
        let store = Arc::new(store);
        let (tx, rx) = tokio::sync::watch::channel(true);
        let handle = store.clone().watch_connectivity(rx);

        tx.send(false).unwrap();
        // Give the watcher task a chance to observe the change
        for _ in 0..50 {
            if store.is_offline() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(store.is_offline());

        tx.send(true).unwrap();
        for _ in 0..50 {
            if !store.is_offline() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(!store.is_offline());

        drop(tx);
        let _ = handle.await;
    }

    #[test]
    fn test_cache_while_offline_records_offline_provenance() {
        let (store, _clock) = manual_store();
        store.cache("profile", json!({"name": "ada"}), None);
        assert_eq!(store.get_any("profile").unwrap().provenance, Provenance::Api);

        store.set_online(false);
        store.cache("profile", json!({"name": "ada"}), None);
        assert_eq!(
            store.get_any("profile").unwrap().provenance,
            Provenance::Offline
        );
    }

    #[tokio::test]
    async fn test_handler_resolution_recaches_with_fallback_provenance() {
        let (store, _clock) = manual_store();
        let store = store.with_default_handlers();
        store.cache("orders", json!(["o1"]), None);

        let context = crate::classifier::ErrorContext::new("orders-api", "list")
            .with_data(RESOURCE_CONTEXT_KEY, "orders");
        let error = crate::classifier::ErrorClassifier::new()
            .classify_message("database query failed", &context);
        assert_eq!(error.category, ErrorCategory::Storage);

        let served = store.execute_fallback(&error).await.unwrap();
        assert_eq!(served.value, json!(["o1"]));

        let entry = store.get_any("orders").unwrap();
        assert_eq!(entry.provenance, Provenance::Fallback);
        assert_eq!(entry.category, Some(ErrorCategory::Storage));
    }

    #[test]
    fn test_preserved_input_round_trip() {
        let (store, _clock) = manual_store();
        let mut input = HashMap::new();
        input.insert("email".to_string(), "ada@example.com".to_string());

        store.preserve_input("validation:form:submit", input.clone());
        assert_eq!(store.take_preserved_input("validation:form:submit"), Some(input));
        assert_eq!(store.take_preserved_input("validation:form:submit"), None);
    }
}
