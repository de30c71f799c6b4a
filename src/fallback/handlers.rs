use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::classifier::{ClassifiedError, ErrorCategory};

use super::store::{FallbackStore, CREDENTIAL_TOKEN_KEY};

/// Context key naming the resource a failed call was reading, so cache-based
/// handlers know which entry to try. ("key" itself is a redacted fragment,
/// so callers must use "resource".)
pub const RESOURCE_CONTEXT_KEY: &str = "resource";

/// Outcome of one handler in the chain.
#[derive(Debug)]
pub enum FallbackDisposition {
    Resolved { value: serde_json::Value, note: String },
    Unresolved,
}

impl FallbackDisposition {
    pub fn resolved(value: serde_json::Value, note: impl Into<String>) -> Self {
        Self::Resolved {
            value,
            note: note.into(),
        }
    }
}

#[async_trait]
pub trait FallbackHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, error: &ClassifiedError, store: &FallbackStore) -> FallbackDisposition;
}

fn resource_key(error: &ClassifiedError) -> Option<&str> {
    error
        .context
        .additional_data
        .get(RESOURCE_CONTEXT_KEY)
        .map(String::as_str)
}

/// Authentication: reuse a cached credential token before forcing the user
/// through a full re-authentication.
#[derive(Debug, Default)]
pub struct CachedCredentialHandler;

#[async_trait]
impl FallbackHandler for CachedCredentialHandler {
    fn name(&self) -> &'static str {
        "cached_credential"
    }

    async fn handle(&self, _error: &ClassifiedError, store: &FallbackStore) -> FallbackDisposition {
        match store.get(CREDENTIAL_TOKEN_KEY) {
            Some(token) => {
                info!("Reusing cached credential token");
                FallbackDisposition::resolved(token, "reused cached credential token")
            }
            None => FallbackDisposition::Unresolved,
        }
    }
}

/// Network: enter offline mode and serve whatever the cache holds for the
/// failed resource, expired or not.
#[derive(Debug, Default)]
pub struct OfflineModeHandler;

#[async_trait]
impl FallbackHandler for OfflineModeHandler {
    fn name(&self) -> &'static str {
        "offline_mode"
    }

    async fn handle(&self, error: &ClassifiedError, store: &FallbackStore) -> FallbackDisposition {
        store.set_online(false);
        let Some(key) = resource_key(error) else {
            return FallbackDisposition::Unresolved;
        };
        match store.get_any(key) {
            Some(entry) => FallbackDisposition::resolved(
                entry.value,
                "offline mode: served cached entry; data may be stale",
            ),
            None => FallbackDisposition::Unresolved,
        }
    }
}

/// Storage: a failed read may still be answerable from a fresh cache entry.
#[derive(Debug, Default)]
pub struct CachedReadHandler;

#[async_trait]
impl FallbackHandler for CachedReadHandler {
    fn name(&self) -> &'static str {
        "cached_read"
    }

    async fn handle(&self, error: &ClassifiedError, store: &FallbackStore) -> FallbackDisposition {
        let Some(key) = resource_key(error) else {
            return FallbackDisposition::Unresolved;
        };
        match store.get(key) {
            Some(value) => {
                FallbackDisposition::resolved(value, "served cached read; data may be stale")
            }
            None => FallbackDisposition::Unresolved,
        }
    }
}

/// Validation: never resolves a value. Preserves the caller's in-flight
/// input so it is not lost when the form re-renders.
#[derive(Debug, Default)]
pub struct InputPreservationHandler;

#[async_trait]
impl FallbackHandler for InputPreservationHandler {
    fn name(&self) -> &'static str {
        "input_preservation"
    }

    async fn handle(&self, error: &ClassifiedError, store: &FallbackStore) -> FallbackDisposition {
        if !error.context.additional_data.is_empty() {
            store.preserve_input(error.recovery_key(), error.context.additional_data.clone());
            info!(key = %error.recovery_key(), "Preserved in-flight input");
        }
        FallbackDisposition::Unresolved
    }
}

/// Unknown-category catch-all: try the cache, otherwise surface a generic
/// notice and give up.
#[derive(Debug, Default)]
pub struct CatchAllHandler;

#[async_trait]
impl FallbackHandler for CatchAllHandler {
    fn name(&self) -> &'static str {
        "catch_all"
    }

    async fn handle(&self, error: &ClassifiedError, store: &FallbackStore) -> FallbackDisposition {
        if let Some(key) = resource_key(error) {
            if let Some(value) = store.get(key) {
                return FallbackDisposition::resolved(
                    value,
                    "served cached entry; data may be stale",
                );
            }
        }
        warn!(
            component = %error.context.component,
            action = %error.context.action,
            "No fallback available; surfacing generic notice"
        );
        FallbackDisposition::Unresolved
    }
}

/// The built-in handler chain, one entry per covered category.
pub fn default_handlers() -> Vec<(ErrorCategory, Arc<dyn FallbackHandler>)> {
    vec![
        (ErrorCategory::Authentication, Arc::new(CachedCredentialHandler)),
        (ErrorCategory::Network, Arc::new(OfflineModeHandler)),
        (ErrorCategory::Storage, Arc::new(CachedReadHandler)),
        (ErrorCategory::Validation, Arc::new(InputPreservationHandler)),
        (ErrorCategory::Unknown, Arc::new(CatchAllHandler)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ErrorClassifier, ErrorContext};
    use crate::fallback::store::FallbackStoreConfig;
    use serde_json::json;

    fn classified(message: &str, context: &ErrorContext) -> ClassifiedError {
        ErrorClassifier::new().classify_message(message, context)
    }

    #[tokio::test]
    async fn test_credential_handler_reuses_cached_token() {
        let store = FallbackStore::new(FallbackStoreConfig::default());
        let error = classified("login failed", &ErrorContext::new("auth", "login"));

        let handler = CachedCredentialHandler;
        assert!(matches!(
            handler.handle(&error, &store).await,
            FallbackDisposition::Unresolved
        ));

        store.cache(CREDENTIAL_TOKEN_KEY, json!("tok-123"), None);
        match handler.handle(&error, &store).await {
            FallbackDisposition::Resolved { value, .. } => assert_eq!(value, json!("tok-123")),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_offline_handler_enters_offline_and_serves_expired() {
        let store = FallbackStore::new(FallbackStoreConfig::default());
        store.cache("orders", json!(["o1"]), None);

        let context =
            ErrorContext::new("orders-api", "list").with_data(RESOURCE_CONTEXT_KEY, "orders");
        let error = classified("network unreachable", &context);

        let handler = OfflineModeHandler;
        match handler.handle(&error, &store).await {
            FallbackDisposition::Resolved { value, .. } => assert_eq!(value, json!(["o1"])),
            other => panic!("expected resolved, got {other:?}"),
        }
        assert!(store.is_offline());
    }

    #[tokio::test]
    async fn test_input_preservation_never_resolves() {
        let store = FallbackStore::new(FallbackStoreConfig::default());
        let context = ErrorContext::new("form", "submit").with_data("email", "ada@example.com");
        let error = classified("required field missing", &context);

        let handler = InputPreservationHandler;
        assert!(matches!(
            handler.handle(&error, &store).await,
            FallbackDisposition::Unresolved
        ));
        let preserved = store.take_preserved_input(&error.recovery_key());
        assert!(preserved.is_some());
    }

    #[tokio::test]
    async fn test_default_chain_validation_error_surfaces() {
        let store = FallbackStore::new(FallbackStoreConfig::default()).with_default_handlers();
        let error = classified(
            "required field missing",
            &ErrorContext::new("form", "submit"),
        );

        // Input preservation runs but resolves nothing
        assert!(store.execute_fallback(&error).await.is_err());
    }
}
