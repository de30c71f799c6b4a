use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker substituted for any value bound to a secret-looking key.
pub const REDACTION_MARKER: &str = "[REDACTED]";

const SENSITIVE_KEY_FRAGMENTS: [&str; 5] =
    ["password", "token", "key", "secret", "authorization"];

/// Whether a context key must never have its value surfaced.
pub(crate) fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|f| key.contains(f))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    Authorization,
    Validation,
    Network,
    Storage,
    BusinessLogic,
    Configuration,
    System,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [Self; 9] = [
        Self::Authentication,
        Self::Authorization,
        Self::Validation,
        Self::Network,
        Self::Storage,
        Self::BusinessLogic,
        Self::Configuration,
        Self::System,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::BusinessLogic => "business_logic",
            Self::Configuration => "configuration",
            Self::System => "system",
            Self::Unknown => "unknown",
        }
    }

    /// Localized-ready end-user text. Raw technical detail stays in
    /// diagnostics for operator consumption only.
    pub fn user_facing_message(&self) -> &'static str {
        match self {
            Self::Authentication => "Your session could not be verified. Please sign in again.",
            Self::Authorization => "You do not have permission to perform this action.",
            Self::Validation => {
                "Some of the provided information is invalid. Please review and try again."
            }
            Self::Network => "A network problem interrupted the request. Please try again shortly.",
            Self::Storage => {
                "The data service is temporarily unavailable. Please try again shortly."
            }
            Self::BusinessLogic => "The request could not be completed due to a business rule.",
            Self::Configuration => "The service is misconfigured. Please contact support.",
            Self::System => "An internal error occurred. Please try again later.",
            Self::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown error category: {s}"))
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Call-site context supplied by the caller alongside the raw failure.
/// Used only for classification and redaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub component: String,
    pub action: String,
    #[serde(default)]
    pub additional_data: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(component: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            action: action.into(),
            additional_data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }

    /// Copy with every secret-keyed value replaced by the redaction marker.
    pub(crate) fn sanitized(&self) -> Self {
        let additional_data = self
            .additional_data
            .iter()
            .map(|(k, v)| {
                if is_sensitive_key(k) {
                    (k.clone(), REDACTION_MARKER.to_string())
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect();

        Self {
            component: self.component.clone(),
            action: self.action.clone(),
            additional_data,
        }
    }
}

/// Stack/source metadata safe for operator logs. Never carries raw secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Sanitized display of the error's source chain, outermost first.
    #[serde(default)]
    pub source_chain: Vec<String>,
}

/// Immutable record produced once per failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub id: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub sanitized_message: String,
    /// Original failure, kept opaque for callers that need to downcast.
    #[serde(skip)]
    pub original_cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    pub context: ErrorContext,
    pub recoverable: bool,
    pub retryable: bool,
    pub user_facing_message: String,
    pub diagnostics: Diagnostics,
    pub classified_at: DateTime<Utc>,
}

impl ClassifiedError {
    /// Attach the original failure for callers that need to downcast it.
    pub fn with_cause(mut self, cause: Arc<dyn std::error::Error + Send + Sync>) -> Self {
        self.original_cause = Some(cause);
        self
    }

    /// Composite key used by the recovery attempt ledger.
    pub fn recovery_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.category.as_str(),
            self.context.component,
            self.context.action
        )
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {}",
            self.category, self.severity, self.sanitized_message
        )
    }
}

impl std::error::Error for ClassifiedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.original_cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}
