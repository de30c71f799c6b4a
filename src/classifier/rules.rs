//! Rule-based failure classification.
//!
//! Three independent passes run over the failure's message and the call
//! context: category, severity, and recoverability. Each pass is an
//! explicit ordered table evaluated first-match-wins, so precedence is
//! data rather than nested conditionals.

use tracing::info;
use uuid::Uuid;

use crate::error::RawError;

use super::types::{
    is_sensitive_key, ClassifiedError, Diagnostics, ErrorCategory, ErrorContext, Severity,
    REDACTION_MARKER,
};

struct CategoryRule {
    category: ErrorCategory,
    /// Substrings matched against the lowercased failure message.
    message: &'static [&'static str],
    /// Substrings matched against the lowercased component/action pair.
    context: &'static [&'static str],
}

/// Evaluated in order; the first matching row wins. Authorization sits
/// above Authentication so "permission"/"forbidden" failures are not
/// captured by the broader "auth" fragment.
const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        category: ErrorCategory::Authorization,
        message: &["permission", "forbidden", "access denied", "403"],
        context: &[],
    },
    CategoryRule {
        category: ErrorCategory::Authentication,
        message: &["auth", "login", "credential", "unauthorized", "401"],
        context: &["auth", "login"],
    },
    CategoryRule {
        category: ErrorCategory::Network,
        message: &[
            "network",
            "timeout",
            "timed out",
            "connection",
            "unreachable",
            "dns",
            "socket",
            "502",
            "503",
            "504",
        ],
        context: &[],
    },
    CategoryRule {
        category: ErrorCategory::Validation,
        message: &["validation", "invalid", "required field", "malformed", "422"],
        context: &["form", "validator"],
    },
    CategoryRule {
        category: ErrorCategory::Storage,
        message: &["database", "storage", "disk", "persist", "query", "sql"],
        context: &["store", "repository", "database"],
    },
    CategoryRule {
        category: ErrorCategory::Configuration,
        message: &["config", "configuration", "missing setting", "env var"],
        context: &["config"],
    },
    CategoryRule {
        category: ErrorCategory::System,
        message: &["internal error", "panic", "out of memory", "system failure"],
        context: &[],
    },
    CategoryRule {
        category: ErrorCategory::BusinessLogic,
        message: &["business rule", "domain rule"],
        context: &["service", "business"],
    },
];

struct SeverityRule {
    severity: Severity,
    message: &'static [&'static str],
    context: &'static [&'static str],
}

const SEVERITY_RULES: &[SeverityRule] = &[
    SeverityRule {
        severity: Severity::Critical,
        message: &["critical", "fatal", "corrupt", "panic", "data loss"],
        context: &[],
    },
    SeverityRule {
        severity: Severity::High,
        message: &[],
        context: &["auth", "payment", "security"],
    },
    SeverityRule {
        severity: Severity::Medium,
        message: &["validation", "not found", "timeout", "timed out"],
        context: &[],
    },
];

struct RecoveryRule {
    message: &'static [&'static str],
    recoverable: bool,
    retryable: bool,
}

/// Keyword rules override category defaults. Permission/credential
/// failures are never worth automating; transient transport failures
/// always are.
const RECOVERY_RULES: &[RecoveryRule] = &[
    RecoveryRule {
        message: &["permission", "forbidden", "credential", "access denied"],
        recoverable: false,
        retryable: false,
    },
    RecoveryRule {
        message: &[
            "network",
            "timeout",
            "timed out",
            "connection",
            "service unavailable",
            "rate limit",
            "503",
        ],
        recoverable: true,
        retryable: true,
    },
];

/// Per-category defaults applied when no keyword rule matches.
fn category_recovery_defaults(category: ErrorCategory) -> (bool, bool) {
    match category {
        // Token refresh may fix it, blind repetition will not
        ErrorCategory::Authentication => (true, false),
        ErrorCategory::Authorization => (false, false),
        // Input preservation makes validation recoverable; retrying the
        // same input is pointless
        ErrorCategory::Validation => (true, false),
        ErrorCategory::Network => (true, true),
        ErrorCategory::Storage => (true, true),
        ErrorCategory::BusinessLogic => (false, false),
        ErrorCategory::Configuration => (false, false),
        ErrorCategory::System => (true, false),
        ErrorCategory::Unknown => (true, false),
    }
}

/// Turns a raw failure plus call context into a typed, severity-ranked,
/// sanitized record. Stateless; safe to share and copy freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, error: &RawError, context: &ErrorContext) -> ClassifiedError {
        let mut source_chain = Vec::new();
        let mut source = error.source();
        while let Some(s) = source {
            source_chain.push(sanitize_message(&s.to_string(), context));
            source = s.source();
        }

        self.classify_parts(&error.to_string(), source_chain, context)
    }

    /// Classification from message text alone, for callers that only have
    /// a string (e.g. retry predicates).
    pub fn classify_message(&self, message: &str, context: &ErrorContext) -> ClassifiedError {
        self.classify_parts(message, Vec::new(), context)
    }

    fn classify_parts(
        &self,
        message: &str,
        source_chain: Vec<String>,
        context: &ErrorContext,
    ) -> ClassifiedError {
        let message_haystack = message.to_lowercase();
        let context_haystack =
            format!("{} {}", context.component, context.action).to_lowercase();

        let category = Self::categorize(&message_haystack, &context_haystack);
        let severity = Self::rank_severity(&message_haystack, &context_haystack);
        let (recoverable, retryable) = Self::derive_recovery(&message_haystack, category);

        let classified = ClassifiedError {
            id: Uuid::new_v4().to_string(),
            category,
            severity,
            sanitized_message: sanitize_message(message, context),
            original_cause: None,
            context: context.sanitized(),
            recoverable,
            retryable,
            user_facing_message: category.user_facing_message().to_string(),
            diagnostics: Diagnostics { source_chain },
            classified_at: chrono::Utc::now(),
        };

        info!(
            error_id = %classified.id,
            category = %classified.category,
            severity = %classified.severity,
            component = %classified.context.component,
            action = %classified.context.action,
            recoverable = classified.recoverable,
            retryable = classified.retryable,
            "Classified error"
        );

        classified
    }

    fn categorize(message: &str, context: &str) -> ErrorCategory {
        for rule in CATEGORY_RULES {
            let message_hit = rule.message.iter().any(|p| message.contains(p));
            let context_hit = rule.context.iter().any(|p| context.contains(p));
            if message_hit || context_hit {
                return rule.category;
            }
        }
        ErrorCategory::Unknown
    }

    fn rank_severity(message: &str, context: &str) -> Severity {
        for rule in SEVERITY_RULES {
            let message_hit = rule.message.iter().any(|p| message.contains(p));
            let context_hit = rule.context.iter().any(|p| context.contains(p));
            if message_hit || context_hit {
                return rule.severity;
            }
        }
        Severity::Low
    }

    fn derive_recovery(message: &str, category: ErrorCategory) -> (bool, bool) {
        for rule in RECOVERY_RULES {
            if rule.message.iter().any(|p| message.contains(p)) {
                return (rule.recoverable, rule.retryable);
            }
        }
        category_recovery_defaults(category)
    }
}

/// Redact secret-looking material from a failure message: any value bound
/// to a sensitive context key, plus inline `key=value` / `key: value`
/// pairs whose key looks sensitive.
pub(crate) fn sanitize_message(message: &str, context: &ErrorContext) -> String {
    let mut out = message.to_string();

    for (key, value) in &context.additional_data {
        if is_sensitive_key(key) && !value.is_empty() {
            out = out.replace(value.as_str(), REDACTION_MARKER);
        }
    }

    redact_inline_pairs(&out)
}

fn redact_inline_pairs(message: &str) -> String {
    let mut tokens: Vec<String> = message.split(' ').map(String::from).collect();
    let mut redact_next = false;

    for token in tokens.iter_mut() {
        if redact_next {
            *token = REDACTION_MARKER.to_string();
            redact_next = false;
            continue;
        }

        if let Some((key, _)) = token.split_once('=') {
            if is_sensitive_key(key) {
                *token = format!("{key}={REDACTION_MARKER}");
                continue;
            }
        }

        let bare = token.trim_end_matches(':');
        if bare.len() < token.len() && is_sensitive_key(bare) {
            redact_next = true;
        }
    }

    tokens.join(" ")
}
