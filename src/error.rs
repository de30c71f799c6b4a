use std::time::Duration;

use thiserror::Error;

use crate::classifier::ClassifiedError;

/// Raw failure produced by a caller-supplied unit of work.
pub type RawError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, PalisadeError>;

/// Raised when a circuit rejects a call without invoking the operation.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{name}' is open; next attempt allowed in {retry_in_ms}ms")]
pub struct CircuitOpenError {
    pub name: String,
    pub retry_in_ms: u64,
}

/// Raised inside the engine when a raced operation exceeds its deadline.
/// Timeout means "stop waiting", not "the remote work stopped".
#[derive(Debug, Clone, Error)]
#[error("operation timed out after {0:?}")]
pub struct OperationTimeout(pub Duration);

#[derive(Error, Debug)]
pub enum PalisadeError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("recovery budget exhausted for '{key}' after {attempts} attempts")]
    RecoveryBudgetExhausted { key: String, attempts: u32 },

    #[error("no fallback available for key '{0}'")]
    FallbackUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Final surfaced failure. Carries the full classified record so the
    /// caller can render the user-facing message without re-classifying.
    #[error("{}", .0.user_facing_message)]
    Classified(Box<ClassifiedError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

impl PalisadeError {
    pub fn classified(error: ClassifiedError) -> Self {
        Self::Classified(Box::new(error))
    }

    /// The classified record attached to this failure, if any.
    pub fn as_classified(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Classified(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }
}
