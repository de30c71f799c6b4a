//! Failure classification.
//!
//! Turns a raw failure plus call context into a typed, severity-ranked,
//! sanitized `ClassifiedError`. Category, severity, and recoverability are
//! derived by three independent ordered rule tables so each concern stays
//! separately testable.

mod rules;
mod types;

pub use rules::ErrorClassifier;
pub use types::{
    ClassifiedError, Diagnostics, ErrorCategory, ErrorContext, Severity, REDACTION_MARKER,
};
