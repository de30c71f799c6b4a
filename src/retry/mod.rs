//! Retry policies and the retry execution engine.
//!
//! Policies describe how many times and how fast to retry; the engine runs
//! an operation under a policy and records the full attempt history. Delay
//! growth is clamped to the policy maximum and jittered by +/-10% so
//! synchronized clients do not hammer a recovering dependency in lockstep.

mod engine;
mod policy;

pub use engine::{AttemptRecord, RetryOutcome, RetryPolicyEngine};
pub use policy::{Backoff, RetryPolicy, RetryPredicate};
