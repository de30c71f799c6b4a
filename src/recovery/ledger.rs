use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::clock::SharedClock;

/// Per-key recovery attempt counters enforcing a global ceiling independent
/// of any single retry policy. Keys are `category:component:action`.
pub struct RecoveryAttemptLedger {
    attempts: DashMap<String, LedgerEntry>,
    max_attempts: u32,
    entry_max_age: Duration,
    clock: SharedClock,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    count: u32,
    last_attempt_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub open_keys: usize,
    pub total_attempts: u32,
}

impl RecoveryAttemptLedger {
    pub fn new(max_attempts: u32, entry_max_age: Duration, clock: SharedClock) -> Self {
        Self {
            attempts: DashMap::new(),
            max_attempts,
            entry_max_age,
            clock,
        }
    }

    /// Whether the ceiling for `key` has been reached. Stale entries are
    /// pruned lazily here rather than by a sweeper task.
    pub fn is_exhausted(&self, key: &str) -> bool {
        self.prune_if_stale(key);
        self.attempts
            .get(key)
            .map(|entry| entry.count >= self.max_attempts)
            .unwrap_or(false)
    }

    pub fn attempts_for(&self, key: &str) -> u32 {
        self.attempts.get(key).map(|entry| entry.count).unwrap_or(0)
    }

    /// Charge one attempt against `key` and return the new count.
    pub fn record_attempt(&self, key: &str) -> u32 {
        let now = self.clock.now();
        let mut entry = self.attempts.entry(key.to_string()).or_insert(LedgerEntry {
            count: 0,
            last_attempt_at: now,
        });
        entry.count += 1;
        entry.last_attempt_at = now;
        entry.count
    }

    /// Successful recovery clears the key entirely.
    pub fn clear(&self, key: &str) {
        self.attempts.remove(key);
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn prune_if_stale(&self, key: &str) {
        let now = self.clock.now();
        let stale = self
            .attempts
            .get(key)
            .map(|entry| now.duration_since(entry.last_attempt_at) > self.entry_max_age)
            .unwrap_or(false);
        if stale {
            self.attempts.remove(key);
        }
    }

    /// Drop every entry older than the configured age.
    pub fn prune(&self) {
        let now = self.clock.now();
        let max_age = self.entry_max_age;
        self.attempts
            .retain(|_, entry| now.duration_since(entry.last_attempt_at) <= max_age);
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            open_keys: self.attempts.len(),
            total_attempts: self.attempts.iter().map(|e| e.count).sum(),
        }
    }
}

impl std::fmt::Debug for RecoveryAttemptLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryAttemptLedger")
            .field("open_keys", &self.attempts.len())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
