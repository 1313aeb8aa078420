//! Requeue policy for failed reconciles
//!
//! Errors are classified so the error policy can pick between exponential
//! backoff, a quick retry after a write conflict, or waiting for a change.
//! Transient failures are never abandoned: once the backoff reaches its cap
//! the object keeps being retried at that interval.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use kube::runtime::controller::Action;
use tracing::{debug, warn};

/// Attempts after which a still-failing object is logged at warn level
const WARN_AFTER_ATTEMPTS: u32 = 10;

const BASE_DELAY_SECS: u64 = 5;

/// Upper bound for a single backoff (1 hour)
const MAX_DELAY_SECS: u64 = 3600;

/// Delay before re-reading an object that changed under us
const CONFLICT_DELAY_SECS: u64 = 1;

/// Consecutive failure count per object UID
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the new count
    pub fn increment(&self, uid: &str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let count = attempts.entry(uid.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Forget failures after a successful reconcile or once the object is gone
    pub fn reset(&self, uid: &str) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.remove(uid);
    }

    pub fn get(&self, uid: &str) -> u32 {
        let attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.get(uid).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Aggregation service or API server trouble
    Transient,
    /// Optimistic-concurrency rejection; re-read and try again soon
    Conflict,
    /// Will not recover until the object is edited
    Permanent,
}

/// Requeue action for the `attempt`-th consecutive failure
pub fn compute_backoff(attempt: u32, kind: ErrorKind) -> Action {
    match kind {
        ErrorKind::Conflict => Action::requeue(Duration::from_secs(CONFLICT_DELAY_SECS)),
        ErrorKind::Transient => {
            // 5s, 10s, 20s, ... capped at one hour
            let exponent = attempt.saturating_sub(1).min(20);
            let delay_secs = (BASE_DELAY_SECS << exponent).min(MAX_DELAY_SECS);
            if attempt >= WARN_AFTER_ATTEMPTS {
                warn!(attempt, delay_secs, "Still failing, retrying with capped backoff");
            } else {
                debug!(attempt, delay_secs, "Scheduling retry with backoff");
            }
            Action::requeue(Duration::from_secs(delay_secs))
        }
        ErrorKind::Permanent => {
            warn!("Permanent error, waiting for resource change");
            Action::await_change()
        }
    }
}
