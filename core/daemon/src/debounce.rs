//! Duplicate-scan suppression.
//!
//! Camera scanners fire the same code several times per second while the
//! badge is in frame, and students sometimes re-present a badge right after
//! a successful toggle. Two windows cover both: a short debounce that starts
//! on any attempt, and a longer cooldown that starts only once a toggle
//! commits.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    Proceed,
    Debounced,
    CoolingDown,
}

#[derive(Debug, Clone, Copy)]
struct GuardEntry {
    last_attempt: Instant,
    last_success: Option<Instant>,
}

/// Per-code scan gate. Interior mutability keeps the call sites simple;
/// contention is negligible at scan rates.
pub struct ScanGuard {
    entries: Mutex<HashMap<String, GuardEntry>>,
    debounce: Duration,
    cooldown: Duration,
}

impl ScanGuard {
    pub fn new(debounce: Duration, cooldown: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            debounce,
            cooldown,
        }
    }

    /// Decides whether a scan of `code` at `now` should reach the tracker.
    /// A Proceed decision records the attempt, so repeat fire from the same
    /// badge presentation lands in the debounce window.
    pub fn check(&self, code: &str, now: Instant) -> ScanDecision {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(entry) = entries.get(code) {
            if let Some(success) = entry.last_success {
                if now.duration_since(success) < self.cooldown {
                    return ScanDecision::CoolingDown;
                }
            }
            if now.duration_since(entry.last_attempt) < self.debounce {
                return ScanDecision::Debounced;
            }
        }

        let prior_success = entries.get(code).and_then(|e| e.last_success);
        entries.insert(
            code.to_string(),
            GuardEntry {
                last_attempt: now,
                last_success: prior_success,
            },
        );
        ScanDecision::Proceed
    }

    /// Starts the cooldown window after a toggle commits.
    pub fn mark_success(&self, code: &str, now: Instant) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = entries.entry(code.to_string()).or_insert(GuardEntry {
            last_attempt: now,
            last_success: None,
        });
        entry.last_success = Some(now);
    }
}
