// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-key failure counting and exponential backoff for the work queues.

use crate::constants::retry::{BASE_DELAY_MILLIS, MAX_DELAY_SECS, MAX_RETRIES};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Backoff before retry number `attempt` (1-based): 5ms, 10ms, 20ms, ... capped.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let millis = BASE_DELAY_MILLIS.saturating_mul(1u64 << exponent);
    Duration::from_millis(millis).min(Duration::from_secs(MAX_DELAY_SECS))
}

/// Counts consecutive failures per key; a success forgets the key.
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the attempt count including this one.
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = attempts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn forget(&self, key: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn is_exhausted(attempts: u32) -> bool {
        attempts >= MAX_RETRIES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_base() {
        assert_eq!(backoff_delay(1), Duration::from_millis(5));
        assert_eq!(backoff_delay(2), Duration::from_millis(10));
        assert_eq!(backoff_delay(5), Duration::from_millis(80));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(40), Duration::from_secs(MAX_DELAY_SECS));
    }

    #[test]
    fn test_tracker_counts_and_forgets() {
        let tracker = RetryTracker::new();
        assert_eq!(tracker.record_failure("ns/a"), 1);
        assert_eq!(tracker.record_failure("ns/a"), 2);
        assert_eq!(tracker.attempts("ns/b"), 0);

        tracker.forget("ns/a");
        assert_eq!(tracker.attempts("ns/a"), 0);
    }

    #[test]
    fn test_exhaustion_after_max_retries() {
        assert!(!RetryTracker::is_exhausted(MAX_RETRIES - 1));
        assert!(RetryTracker::is_exhausted(MAX_RETRIES));
    }
}
