//! Keyed attempt and failure bookkeeping.
//!
//! Independent of the retry executor: callers that want per-operation history (for example a job
//! id retried across requests) record attempts and failures explicitly.
//!
//! ```rust
//! use backstop::AttemptTracker;
//!
//! let tracker: AttemptTracker<String> = AttemptTracker::new();
//! assert_eq!(tracker.record_attempt("job-7"), 1);
//! tracker.record_failure("job-7", "upstream 503".to_string());
//! assert_eq!(tracker.attempts("job-7"), 1);
//! assert_eq!(tracker.failures("job-7"), vec!["upstream 503".to_string()]);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct Entry<E> {
    attempts: usize,
    failures: VecDeque<E>,
}

impl<E> Default for Entry<E> {
    fn default() -> Self {
        Self { attempts: 0, failures: VecDeque::new() }
    }
}

/// Thread-safe attempt counters and failure history keyed by operation name. Clones share state.
#[derive(Debug)]
pub struct AttemptTracker<E> {
    entries: Arc<RwLock<HashMap<String, Entry<E>>>>,
    failure_capacity: Option<usize>,
}

impl<E> Clone for AttemptTracker<E> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone(), failure_capacity: self.failure_capacity }
    }
}

impl<E> Default for AttemptTracker<E> {
    fn default() -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())), failure_capacity: None }
    }
}

impl<E> AttemptTracker<E> {
    /// Tracker keeping every recorded failure.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker keeping at most `capacity` most recent failures per key.
    pub fn with_failure_capacity(capacity: usize) -> Self {
        Self { failure_capacity: Some(capacity), ..Self::default() }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry<E>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry<E>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment the attempt count for `key` and return the new value.
    pub fn record_attempt(&self, key: &str) -> usize {
        let mut entries = self.write();
        let entry = entries.entry(key.to_string()).or_default();
        entry.attempts = entry.attempts.saturating_add(1);
        entry.attempts
    }

    /// Append a failure to the history of `key`. Does not touch the attempt count.
    pub fn record_failure(&self, key: &str, failure: E) {
        let mut entries = self.write();
        let entry = entries.entry(key.to_string()).or_default();
        if self.failure_capacity == Some(0) {
            return;
        }
        entry.failures.push_back(failure);
        if let Some(capacity) = self.failure_capacity {
            while entry.failures.len() > capacity {
                entry.failures.pop_front();
            }
        }
    }

    /// Attempts recorded for `key`; 0 when unknown.
    pub fn attempts(&self, key: &str) -> usize {
        self.read().get(key).map_or(0, |entry| entry.attempts)
    }

    /// Failure history for `key`, oldest first; empty when unknown.
    pub fn failures(&self, key: &str) -> Vec<E>
    where
        E: Clone,
    {
        self.read()
            .get(key)
            .map(|entry| entry.failures.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget everything recorded for `key`.
    pub fn reset(&self, key: &str) {
        self.write().remove(key);
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Tracked keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fault;

    #[test]
    fn unknown_keys_are_empty() {
        let tracker: AttemptTracker<Fault> = AttemptTracker::new();
        assert_eq!(tracker.attempts("nope"), 0);
        assert!(tracker.failures("nope").is_empty());
        assert!(tracker.keys().is_empty());
    }

    #[test]
    fn attempts_and_failures_are_tracked_separately() {
        let tracker = AttemptTracker::new();
        assert_eq!(tracker.record_attempt("upload"), 1);
        assert_eq!(tracker.record_attempt("upload"), 2);
        tracker.record_failure("upload", Fault::http(503, "first"));
        tracker.record_failure("parse", Fault::http(500, "other key"));

        assert_eq!(tracker.attempts("upload"), 2);
        assert_eq!(tracker.attempts("parse"), 0);
        let failures = tracker.failures("upload");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message(), "first");
        assert_eq!(tracker.keys(), vec!["parse", "upload"]);
    }

    #[test]
    fn failures_keep_insertion_order() {
        let tracker = AttemptTracker::new();
        for n in 0..3 {
            tracker.record_failure("k", n);
        }
        assert_eq!(tracker.failures("k"), vec![0, 1, 2]);
    }

    #[test]
    fn capacity_keeps_most_recent_failures() {
        let tracker = AttemptTracker::with_failure_capacity(2);
        for n in 0..5 {
            tracker.record_failure("k", n);
        }
        assert_eq!(tracker.failures("k"), vec![3, 4]);

        let none: AttemptTracker<u8> = AttemptTracker::with_failure_capacity(0);
        none.record_failure("k", 1);
        assert!(none.failures("k").is_empty());
        assert_eq!(none.keys(), vec!["k"]);
    }

    #[test]
    fn reset_and_clear() {
        let tracker: AttemptTracker<&'static str> = AttemptTracker::new();
        tracker.record_attempt("a");
        tracker.record_failure("a", "boom");
        tracker.record_attempt("b");

        tracker.reset("a");
        assert_eq!(tracker.attempts("a"), 0);
        assert!(tracker.failures("a").is_empty());
        assert_eq!(tracker.attempts("b"), 1);

        tracker.clear();
        assert!(tracker.keys().is_empty());
    }

    #[test]
    fn concurrent_recording_is_exact() {
        let tracker: AttemptTracker<usize> = AttemptTracker::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for n in 0..100 {
                        tracker.record_attempt("shared");
                        tracker.record_failure("shared", t * 100 + n);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.attempts("shared"), 800);
        assert_eq!(tracker.failures("shared").len(), 800);
    }
}
