//! In-flight request accounting per (provider, model) pair

use crate::models::catalog::CandidateKey;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrent in-flight request counts
///
/// Counters are created on first use and never removed, so a guard can
/// always find the counter it incremented.
#[derive(Debug, Default)]
pub struct LoadTracker {
    inflight: DashMap<CandidateKey, Arc<AtomicU64>>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one request in flight; the count drops when the guard does
    pub fn begin(&self, key: &CandidateKey) -> InflightGuard {
        let counter = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();
        counter.fetch_add(1, Ordering::Relaxed);
        InflightGuard { counter }
    }

    /// Current in-flight count for a pair
    pub fn inflight(&self, key: &CandidateKey) -> u64 {
        self.inflight
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Decrements the in-flight count on drop
#[derive(Debug)]
pub struct InflightGuard {
    counter: Arc<AtomicU64>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_tracks_inflight_requests() {
        let tracker = LoadTracker::new();
        let key = CandidateKey::new("p", "m");
        assert_eq!(tracker.inflight(&key), 0);

        let first = tracker.begin(&key);
        let second = tracker.begin(&key);
        assert_eq!(tracker.inflight(&key), 2);

        drop(first);
        assert_eq!(tracker.inflight(&key), 1);
        drop(second);
        assert_eq!(tracker.inflight(&key), 0);
    }
}
