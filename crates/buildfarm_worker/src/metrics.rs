//! Process-local worker counters, reported alongside heartbeats and logged
//! on exit.
//!
//! Mirrors the coordinator's own metrics module: plain data, lock-free
//! atomics, single static instance.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: WorkerMetrics = WorkerMetrics::new();

pub struct WorkerMetrics {
    pub builds_dispatched: AtomicU64,
    pub builds_succeeded: AtomicU64,
    pub builds_failed: AtomicU64,
    pub builds_cancelled: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
}

impl WorkerMetrics {
    pub const fn new() -> Self {
        Self {
            builds_dispatched: AtomicU64::new(0),
            builds_succeeded: AtomicU64::new(0),
            builds_failed: AtomicU64::new(0),
            builds_cancelled: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_builds_dispatched(&self) {
        self.builds_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_builds_succeeded(&self) {
        self.builds_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_builds_failed(&self) {
        self.builds_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_builds_cancelled(&self) {
        self.builds_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            builds_dispatched: self.builds_dispatched.load(Ordering::Relaxed),
            builds_succeeded: self.builds_succeeded.load(Ordering::Relaxed),
            builds_failed: self.builds_failed.load(Ordering::Relaxed),
            builds_cancelled: self.builds_cancelled.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerMetricsSnapshot {
    pub builds_dispatched: u64,
    pub builds_succeeded: u64,
    pub builds_failed: u64,
    pub builds_cancelled: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_increment() {
        let metrics = WorkerMetrics::new();
        metrics.inc_builds_dispatched();
        metrics.inc_builds_dispatched();
        metrics.inc_builds_succeeded();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.builds_dispatched, 2);
        assert_eq!(snapshot.builds_succeeded, 1);
    }
}
