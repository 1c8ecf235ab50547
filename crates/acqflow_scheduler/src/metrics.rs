//! Scheduler counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Global scheduler metrics
pub static SCHEDULER_METRICS: SchedulerMetrics = SchedulerMetrics::new();

/// Lock-free job counters
pub struct SchedulerMetrics {
    pub dispatched: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    /// Jobs moved back to `new` by start-up recovery
    pub reset: AtomicU64,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    pub const fn new() -> Self {
        Self {
            dispatched: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            reset: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_reset(&self, n: u64) {
        self.reset.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reset: self.reset.load(Ordering::Relaxed),
        }
    }

    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "dispatched={} completed={} failed={} reset={}",
            s.dispatched, s.completed, s.failed, s.reset
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerMetricsSnapshot {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub reset: u64,
}

impl SchedulerMetricsSnapshot {
    /// Jobs dispatched but not yet finished.
    pub fn in_flight(&self) -> u64 {
        self.dispatched
            .saturating_sub(self.completed + self.failed)
    }
}
