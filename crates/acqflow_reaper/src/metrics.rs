//! Reaper counters
//!
//! Lock-free atomics; read with [`ReaperMetrics::snapshot`] or log the
//! one-line [`ReaperMetrics::summary`] at shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global reaper metrics
pub static REAPER_METRICS: ReaperMetrics = ReaperMetrics::new();

pub struct ReaperMetrics {
    pub discovered: AtomicU64,
    pub captured: AtomicU64,
    /// Filtered out by the patient id filter
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
    /// Leftover captures published at start-up
    pub recovered: AtomicU64,
}

impl Default for ReaperMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaperMetrics {
    pub const fn new() -> Self {
        Self {
            discovered: AtomicU64::new(0),
            captured: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            recovered: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_discovered(&self) {
        self.discovered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_recovered(&self, n: u64) {
        self.recovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReaperMetricsSnapshot {
        ReaperMetricsSnapshot {
            discovered: self.discovered.load(Ordering::Relaxed),
            captured: self.captured.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
        }
    }

    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "discovered={} captured={} skipped={} failed={} recovered={}",
            s.discovered, s.captured, s.skipped, s.failed, s.recovered
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperMetricsSnapshot {
    pub discovered: u64,
    pub captured: u64,
    pub skipped: u64,
    pub failed: u64,
    pub recovered: u64,
}
