//! Global atomic counters for court sync.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (the sync run does this when it finishes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters; no allocations, no locking.
pub struct Metrics {
    runs_started: AtomicU64,
    cases_updated: AtomicU64,
    cases_failed: AtomicU64,
    triggers_rejected: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            cases_updated: AtomicU64::new(0),
            cases_failed: AtomicU64::new(0),
            triggers_rejected: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    pub fn inc_cases_updated(&self) {
        self.cases_updated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cases_updated", "counter incremented");
    }

    pub fn inc_cases_failed(&self) {
        self.cases_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cases_failed", "counter incremented");
    }

    /// Count a scheduled or manual trigger dropped because a run was active.
    pub fn inc_triggers_rejected(&self) {
        self.triggers_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "triggers_rejected", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            cases_updated = self.cases_updated(),
            cases_failed = self.cases_failed(),
            triggers_rejected = self.triggers_rejected(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn cases_updated(&self) -> u64 {
        self.cases_updated.load(Ordering::Relaxed)
    }

    pub fn cases_failed(&self) -> u64 {
        self.cases_failed.load(Ordering::Relaxed)
    }

    pub fn triggers_rejected(&self) -> u64 {
        self.triggers_rejected.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_started.store(0, Ordering::Relaxed);
        self.cases_updated.store(0, Ordering::Relaxed);
        self.cases_failed.store(0, Ordering::Relaxed);
        self.triggers_rejected.store(0, Ordering::Relaxed);
    }
}
