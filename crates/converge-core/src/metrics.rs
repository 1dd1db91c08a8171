//! Global atomic counters for reconciliation runs.
//!
//! Counters are incremented silently by the engine. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a CLI invocation).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::OutcomeStatus;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocation and no locking.
pub struct Metrics {
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    runs_timed_out: AtomicU64,
    poll_ticks: AtomicU64,
    events_emitted: AtomicU64,
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
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_timed_out: AtomicU64::new(0),
            poll_ticks: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    /// Count a finished run under the counter matching its status.
    pub fn record_outcome(&self, status: OutcomeStatus) {
        let (counter, name) = match status {
            OutcomeStatus::Success => (&self.runs_succeeded, "runs_succeeded"),
            OutcomeStatus::Failure => (&self.runs_failed, "runs_failed"),
            OutcomeStatus::Timeout => (&self.runs_timed_out, "runs_timed_out"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn inc_poll_ticks(&self) {
        self.poll_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_events_emitted(&self, count: u64) {
        self.events_emitted.fetch_add(count, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            runs_succeeded = self.runs_succeeded(),
            runs_failed = self.runs_failed(),
            runs_timed_out = self.runs_timed_out(),
            poll_ticks = self.poll_ticks(),
            events_emitted = self.events_emitted(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_succeeded(&self) -> u64 {
        self.runs_succeeded.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn runs_timed_out(&self) -> u64 {
        self.runs_timed_out.load(Ordering::Relaxed)
    }

    pub fn poll_ticks(&self) -> u64 {
        self.poll_ticks.load(Ordering::Relaxed)
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_started.store(0, Ordering::Relaxed);
        self.runs_succeeded.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.runs_timed_out.store(0, Ordering::Relaxed);
        self.poll_ticks.store(0, Ordering::Relaxed);
        self.events_emitted.store(0, Ordering::Relaxed);
    }
}
