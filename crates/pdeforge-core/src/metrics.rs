//! Global atomic counters for pdeforge.
//!
//! Counters are bumped at the call site without logging above `trace`.
//! They are process-wide and cumulative: sessions running side by side
//! add to the same counters, and a flush never resets them. Per-session
//! figures live in the session outcome (`iterations`, the attempt history).
//! [`Metrics::flush`] emits the current totals as one `tracing::info!`
//! event tagged with the session that triggered it.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Atomic counters; no allocation, no locking.
pub struct Metrics {
    oracle_calls: AtomicU64,
    oracle_retries: AtomicU64,
    candidates_evaluated: AtomicU64,
    evaluation_timeouts: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            oracle_calls: AtomicU64::new(0),
            oracle_retries: AtomicU64::new(0),
            candidates_evaluated: AtomicU64::new(0),
            evaluation_timeouts: AtomicU64::new(0),
        }
    }

    /// One request sent to the oracle, retries included.
    pub fn inc_oracle_calls(&self) {
        self.oracle_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "oracle_calls", "counter incremented");
    }

    pub fn inc_oracle_retries(&self) {
        self.oracle_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "oracle_retries", "counter incremented");
    }

    pub fn inc_candidates_evaluated(&self) {
        self.candidates_evaluated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "candidates_evaluated", "counter incremented");
    }

    pub fn inc_evaluation_timeouts(&self) {
        self.evaluation_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluation_timeouts", "counter incremented");
    }

    /// Emit the process-wide totals as one `info!` event.
    pub fn flush(&self, session_id: &Uuid) {
        tracing::info!(
            metric = "flush",
            scope = "process",
            session_id = %session_id,
            oracle_calls = self.oracle_calls(),
            oracle_retries = self.oracle_retries(),
            candidates_evaluated = self.candidates_evaluated(),
            evaluation_timeouts = self.evaluation_timeouts(),
        );
    }

    pub fn oracle_calls(&self) -> u64 {
        self.oracle_calls.load(Ordering::Relaxed)
    }

    pub fn oracle_retries(&self) -> u64 {
        self.oracle_retries.load(Ordering::Relaxed)
    }

    pub fn candidates_evaluated(&self) -> u64 {
        self.candidates_evaluated.load(Ordering::Relaxed)
    }

    pub fn evaluation_timeouts(&self) -> u64 {
        self.evaluation_timeouts.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_oracle_calls();
        m.inc_oracle_calls();
        m.inc_oracle_retries();
        m.inc_candidates_evaluated();
        m.inc_evaluation_timeouts();
        assert_eq!(m.oracle_calls(), 2);
        assert_eq!(m.oracle_retries(), 1);
        assert_eq!(m.candidates_evaluated(), 1);
        assert_eq!(m.evaluation_timeouts(), 1);
    }

    #[test]
    fn flush_keeps_cumulative_totals() {
        let m = Metrics::new();
        m.inc_oracle_calls();
        m.flush(&Uuid::new_v4());
        m.inc_oracle_calls();
        m.flush(&Uuid::new_v4());
        assert_eq!(m.oracle_calls(), 2);
    }
}
