//! Counters for the orchestration core
//!
//! Plain atomics; the runtime exports [`OrchestrationMetrics::snapshot`]
//! to Prometheus.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters shared by all components
#[derive(Debug, Default)]
pub struct OrchestrationMetrics {
    /// Requests handed to role logic
    pub requests_processed: AtomicU64,
    /// Requests buffered until their height is committed
    pub requests_buffered: AtomicU64,
    /// Deliveries dropped because another path held the request
    pub duplicate_deliveries: AtomicU64,
    /// Buffered requests processed by the block path
    pub buffered_replayed: AtomicU64,
    /// Block-path entries skipped because the request was locked
    pub replay_skipped_locked: AtomicU64,
    /// Block-path entries with no buffered request
    pub replay_missing: AtomicU64,
    /// Workflow steps suspended on a transaction
    pub continuations_saved: AtomicU64,
    /// Workflow steps resumed
    pub continuations_resumed: AtomicU64,
    /// Transaction results nobody waited on
    pub stale_results_ignored: AtomicU64,
    /// Callbacks acknowledged with 2xx
    pub callbacks_delivered: AtomicU64,
    /// Failed callback attempts scheduled for retry
    pub callbacks_retried: AtomicU64,
    /// Callbacks that ran out of attempts
    pub callbacks_exhausted: AtomicU64,
    /// Errors handed to the reporter
    pub errors_reported: AtomicU64,
}

impl OrchestrationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        Self::inc(&self.requests_processed);
    }

    pub fn record_buffered(&self) {
        Self::inc(&self.requests_buffered);
    }

    pub fn record_duplicate(&self) {
        Self::inc(&self.duplicate_deliveries);
    }

    /// Record the outcome of one block window
    pub fn record_replay(&self, replayed: usize, skipped_locked: usize, missing: usize) {
        self.buffered_replayed
            .fetch_add(replayed as u64, Ordering::Relaxed);
        self.replay_skipped_locked
            .fetch_add(skipped_locked as u64, Ordering::Relaxed);
        self.replay_missing
            .fetch_add(missing as u64, Ordering::Relaxed);
    }

    pub fn record_continuation_saved(&self) {
        Self::inc(&self.continuations_saved);
    }

    pub fn record_continuation_resumed(&self) {
        Self::inc(&self.continuations_resumed);
    }

    pub fn record_stale_result(&self) {
        Self::inc(&self.stale_results_ignored);
    }

    pub fn record_callback_delivered(&self) {
        Self::inc(&self.callbacks_delivered);
    }

    pub fn record_callback_retried(&self) {
        Self::inc(&self.callbacks_retried);
    }

    pub fn record_callback_exhausted(&self) {
        Self::inc(&self.callbacks_exhausted);
    }

    pub fn record_error_reported(&self) {
        Self::inc(&self.errors_reported);
    }

    /// Current values as `(name, value)` pairs
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        vec![
            ("requests_processed", load(&self.requests_processed)),
            ("requests_buffered", load(&self.requests_buffered)),
            ("duplicate_deliveries", load(&self.duplicate_deliveries)),
            ("buffered_replayed", load(&self.buffered_replayed)),
            ("replay_skipped_locked", load(&self.replay_skipped_locked)),
            ("replay_missing", load(&self.replay_missing)),
            ("continuations_saved", load(&self.continuations_saved)),
            ("continuations_resumed", load(&self.continuations_resumed)),
            ("stale_results_ignored", load(&self.stale_results_ignored)),
            ("callbacks_delivered", load(&self.callbacks_delivered)),
            ("callbacks_retried", load(&self.callbacks_retried)),
            ("callbacks_exhausted", load(&self.callbacks_exhausted)),
            ("errors_reported", load(&self.errors_reported)),
        ]
    }

    /// Value of one counter by its snapshot name
    pub fn get(&self, name: &str) -> Option<u64> {
        self.snapshot()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }
}
