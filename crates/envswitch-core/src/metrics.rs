//! Global atomic counters for envswitch observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a switch completes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    switches_completed: AtomicU64,
    snapshots_taken: AtomicU64,
    documents_restored: AtomicU64,
    index_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            switches_completed: AtomicU64::new(0),
            snapshots_taken: AtomicU64::new(0),
            documents_restored: AtomicU64::new(0),
            index_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_switches(&self) {
        self.switches_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "switches_completed", "counter incremented");
    }

    pub fn inc_snapshots(&self) {
        self.snapshots_taken.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "snapshots_taken", "counter incremented");
    }

    pub fn add_documents_restored(&self, count: u64) {
        self.documents_restored.fetch_add(count, Ordering::Relaxed);
        tracing::trace!(metric = "documents_restored", count, "counter incremented");
    }

    pub fn add_index_failures(&self, count: u64) {
        self.index_failures.fetch_add(count, Ordering::Relaxed);
        tracing::trace!(metric = "index_failures", count, "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            switches_completed = self.switches_completed(),
            snapshots_taken = self.snapshots_taken(),
            documents_restored = self.documents_restored(),
            index_failures = self.index_failures(),
        );
    }

    pub fn switches_completed(&self) -> u64 {
        self.switches_completed.load(Ordering::Relaxed)
    }

    pub fn snapshots_taken(&self) -> u64 {
        self.snapshots_taken.load(Ordering::Relaxed)
    }

    pub fn documents_restored(&self) -> u64 {
        self.documents_restored.load(Ordering::Relaxed)
    }

    pub fn index_failures(&self) -> u64 {
        self.index_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.switches_completed.store(0, Ordering::Relaxed);
        self.snapshots_taken.store(0, Ordering::Relaxed);
        self.documents_restored.store(0, Ordering::Relaxed);
        self.index_failures.store(0, Ordering::Relaxed);
    }
}
