//! Atomic counters for the ingestion pipeline and benchmark executions.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at logger shutdown).

use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight atomic counters, no allocations and no locking.
///
/// Each [`crate::logger::EventLogger`] owns one instance, so tests never
/// observe each other's counts.
#[derive(Debug)]
pub struct Metrics {
    recorded: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
    flush_failures: AtomicU64,
    executions: AtomicU64,
    execution_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            recorded: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            execution_failures: AtomicU64::new(0),
        }
    }

    /// An event was accepted into the buffer.
    pub fn inc_recorded(&self) {
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// An event failed validation.
    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rejected", "counter incremented");
    }

    /// Buffer overflow evicted `n` events. Returns the new total.
    pub fn add_dropped(&self, n: u64) -> u64 {
        self.dropped.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn add_flushed(&self, n: u64) {
        self.flushed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_flush_failures(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "flush_failures", "counter incremented");
    }

    /// A benchmark execution finished.
    pub fn inc_execution(&self, success: bool) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.execution_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            recorded = self.recorded(),
            rejected = self.rejected(),
            dropped = self.dropped(),
            flushed = self.flushed(),
            flush_failures = self.flush_failures(),
            executions = self.executions(),
            execution_failures = self.execution_failures(),
        );
    }

    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn flushed(&self) -> u64 {
        self.flushed.load(Ordering::Relaxed)
    }

    pub fn flush_failures(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn execution_failures(&self) -> u64 {
        self.execution_failures.load(Ordering::Relaxed)
    }
}
