//! Structured observability hooks for agentlog internals.
//!
//! This module provides:
//! - The `agentlog.benchmark_run` span that run futures are instrumented with
//! - Emission functions for pipeline and harness lifecycle events
//!
//! These are diagnostics about agentlog itself, routed through `tracing`;
//! they are never written to the event store.

use tracing::{info, warn};

/// Span to attach to a spawned benchmark future with `Instrument`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("agentlog.benchmark_run", run_id = %run_id)
}

/// Emit event: an event was staged for storage.
pub fn emit_event_recorded(event_id: &str, event_type: &str, level: &str) {
    tracing::debug!(
        event = "event.recorded",
        event_id = %event_id,
        event_type = %event_type,
        level = %level,
    );
}

/// Emit event: the staging buffer overflowed and evicted its oldest events.
pub fn emit_buffer_overflow(dropped_total: u64, capacity: usize) {
    warn!(
        event = "buffer.overflow",
        dropped_total = dropped_total,
        capacity = capacity,
    );
}

/// Emit event: a flush gave up after exhausting retries (warning level).
pub fn emit_flush_failed(attempts: u32, requeued: usize, error: &dyn std::fmt::Display) {
    warn!(
        event = "buffer.flush_failed",
        attempts = attempts,
        requeued = requeued,
        error = %error,
    );
}

/// Emit event: benchmark run started.
pub fn emit_benchmark_run_started(run_id: &str, work_items: usize, parallel: bool, max_concurrency: usize) {
    info!(
        event = "benchmark.run_started",
        run_id = %run_id,
        work_items = work_items,
        parallel = parallel,
        max_concurrency = max_concurrency,
    );
}

/// Emit event: benchmark run reached a terminal state.
pub fn emit_benchmark_run_finished(run_id: &str, status: &str, results: usize, duration_ms: u64) {
    info!(
        event = "benchmark.run_finished",
        run_id = %run_id,
        status = %status,
        results = results,
        duration_ms = duration_ms,
    );
}

/// Emit event: one (task, configuration) execution finished.
pub fn emit_execution_finished(task_id: &str, config_name: &str, success: bool, score: f64, duration_ms: f64) {
    info!(
        event = "benchmark.execution_finished",
        task_id = %task_id,
        config_name = %config_name,
        success = success,
        score = score,
        duration_ms = duration_ms,
    );
}

/// Emit event: regression detection produced alerts.
pub fn emit_regressions_detected(run_id: &str, baseline_run_id: &str, alerts: usize) {
    if alerts > 0 {
        warn!(
            event = "analysis.regressions_detected",
            run_id = %run_id,
            baseline_run_id = %baseline_run_id,
            alerts = alerts,
        );
    } else {
        info!(
            event = "analysis.regressions_detected",
            run_id = %run_id,
            baseline_run_id = %baseline_run_id,
            alerts = alerts,
        );
    }
}

/// Emit event: retention cleanup finished.
pub fn emit_cleanup_completed(retention_secs: u64, deleted: u64) {
    info!(
        event = "retention.cleanup_completed",
        retention_secs = retention_secs,
        deleted = deleted,
    );
}
