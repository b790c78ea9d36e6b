//! Structured tracing emitted by the logger, harness and retention paths.

use std::sync::Arc;

use agentlog_core::obs::{
    emit_benchmark_run_finished, emit_benchmark_run_started, emit_buffer_overflow,
    emit_cleanup_completed, emit_execution_finished, emit_flush_failed, emit_regressions_detected,
    run_span,
};
use agentlog_core::{EventLogger, EventType, LogLevel, LoggerConfig};
use agentlog_store::{Event, EventFilter, EventReader, MemoryEventStore};
use tracing::Instrument;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_benchmark_lifecycle_events() {
    let _span = run_span("run-obs-1").entered();
    emit_benchmark_run_started("run-obs-1", 4, true, 2);
    emit_execution_finished("summarize_doc", "fast", true, 0.74, 120.5);
    emit_execution_finished("summarize_doc", "accurate", false, 0.0, 30_000.0);
    emit_benchmark_run_finished("run-obs-1", "completed", 4, 31_000);
}

#[traced_test]
#[test]
fn test_warning_events() {
    emit_buffer_overflow(12, 10_000);
    emit_flush_failed(3, 250, &"storage unavailable: connection reset");
    emit_regressions_detected("run-new", "run-old", 2);
    emit_regressions_detected("run-new", "run-old", 0);
    emit_cleanup_completed(7 * 24 * 3600, 42);
}

#[traced_test]
#[tokio::test]
async fn test_logger_records_inside_run_span() {
    let store = Arc::new(MemoryEventStore::new());
    let logger = EventLogger::start(LoggerConfig::default(), store.clone());

    async {
        logger.ingest(Event::new(EventType::BenchmarkStart, LogLevel::Info, "start"));
        logger.ingest(Event::new(EventType::BenchmarkStop, LogLevel::Info, "stop"));
        logger.flush().await.unwrap();
    }
    .instrument(run_span("run-obs-2"))
    .await;

    logger.shutdown().await.unwrap();
    assert_eq!(store.count(&EventFilter::new()).await.unwrap(), 2);
}
