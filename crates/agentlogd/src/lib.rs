//! agentlogd: HTTP surface over the agentlog query facade and benchmark
//! harness.

pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use agentlog_core::{
    obs, BenchmarkConfiguration, BenchmarkHarness, BenchmarkTaskCase, EventLogger, ExecutionOutput,
    Executor, ExecutorError, QueryService,
};
use agentlog_store::EventStore;

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub logger: EventLogger,
    pub harness: Arc<BenchmarkHarness>,
    pub started: Instant,
}

impl AppState {
    pub fn new(query: QueryService, logger: EventLogger, harness: Arc<BenchmarkHarness>) -> Self {
        Self {
            query,
            logger,
            harness,
            started: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/logs", get(routes::list_logs))
        .route("/logs/statistics", get(routes::log_statistics))
        .route("/logs/timeline", get(routes::log_timeline))
        .route("/logs/test", post(routes::insert_test_event))
        .route("/performance", get(routes::performance))
        .route("/performance/export", get(routes::performance_export))
        .route("/benchmarks/run", post(routes::start_benchmark_run))
        .route("/benchmarks/runs", get(routes::list_benchmark_runs))
        .route("/benchmarks/tasks", get(routes::list_tasks))
        .route("/benchmarks/configurations", get(routes::list_configurations))
        .route("/benchmarks/{run_id}/results", get(routes::benchmark_results))
        .route("/benchmarks/{run_id}/report", get(routes::benchmark_report))
        .route("/benchmarks/{run_id}/cancel", post(routes::cancel_benchmark_run))
        .with_state(state)
}

/// Periodically delete events older than `max_age` until `stop` flips.
pub fn spawn_retention_sweep(
    store: Arc<dyn EventStore>,
    max_age: Duration,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
            }
            match store.cleanup(max_age).await {
                Ok(deleted) => obs::emit_cleanup_completed(max_age.as_secs(), deleted),
                Err(e) => warn!(error = %e, "retention sweep failed"),
            }
        }
    })
}

/// Executor used when no endpoint is configured: every execution fails with
/// a clear reason instead of the daemon refusing to start.
#[derive(Debug, Default)]
pub struct NoExecutor;

#[async_trait]
impl Executor for NoExecutor {
    async fn execute(
        &self,
        _task: &BenchmarkTaskCase,
        _config: &BenchmarkConfiguration,
    ) -> Result<ExecutionOutput, ExecutorError> {
        Err(ExecutorError::Failed(
            "no executor endpoint configured (set executor.url or AGENTLOG_EXECUTOR_URL)".into(),
        ))
    }
}
