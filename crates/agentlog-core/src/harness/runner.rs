//! Benchmark run execution.
//!
//! A run moves `Registered -> Scheduled -> Running -> {Completed, Failed,
//! Cancelled}`. Parallel runs spawn one task per work item and bound them
//! with a semaphore; sequential runs walk the work set in registration order.
//! Cancellation is cooperative: items already executing finish, nothing new
//! is dispatched, and partial results are kept. A panicking executor yields
//! a failed result for its work item and never takes the run down with it.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn, Instrument};

use agentlog_store::{
    BenchmarkResult, BenchmarkRunRecord, BenchmarkRunStatus, BenchmarkStore, EventType, Payload,
    RunId, StorageError,
};

use super::error::{ExecutorError, HarnessError};
use super::executor::{ExecutionOutput, Executor};
use super::registry::{BenchmarkCatalog, BenchmarkRegistry};
use super::scoring::{Scorer, WeightedCriteriaScorer};
use crate::domain::{BenchmarkConfiguration, BenchmarkTaskCase};
use crate::hooks::{instrument_async_with_timeout, HookError, HookSpec};
use crate::logger::EventLogger;
use crate::obs;

/// Harness settings (the `[harness]` config section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Used when a parallel request does not name `max_concurrency`.
    pub default_max_concurrency: usize,
    /// Per-execution deadline.
    pub execution_timeout_ms: u64,
    /// Catalog of tasks and configurations registered at startup.
    pub catalog: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            default_max_concurrency: 4,
            execution_timeout_ms: 300_000,
            catalog: None,
        }
    }
}

/// Parameters of one benchmark run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub task_ids: Vec<String>,
    pub config_names: Vec<String>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Overrides the harness execution timeout for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RunRequest {
    pub fn new<T, C>(task_ids: T, config_names: C) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            task_ids: task_ids.into_iter().map(Into::into).collect(),
            config_names: config_names.into_iter().map(Into::into).collect(),
            parallel: false,
            max_concurrency: None,
            timeout_ms: None,
        }
    }

    pub fn parallel(mut self, max_concurrency: usize) -> Self {
        self.parallel = true;
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Final state of a run and every result it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: BenchmarkRunStatus,
    pub results: Vec<BenchmarkResult>,
    /// Results that could not be stored after every retry.
    #[serde(default)]
    pub unpersisted: usize,
}

/// Handle to a run executing in the background.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    cancel: Arc<watch::Sender<bool>>,
    join: JoinHandle<Result<RunSummary, HarnessError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Stop dispatching new work items.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<RunSummary, HarnessError> {
        self.join
            .await
            .map_err(|e| HarnessError::Join(e.to_string()))?
    }
}

/// Score plus output, recorded as the output of the execution's exit event.
#[derive(Debug, Serialize)]
struct ScoredOutput {
    score: f64,
    #[serde(flatten)]
    output: ExecutionOutput,
}

/// Task/configuration registry plus the run executor.
pub struct BenchmarkHarness {
    registry: RwLock<BenchmarkRegistry>,
    executor: Arc<dyn Executor>,
    scorer: Arc<dyn Scorer>,
    logger: EventLogger,
    store: Arc<dyn BenchmarkStore>,
    config: HarnessConfig,
    active: Mutex<HashMap<RunId, Arc<watch::Sender<bool>>>>,
}

impl BenchmarkHarness {
    pub fn new(
        executor: Arc<dyn Executor>,
        logger: EventLogger,
        store: Arc<dyn BenchmarkStore>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            registry: RwLock::new(BenchmarkRegistry::new()),
            executor,
            scorer: Arc::new(WeightedCriteriaScorer),
            logger,
            store,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn BenchmarkStore> {
        Arc::clone(&self.store)
    }

    fn registry_read(&self) -> std::sync::RwLockReadGuard<'_, BenchmarkRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn registry_write(&self) -> std::sync::RwLockWriteGuard<'_, BenchmarkRegistry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register_task(&self, case: BenchmarkTaskCase, overwrite: bool) -> Result<(), HarnessError> {
        self.registry_write().register_task(case, overwrite)
    }

    pub fn register_configuration(
        &self,
        config: BenchmarkConfiguration,
        overwrite: bool,
    ) -> Result<(), HarnessError> {
        self.registry_write().register_configuration(config, overwrite)
    }

    pub fn load_catalog(&self, catalog: BenchmarkCatalog, overwrite: bool) -> Result<(), HarnessError> {
        self.registry_write().load_catalog(catalog, overwrite)
    }

    pub fn tasks(&self) -> Vec<BenchmarkTaskCase> {
        self.registry_read().tasks().to_vec()
    }

    pub fn configurations(&self) -> Vec<BenchmarkConfiguration> {
        self.registry_read().configurations().to_vec()
    }

    /// Ids of runs that have not reached a terminal state.
    pub fn active_runs(&self) -> Vec<RunId> {
        self.active
            .lock()
            .map(|a| a.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Signal cancellation to an active run. Returns `false` if the run is
    /// unknown or already finished.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        let sender = self
            .active
            .lock()
            .ok()
            .and_then(|a| a.get(run_id).cloned());
        match sender {
            Some(tx) => {
                let _ = tx.send(true);
                true
            }
            None => false,
        }
    }

    /// Run to completion.
    pub async fn run(self: &Arc<Self>, request: RunRequest) -> Result<RunSummary, HarnessError> {
        self.spawn_run(request).await?.wait().await
    }

    /// Register and schedule a run, then execute it in the background.
    ///
    /// Fails before anything is persisted if a requested task or
    /// configuration is unknown.
    #[instrument(skip(self, request), fields(tasks = request.task_ids.len(), configs = request.config_names.len()))]
    pub async fn spawn_run(self: &Arc<Self>, request: RunRequest) -> Result<RunHandle, HarnessError> {
        let work = self
            .registry_read()
            .work_set(&request.task_ids, &request.config_names)?;
        let max_concurrency = request
            .max_concurrency
            .unwrap_or(self.config.default_max_concurrency)
            .max(1);
        let limit = Duration::from_millis(
            request
                .timeout_ms
                .unwrap_or(self.config.execution_timeout_ms)
                .max(1),
        );

        let run_id = RunId::new();
        let record = BenchmarkRunRecord::new(
            run_id.clone(),
            request.task_ids.clone(),
            request.config_names.clone(),
            request.parallel,
            max_concurrency,
        );
        self.store.create_run(record).await?;
        // Benchmark events stay exempt from retention until the run finalises.
        self.logger.store().pin_run(&run_id).await?;
        if let Err(e) = self
            .store
            .update_run_status(&run_id, BenchmarkRunStatus::Scheduled)
            .await
        {
            self.release_pin(&run_id).await;
            return Err(e.into());
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        if let Ok(mut active) = self.active.lock() {
            active.insert(run_id.clone(), Arc::clone(&cancel_tx));
        }

        let harness = Arc::clone(self);
        let span = obs::run_span(run_id.as_str());
        let id = run_id.clone();
        let join = tokio::spawn(
            async move {
                harness
                    .execute_run(id, work, request.parallel, max_concurrency, limit, cancel_rx)
                    .await
            }
            .instrument(span),
        );

        Ok(RunHandle {
            run_id,
            cancel: cancel_tx,
            join,
        })
    }

    async fn execute_run(
        self: Arc<Self>,
        run_id: RunId,
        work: Vec<(BenchmarkTaskCase, BenchmarkConfiguration)>,
        parallel: bool,
        max_concurrency: usize,
        limit: Duration,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunSummary, HarnessError> {
        let guard = RunGuard {
            harness: Arc::clone(&self),
            run_id: run_id.clone(),
            armed: true,
        };
        let clock = Instant::now();
        let total = work.len();
        obs::emit_benchmark_run_started(run_id.as_str(), total, parallel, max_concurrency);

        let outcome = match self
            .store
            .update_run_status(&run_id, BenchmarkRunStatus::Running)
            .await
        {
            Ok(()) if parallel => {
                Ok(self
                    .drive_parallel(&run_id, work, max_concurrency, limit, cancel.clone())
                    .await)
            }
            Ok(()) => Ok(self.drive_sequential(&run_id, work, limit, &cancel).await),
            Err(e) => Err(HarnessError::from(e)),
        };

        // Every dispatched item yields exactly one result, so a short result
        // set means cancellation skipped work.
        let status = match &outcome {
            Err(_) => BenchmarkRunStatus::Failed,
            Ok(drive) if drive.unpersisted > 0 => BenchmarkRunStatus::Failed,
            Ok(drive) if drive.results.len() < total => BenchmarkRunStatus::Cancelled,
            Ok(drive) if total > 0 && drive.results.iter().all(|r| !r.success) => {
                BenchmarkRunStatus::Failed
            }
            Ok(_) => BenchmarkRunStatus::Completed,
        };

        if let Err(e) = self.store.update_run_status(&run_id, status).await {
            warn!(run_id = %run_id, error = %e, "failed to finalise run status");
        }
        self.forget(&run_id);
        self.release_pin(&run_id).await;
        guard.disarm();
        if let Err(e) = self.logger.flush().await {
            warn!(run_id = %run_id, error = %e, "benchmark events not yet flushed");
        }

        let drive = outcome?;
        obs::emit_benchmark_run_finished(
            run_id.as_str(),
            status.as_str(),
            drive.results.len(),
            u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        );
        Ok(RunSummary {
            run_id,
            status,
            results: drive.results,
            unpersisted: drive.unpersisted,
        })
    }

    fn forget(&self, run_id: &RunId) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(run_id);
        }
    }

    async fn release_pin(&self, run_id: &RunId) {
        if let Err(e) = self.logger.store().unpin_run(run_id).await {
            warn!(run_id = %run_id, error = %e, "failed to release retention pin");
        }
    }

    async fn drive_sequential(
        &self,
        run_id: &RunId,
        work: Vec<(BenchmarkTaskCase, BenchmarkConfiguration)>,
        limit: Duration,
        cancel: &watch::Receiver<bool>,
    ) -> Drive {
        let mut drive = Drive::with_capacity(work.len());
        for (task, config) in work {
            let stop = *cancel.borrow();
            if stop {
                break;
            }
            let result = self.execute_guarded(run_id, &task, &config, limit).await;
            let stored = self.persist(&result).await;
            drive.push(result, stored);
        }
        drive
    }

    async fn drive_parallel(
        self: &Arc<Self>,
        run_id: &RunId,
        work: Vec<(BenchmarkTaskCase, BenchmarkConfiguration)>,
        max_concurrency: usize,
        limit: Duration,
        cancel: watch::Receiver<bool>,
    ) -> Drive {
        // Semaphore enforces max_concurrency
        let sem = Arc::new(Semaphore::new(max_concurrency));

        let mut tasks = Vec::with_capacity(work.len());
        for (task, config) in work {
            let item = (task.task_id.clone(), config.name.clone());
            let harness = Arc::clone(self);
            let sem = Arc::clone(&sem);
            let cancel = cancel.clone();
            let run_id = run_id.clone();

            let handle = tokio::spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();

                    // Nothing new is dispatched once the run is cancelled.
                    let stop = *cancel.borrow();
                    if stop {
                        return None;
                    }

                    let result = harness.execute_guarded(&run_id, &task, &config, limit).await;
                    let stored = harness.persist(&result).await;
                    Some((result, stored))
                }
                .in_current_span(),
            );
            tasks.push((item, handle));
        }

        let mut drive = Drive::with_capacity(tasks.len());
        for ((task_id, config_name), handle) in tasks {
            match handle.await {
                Ok(Some((result, stored))) => drive.push(result, stored),
                Ok(None) => {}
                Err(e) => {
                    warn!(task_id = %task_id, config_name = %config_name, error = %e, "benchmark worker ended abnormally");
                    let result = self.aborted_result(
                        run_id,
                        &task_id,
                        &config_name,
                        Utc::now(),
                        0.0,
                        format!("benchmark worker ended abnormally: {e}"),
                    );
                    let stored = self.persist(&result).await;
                    drive.push(result, stored);
                }
            }
        }
        drive
    }

    /// Store a result, retrying with the logger's backoff policy. Returns
    /// `false` once every attempt has failed.
    async fn persist(&self, result: &BenchmarkResult) -> bool {
        let policy = self.logger.config();
        let max_attempts = policy.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.append_result(result.clone()).await {
                Ok(()) => return true,
                // An earlier attempt landed before its response was lost.
                Err(StorageError::Duplicate { .. }) if attempt > 1 => return true,
                Err(e) if attempt < max_attempts => {
                    debug!(task_id = %result.task_id, attempt, error = %e, "retrying result append");
                    tokio::time::sleep(policy.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        task_id = %result.task_id,
                        config_name = %result.config_name,
                        attempts = attempt,
                        error = %e,
                        "failed to persist benchmark result"
                    );
                    return false;
                }
            }
        }
    }

    /// `execute_one` behind a panic boundary: a panicking executor or scorer
    /// becomes an unsuccessful result like any other failure.
    async fn execute_guarded(
        &self,
        run_id: &RunId,
        task: &BenchmarkTaskCase,
        config: &BenchmarkConfiguration,
        limit: Duration,
    ) -> BenchmarkResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        match AssertUnwindSafe(self.execute_one(run_id, task, config, limit))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => self.aborted_result(
                run_id,
                &task.task_id,
                &config.name,
                started_at,
                clock.elapsed().as_secs_f64() * 1000.0,
                format!("executor panicked: {}", panic_reason(payload.as_ref())),
            ),
        }
    }

    fn aborted_result(
        &self,
        run_id: &RunId,
        task_id: &str,
        config_name: &str,
        started_at: DateTime<Utc>,
        duration_ms: f64,
        error: String,
    ) -> BenchmarkResult {
        self.logger.metrics().inc_execution(false);
        obs::emit_execution_finished(task_id, config_name, false, 0.0, duration_ms);
        BenchmarkResult {
            run_id: run_id.clone(),
            task_id: task_id.to_string(),
            config_name: config_name.to_string(),
            started_at,
            finished_at: Utc::now(),
            success: false,
            score: 0.0,
            raw_output: Value::Null,
            error: Some(error),
            error_type: Some("Panic".to_string()),
            duration_ms,
        }
    }

    /// Execute, time and score one work item. Never fails: executor errors
    /// and timeouts become unsuccessful results.
    async fn execute_one(
        &self,
        run_id: &RunId,
        task: &BenchmarkTaskCase,
        config: &BenchmarkConfiguration,
        limit: Duration,
    ) -> BenchmarkResult {
        let input: Payload = [
            ("task_id".to_string(), json!(task.task_id)),
            ("task_type".to_string(), json!(task.task_type)),
            ("config_name".to_string(), json!(config.name)),
            ("model".to_string(), json!(config.model)),
        ]
        .into_iter()
        .collect();
        let spec = HookSpec::new("benchmark_harness", "execute")
            .event_type(EventType::BenchmarkStop)
            .with_entry_event(EventType::BenchmarkStart)
            .run(run_id.as_str())
            .input(input);

        let started_at = Utc::now();
        let clock = Instant::now();
        let executor = Arc::clone(&self.executor);
        let scorer = Arc::clone(&self.scorer);
        let outcome = instrument_async_with_timeout(&self.logger, spec, limit, async move {
            let output = executor.execute(task, config).await?;
            let score = scorer.score(task, &output);
            Ok::<_, ExecutorError>(ScoredOutput { score, output })
        })
        .await;
        let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;

        let (success, score, raw_output, error, error_type) = match outcome {
            Ok(scored) => (true, scored.score, scored.output.output, None, None),
            Err(HookError::Operation(e)) => (
                false,
                0.0,
                Value::Null,
                Some(e.to_string()),
                Some(e.kind().to_string()),
            ),
            Err(HookError::Timeout { limit_ms }) => (
                false,
                0.0,
                Value::Null,
                Some(format!("execution timed out after {limit_ms}ms")),
                Some("Timeout".to_string()),
            ),
        };

        self.logger.metrics().inc_execution(success);
        obs::emit_execution_finished(&task.task_id, &config.name, success, score, duration_ms);

        BenchmarkResult {
            run_id: run_id.clone(),
            task_id: task.task_id.clone(),
            config_name: config.name.clone(),
            started_at,
            finished_at: Utc::now(),
            success,
            score,
            raw_output,
            error,
            error_type,
            duration_ms,
        }
    }
}

/// Results gathered while driving a run.
struct Drive {
    results: Vec<BenchmarkResult>,
    unpersisted: usize,
}

impl Drive {
    fn with_capacity(n: usize) -> Self {
        Self {
            results: Vec::with_capacity(n),
            unpersisted: 0,
        }
    }

    fn push(&mut self, result: BenchmarkResult, stored: bool) {
        if !stored {
            self.unpersisted += 1;
        }
        self.results.push(result);
    }
}

/// Finalises a run that unwinds before `execute_run` completes: marks it
/// `Failed`, drops it from the active map and releases its retention pin.
struct RunGuard {
    harness: Arc<BenchmarkHarness>,
    run_id: RunId,
    armed: bool,
}

impl RunGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.harness.forget(&self.run_id);
        let harness = Arc::clone(&self.harness);
        let run_id = self.run_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = harness
                        .store
                        .update_run_status(&run_id, BenchmarkRunStatus::Failed)
                        .await
                    {
                        warn!(run_id = %run_id, error = %e, "failed to finalise aborted run");
                    }
                    harness.release_pin(&run_id).await;
                });
            }
            Err(_) => warn!(run_id = %run_id, "run aborted outside a runtime; record left open"),
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
