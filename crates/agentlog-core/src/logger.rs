//! Process-wide event logger handle.
//!
//! `EventLogger` owns the ingestion pipeline: sanitize, stage in a bounded
//! [`EventBuffer`], and flush to an [`EventStore`] from a background task.
//! Construct one at process start with [`EventLogger::start`], pass clones to
//! the components that log, and call [`EventLogger::shutdown`] before exit.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use agentlog_store::{Event, EventId, EventStore, EventType, LogLevel, Payload, RunId, StorageError};

use crate::buffer::EventBuffer;
use crate::domain::{normalize, CoreError, RawEvent, Sanitizer};
use crate::hooks::{HookScope, HookSpec};
use crate::metrics::Metrics;
use crate::obs;

/// Ingestion pipeline settings (the `[logger]` config section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Maximum staged events before the oldest are dropped.
    pub buffer_capacity: usize,
    pub flush_interval_ms: u64,
    /// Events written per flush batch; reaching it also wakes the flusher.
    pub flush_batch_size: usize,
    /// Append attempts per event before the flush gives up.
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Emit a separate entry event for every hooked call.
    pub emit_entry_events: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            flush_interval_ms: 1_000,
            flush_batch_size: 500,
            retry_attempts: 3,
            backoff_base_ms: 50,
            backoff_max_ms: 2_000,
            emit_entry_events: false,
        }
    }
}

impl LoggerConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(factor)
                .min(self.backoff_max_ms),
        )
    }
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerStats {
    pub recorded: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub flushed: u64,
    pub flush_failures: u64,
    pub buffered: usize,
}

/// Who an event is about. Shared by the convenience emitters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub component: Option<String>,
}

impl Attribution {
    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Self::default()
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    fn apply(&self, mut event: Event) -> Event {
        event.agent_id = self.agent_id.clone();
        event.session_id = self.session_id.clone();
        event.user_id = self.user_id.clone();
        event.component = self.component.clone();
        event
    }
}

enum Delivery {
    Stored,
    /// The store will never accept this event.
    Rejected(StorageError),
    Failed {
        event: Event,
        error: StorageError,
        attempts: u32,
    },
}

struct LoggerInner {
    store: Arc<dyn EventStore>,
    buffer: EventBuffer,
    sanitizer: Arc<Sanitizer>,
    config: LoggerConfig,
    metrics: Metrics,
    flush_lock: tokio::sync::Mutex<()>,
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the ingestion pipeline.
#[derive(Clone)]
pub struct EventLogger {
    inner: Arc<LoggerInner>,
}

impl std::fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogger")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl EventLogger {
    /// Start a logger with the default sanitizer. Must be called inside a
    /// tokio runtime.
    pub fn start(config: LoggerConfig, store: Arc<dyn EventStore>) -> Self {
        Self::start_with_sanitizer(config, Sanitizer::default(), store)
    }

    pub fn start_with_sanitizer(
        config: LoggerConfig,
        sanitizer: Sanitizer,
        store: Arc<dyn EventStore>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let wake = Arc::new(Notify::new());
        let inner = Arc::new(LoggerInner {
            store,
            buffer: EventBuffer::new(config.buffer_capacity),
            sanitizer: Arc::new(sanitizer),
            metrics: Metrics::new(),
            flush_lock: tokio::sync::Mutex::new(()),
            wake: Arc::clone(&wake),
            shutdown_tx,
            worker: Mutex::new(None),
            config,
        });

        let interval = Duration::from_millis(inner.config.flush_interval_ms.max(1));
        let handle = tokio::spawn(flush_worker(
            Arc::downgrade(&inner),
            wake,
            shutdown_rx,
            interval,
        ));
        if let Ok(mut slot) = inner.worker.lock() {
            *slot = Some(handle);
        }
        Self { inner }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.inner.config
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.inner.sanitizer
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// The store this logger flushes into.
    pub fn store(&self) -> Arc<dyn EventStore> {
        Arc::clone(&self.inner.store)
    }

    /// Validate, sanitize and stage a raw event.
    pub fn record(&self, raw: RawEvent) -> Result<EventId, CoreError> {
        match normalize(raw, &self.inner.sanitizer) {
            Ok(event) => Ok(self.inner.stage(event)),
            Err(e) => {
                self.inner.metrics.inc_rejected();
                debug!(error = %e, "event rejected");
                Err(e.into())
            }
        }
    }

    /// Sanitize and stage an already-typed event.
    pub fn ingest(&self, mut event: Event) -> EventId {
        self.inner.sanitizer.sanitize_event(&mut event);
        self.inner.stage(event)
    }

    /// Producer contract: never fails.
    ///
    /// Attribute keys that name an event slot (`agent_id`, `tool_name`,
    /// `duration_ms`, `input_data`, ...) fill that slot when well-typed;
    /// everything else lands in `metadata`.
    pub fn notify(
        &self,
        event_type: EventType,
        level: LogLevel,
        message: impl Into<String>,
        attributes: Payload,
    ) -> EventId {
        let mut event = Event::new(event_type, level, message);
        for (key, value) in attributes {
            lift_attribute(&mut event, key, value);
        }
        self.ingest(event)
    }

    pub fn log_tool_call(
        &self,
        attribution: &Attribution,
        tool_name: &str,
        input: Payload,
        output: Payload,
        duration_ms: f64,
    ) -> EventId {
        let mut event = attribution.apply(
            Event::new(EventType::ToolCall, LogLevel::Info, format!("tool call: {tool_name}"))
                .with_duration_ms(duration_ms),
        );
        event.tool_name = Some(tool_name.to_string());
        event.input_data = input;
        event.output_data = output;
        self.ingest(event)
    }

    pub fn log_agent_decision(
        &self,
        attribution: &Attribution,
        decision: &str,
        reasoning: Option<&str>,
        context: Payload,
    ) -> EventId {
        let mut event = attribution.apply(Event::new(
            EventType::AgentDecision,
            LogLevel::Info,
            format!("decision: {decision}"),
        ));
        event.input_data = context;
        event
            .output_data
            .insert("decision".to_string(), Value::String(decision.to_string()));
        if let Some(reasoning) = reasoning {
            event
                .metadata
                .insert("reasoning".to_string(), Value::String(reasoning.to_string()));
        }
        self.ingest(event)
    }

    /// A failed execution is logged at `error` level.
    pub fn log_code_execution(
        &self,
        attribution: &Attribution,
        language: &str,
        code: &str,
        result: Payload,
        success: bool,
        duration_ms: f64,
    ) -> EventId {
        let level = if success { LogLevel::Info } else { LogLevel::Error };
        let mut event = attribution.apply(
            Event::new(
                EventType::CodeExecution,
                level,
                format!("{language} code execution"),
            )
            .with_duration_ms(duration_ms),
        );
        event
            .input_data
            .insert("language".to_string(), Value::String(language.to_string()));
        event
            .input_data
            .insert("code".to_string(), Value::String(code.to_string()));
        event.output_data = result;
        event.metadata.insert("success".to_string(), Value::Bool(success));
        if !success {
            event.error_type = Some("ExecutionFailed".to_string());
        }
        self.ingest(event)
    }

    pub fn log_model_call(
        &self,
        attribution: &Attribution,
        model: &str,
        input: Payload,
        output: Payload,
        duration_ms: f64,
        total_tokens: Option<u64>,
    ) -> EventId {
        let mut event = attribution.apply(
            Event::new(EventType::ModelCall, LogLevel::Info, format!("model call: {model}"))
                .with_duration_ms(duration_ms),
        );
        event.input_data = input;
        event.output_data = output;
        event
            .metadata
            .insert("model".to_string(), Value::String(model.to_string()));
        if let Some(tokens) = total_tokens {
            event
                .metadata
                .insert("total_tokens".to_string(), Value::from(tokens));
        }
        self.ingest(event)
    }

    pub fn log_performance(
        &self,
        attribution: &Attribution,
        operation: &str,
        duration_ms: f64,
        cpu_usage: Option<f64>,
        memory_usage: Option<f64>,
    ) -> EventId {
        let mut event = attribution.apply(
            Event::new(
                EventType::Performance,
                LogLevel::Info,
                format!("performance: {operation}"),
            )
            .with_duration_ms(duration_ms),
        );
        event.function_name = Some(operation.to_string());
        event.cpu_usage = cpu_usage.filter(|v| v.is_finite() && *v >= 0.0);
        event.memory_usage = memory_usage.filter(|v| v.is_finite() && *v >= 0.0);
        self.ingest(event)
    }

    pub fn log_error(
        &self,
        attribution: &Attribution,
        error_type: &str,
        error_message: &str,
        stack_trace: Option<&str>,
        context: Payload,
    ) -> EventId {
        let mut event = attribution.apply(Event::new(
            EventType::Error,
            LogLevel::Error,
            format!("{error_type}: {error_message}"),
        ));
        event.error_type = Some(error_type.to_string());
        event.error_message = Some(error_message.to_string());
        event.stack_trace = stack_trace.map(str::to_string);
        event.metadata = context;
        self.ingest(event)
    }

    /// Open a logging scope around a block.
    pub fn scope(&self, component: impl Into<String>, function_name: impl Into<String>) -> HookScope {
        HookScope::open(self.clone(), HookSpec::new(component, function_name))
    }

    /// Open a logging scope with full control over the emitted event.
    pub fn scope_with(&self, spec: HookSpec) -> HookScope {
        HookScope::open(self.clone(), spec)
    }

    /// Exempt a benchmark run's events from retention cleanup.
    pub async fn pin_run(&self, run_id: &RunId) -> Result<(), CoreError> {
        Ok(self.inner.store.pin_run(run_id).await?)
    }

    pub async fn unpin_run(&self, run_id: &RunId) -> Result<(), CoreError> {
        Ok(self.inner.store.unpin_run(run_id).await?)
    }

    /// Write everything staged at the time of the call. Returns the number of
    /// events stored.
    ///
    /// On a storage failure that outlasts the retry budget, the unwritten
    /// events go back to the front of the buffer and the error is returned.
    pub async fn flush(&self) -> Result<usize, CoreError> {
        self.inner.flush().await
    }

    /// Stop the background flusher and write what remains.
    pub async fn shutdown(&self) -> Result<usize, CoreError> {
        let _ = self.inner.shutdown_tx.send(true);
        let handle = self
            .inner
            .worker
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "flush worker ended abnormally");
            }
        }
        let written = self.inner.flush().await;
        self.inner.metrics.flush();
        written
    }

    pub fn stats(&self) -> LoggerStats {
        let m = &self.inner.metrics;
        LoggerStats {
            recorded: m.recorded(),
            rejected: m.rejected(),
            dropped: m.dropped(),
            flushed: m.flushed(),
            flush_failures: m.flush_failures(),
            buffered: self.inner.buffer.len(),
        }
    }
}

impl LoggerInner {
    fn stage(&self, event: Event) -> EventId {
        let id = event.event_id.clone();
        obs::emit_event_recorded(id.as_str(), event.event_type.as_str(), event.level.as_str());
        self.metrics.inc_recorded();
        if self.buffer.push(event) {
            self.note_dropped(1);
        }
        if self.buffer.len() >= self.config.flush_batch_size {
            self.wake.notify_one();
        }
        id
    }

    fn note_dropped(&self, n: u64) {
        let before = self.metrics.dropped();
        let total = self.metrics.add_dropped(n);
        // First drop, then once per thousand.
        if before == 0 || total / 1000 > before / 1000 {
            obs::emit_buffer_overflow(total, self.buffer.capacity());
        }
    }

    async fn flush(&self) -> Result<usize, CoreError> {
        let _guard = self.flush_lock.lock().await;
        let batch_size = self.config.flush_batch_size.max(1);
        let mut budget = self.buffer.len();
        let mut written = 0usize;

        while budget > 0 {
            let batch = self.buffer.drain(batch_size.min(budget));
            if batch.is_empty() {
                break;
            }
            budget -= batch.len();

            let mut pending = batch.into_iter();
            while let Some(event) = pending.next() {
                match self.deliver(event).await {
                    Delivery::Stored => {
                        written += 1;
                        self.metrics.add_flushed(1);
                    }
                    Delivery::Rejected(error) => {
                        warn!(error = %error, "store rejected event; dropping it");
                        self.note_dropped(1);
                    }
                    Delivery::Failed {
                        event,
                        error,
                        attempts,
                    } => {
                        let mut rest = vec![event];
                        rest.extend(pending);
                        let requeued = rest.len();
                        let evicted = self.buffer.requeue_front(rest);
                        if evicted > 0 {
                            self.note_dropped(evicted as u64);
                        }
                        self.metrics.inc_flush_failures();
                        obs::emit_flush_failed(attempts, requeued, &error);
                        return Err(error.into());
                    }
                }
            }
        }
        Ok(written)
    }

    async fn deliver(&self, event: Event) -> Delivery {
        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.append(event.clone()).await {
                // An earlier attempt landed before its response was lost.
                Ok(()) | Err(StorageError::Duplicate { .. }) => return Delivery::Stored,
                Err(error @ StorageError::Serialization(_)) => return Delivery::Rejected(error),
                Err(error) if attempt >= max_attempts => {
                    return Delivery::Failed {
                        event,
                        error,
                        attempts: attempt,
                    }
                }
                Err(error) => {
                    debug!(attempt, error = %error, "append failed; backing off");
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

async fn flush_worker(
    inner: Weak<LoggerInner>,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.buffer.is_empty() {
            continue;
        }
        if let Err(e) = inner.flush().await {
            debug!(error = %e, "background flush failed; will retry");
        }
    }
}

fn lift_attribute(event: &mut Event, key: String, value: Value) {
    let value = match (key.as_str(), value) {
        ("input_data", Value::Object(map)) => {
            event.input_data.extend(map);
            return;
        }
        ("output_data", Value::Object(map)) => {
            event.output_data.extend(map);
            return;
        }
        (_, value) => value,
    };

    let measure = value.as_f64().filter(|v| v.is_finite() && *v >= 0.0);
    match (key.as_str(), measure) {
        ("duration_ms", Some(v)) => {
            event.duration_ms = v;
            return;
        }
        ("cpu_usage", Some(v)) => {
            event.cpu_usage = Some(v);
            return;
        }
        ("memory_usage", Some(v)) => {
            event.memory_usage = Some(v);
            return;
        }
        _ => {}
    }

    let slot = match key.as_str() {
        "agent_id" => &mut event.agent_id,
        "session_id" => &mut event.session_id,
        "user_id" => &mut event.user_id,
        "component" => &mut event.component,
        "function_name" => &mut event.function_name,
        "tool_name" => &mut event.tool_name,
        "correlation_id" => &mut event.correlation_id,
        "run_id" => &mut event.run_id,
        "error_type" => &mut event.error_type,
        "error_message" => &mut event.error_message,
        "stack_trace" => &mut event.stack_trace,
        _ => {
            event.metadata.insert(key, value);
            return;
        }
    };
    match value {
        Value::String(s) => *slot = Some(s),
        other => {
            event.metadata.insert(key, other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlog_store::{EventFilter, EventReader, MemoryEventStore};
    use serde_json::json;

    fn payload(v: Value) -> Payload {
        match v {
            Value::Object(map) => map.into_iter().collect(),
            _ => Payload::new(),
        }
    }

    fn quiet_config() -> LoggerConfig {
        LoggerConfig {
            flush_interval_ms: 3_600_000,
            ..LoggerConfig::default()
        }
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let config = LoggerConfig {
            backoff_base_ms: 10,
            backoff_max_ms: 35,
            ..LoggerConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(10));
        assert_eq!(config.backoff(2), Duration::from_millis(20));
        assert_eq!(config.backoff(3), Duration::from_millis(35));
        assert_eq!(config.backoff(60), Duration::from_millis(35));
    }

    #[tokio::test]
    async fn notify_lifts_known_attributes() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = EventLogger::start(quiet_config(), store.clone());
        let id = logger.notify(
            EventType::ToolCall,
            LogLevel::Info,
            "search",
            payload(json!({
                "agent_id": "a1",
                "tool_name": "web_search",
                "duration_ms": 12.0,
                "input_data": {"q": "rust"},
                "retries": 2,
                "session_id": 7
            })),
        );
        logger.flush().await.unwrap();

        let event = store.get(&id).await.unwrap();
        assert_eq!(event.agent_id.as_deref(), Some("a1"));
        assert_eq!(event.tool_name.as_deref(), Some("web_search"));
        assert_eq!(event.duration_ms, 12.0);
        assert_eq!(event.input_data["q"], json!("rust"));
        assert_eq!(event.metadata["retries"], json!(2));
        // Wrong type for a slot: kept, but as metadata.
        assert_eq!(event.session_id, None);
        assert_eq!(event.metadata["session_id"], json!(7));
    }

    #[tokio::test]
    async fn record_rejects_invalid_and_counts() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = EventLogger::start(quiet_config(), store);
        assert!(logger.record(RawEvent::default()).is_err());
        logger
            .record(RawEvent::new(EventType::System, LogLevel::Info, "ok"))
            .unwrap();
        let stats = logger.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.recorded, 1);
        assert_eq!(stats.buffered, 1);
    }

    #[tokio::test]
    async fn convenience_emitters_fill_slots() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = EventLogger::start(quiet_config(), store.clone());
        let who = Attribution::agent("a1").session("s1").component("planner");

        let tool = logger.log_tool_call(&who, "grep", Payload::new(), Payload::new(), 3.0);
        let failed = logger.log_code_execution(&who, "python", "1/0", Payload::new(), false, 1.0);
        let err = logger.log_error(&who, "KeyError", "missing key", Some("trace"), Payload::new());
        logger.flush().await.unwrap();

        let tool = store.get(&tool).await.unwrap();
        assert_eq!(tool.event_type, EventType::ToolCall);
        assert_eq!(tool.session_id.as_deref(), Some("s1"));
        assert_eq!(tool.component.as_deref(), Some("planner"));

        let failed = store.get(&failed).await.unwrap();
        assert_eq!(failed.level, LogLevel::Error);
        assert_eq!(failed.input_data["code"], json!("1/0"));

        let err = store.get(&err).await.unwrap();
        assert_eq!(err.error_type.as_deref(), Some("KeyError"));
        assert_eq!(err.stack_trace.as_deref(), Some("trace"));
    }

    #[tokio::test]
    async fn ingest_sanitizes() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = EventLogger::start(quiet_config(), store.clone());
        let mut event = Event::new(EventType::System, LogLevel::Info, "token: Bearer abcdef123456");
        event
            .input_data
            .insert("password".to_string(), json!("hunter2"));
        let id = logger.ingest(event);
        logger.flush().await.unwrap();

        let stored = store.get(&id).await.unwrap();
        assert!(!stored.message.contains("abcdef123456"));
        assert_eq!(stored.input_data["password"], json!("[REDACTED]"));
    }

    #[tokio::test]
    async fn shutdown_flushes_remaining() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = EventLogger::start(quiet_config(), store.clone());
        for i in 0..5 {
            logger.notify(EventType::System, LogLevel::Debug, format!("e{i}"), Payload::new());
        }
        assert_eq!(logger.shutdown().await.unwrap(), 5);
        assert_eq!(store.count(&EventFilter::new()).await.unwrap(), 5);
        assert_eq!(logger.stats().flushed, 5);
    }

    #[tokio::test]
    async fn batch_size_wakes_flusher() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = EventLogger::start(
            LoggerConfig {
                flush_batch_size: 2,
                ..quiet_config()
            },
            store.clone(),
        );
        logger.notify(EventType::System, LogLevel::Info, "a", Payload::new());
        logger.notify(EventType::System, LogLevel::Info, "b", Payload::new());

        for _ in 0..100 {
            if store.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.len(), 2);
    }
}
