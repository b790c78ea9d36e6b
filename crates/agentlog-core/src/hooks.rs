//! Instrumentation hooks.
//!
//! Two shapes over one primitive:
//! - [`HookScope`]: a guard around an arbitrary block. It records exactly one
//!   exit event however the block ends: `finish_ok`, `finish_err`, an early
//!   return (guard dropped unfinished) or a panic.
//! - `instrument_*`: wrap a single call (sync or async) in a scope and
//!   forward its result unchanged.
//!
//! Every path ends in `HookScope::emit`, so there is one emission routine.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use agentlog_store::{Event, EventId, EventType, LogLevel, Payload};

use crate::logger::EventLogger;

/// What a hook records about the wrapped operation.
#[derive(Debug, Clone, PartialEq)]
pub struct HookSpec {
    pub component: String,
    pub function_name: String,
    /// Type of the exit event.
    pub event_type: EventType,
    /// When set, an entry event of this type is emitted on open.
    pub entry_event_type: Option<EventType>,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    pub input: Payload,
    pub metadata: Payload,
}

impl HookSpec {
    pub fn new(component: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            function_name: function_name.into(),
            event_type: EventType::Custom,
            entry_event_type: None,
            agent_id: None,
            session_id: None,
            run_id: None,
            input: Payload::new(),
            metadata: Payload::new(),
        }
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn with_entry_event(mut self, event_type: EventType) -> Self {
        self.entry_event_type = Some(event_type);
        self
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn input(mut self, input: Payload) -> Self {
        self.input = input;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Error returned by [`instrument_async_with_timeout`].
#[derive(Debug, thiserror::Error)]
pub enum HookError<E> {
    #[error("operation timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("{0}")]
    Operation(E),
}

impl<E> HookError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HookError::Timeout { .. })
    }
}

enum Exit {
    Ok,
    Err {
        error_type: String,
        message: String,
    },
    Timeout {
        limit_ms: u64,
    },
    EarlyReturn,
    Panic,
}

impl Exit {
    fn label(&self) -> &'static str {
        match self {
            Exit::Ok => "ok",
            Exit::Err { .. } => "error",
            Exit::Timeout { .. } => "timeout",
            Exit::EarlyReturn => "early_return",
            Exit::Panic => "panic",
        }
    }
}

/// Guard that records one exit event for the block it spans.
///
/// ```ignore
/// let mut scope = logger.scope("planner", "choose_tool");
/// scope.set_input(input);
/// let choice = pick(&options)?;   // `?` here records exit = "early_return"
/// scope.set_output(output);
/// scope.finish_ok();
/// ```
pub struct HookScope {
    logger: EventLogger,
    spec: HookSpec,
    correlation_id: String,
    started_at: DateTime<Utc>,
    started: Instant,
    output: Payload,
    finished: bool,
}

impl HookScope {
    pub(crate) fn open(logger: EventLogger, spec: HookSpec) -> Self {
        let scope = Self {
            correlation_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            output: Payload::new(),
            finished: false,
            logger,
            spec,
        };
        let entry_type = scope
            .spec
            .entry_event_type
            .or_else(|| scope.logger.config().emit_entry_events.then_some(scope.spec.event_type));
        if let Some(event_type) = entry_type {
            let mut event = scope.base_event(event_type, LogLevel::Info, "started");
            event.input_data = scope.spec.input.clone();
            event.metadata = scope.spec.metadata.clone();
            event
                .metadata
                .insert("phase".to_string(), Value::String("entry".to_string()));
            scope.logger.ingest(event);
        }
        scope
    }

    /// Shared by the entry and exit events of this scope.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn set_input(&mut self, input: Payload) {
        self.spec.input = input;
    }

    pub fn set_output(&mut self, output: Payload) {
        self.output = output;
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.spec.metadata.insert(key.into(), value);
    }

    pub fn finish_ok(mut self) -> EventId {
        self.emit(Exit::Ok)
    }

    /// Record a failure. `error_type` is the short type name of `E`.
    pub fn finish_err<E: Display + ?Sized>(mut self, error: &E) -> EventId {
        self.emit(Exit::Err {
            error_type: short_type_name::<E>(),
            message: error.to_string(),
        })
    }

    /// Record a failure with an explicit error type.
    pub fn finish_err_typed(mut self, error_type: &str, message: &str) -> EventId {
        self.emit(Exit::Err {
            error_type: error_type.to_string(),
            message: message.to_string(),
        })
    }

    fn finish_timeout(mut self, limit_ms: u64) -> EventId {
        self.emit(Exit::Timeout { limit_ms })
    }

    fn base_event(&self, event_type: EventType, level: LogLevel, what: &str) -> Event {
        let mut event = Event::new(
            event_type,
            level,
            format!("{}.{} {what}", self.spec.component, self.spec.function_name),
        )
        .at(self.started_at);
        event.component = Some(self.spec.component.clone());
        event.function_name = Some(self.spec.function_name.clone());
        event.agent_id = self.spec.agent_id.clone();
        event.session_id = self.spec.session_id.clone();
        event.run_id = self.spec.run_id.clone();
        event.correlation_id = Some(self.correlation_id.clone());
        event
    }

    fn emit(&mut self, exit: Exit) -> EventId {
        self.finished = true;
        let duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;

        let (level, what) = match &exit {
            Exit::Ok => (LogLevel::Info, "completed"),
            Exit::EarlyReturn => (LogLevel::Info, "returned early"),
            Exit::Err { .. } => (LogLevel::Error, "failed"),
            Exit::Timeout { .. } => (LogLevel::Error, "timed out"),
            Exit::Panic => (LogLevel::Critical, "panicked"),
        };
        let mut event = self
            .base_event(self.spec.event_type, level, what)
            .with_duration_ms(duration_ms);
        event.input_data = std::mem::take(&mut self.spec.input);
        event.output_data = std::mem::take(&mut self.output);
        event.metadata = std::mem::take(&mut self.spec.metadata);
        event
            .metadata
            .insert("phase".to_string(), Value::String("exit".to_string()));
        event
            .metadata
            .insert("exit".to_string(), Value::String(exit.label().to_string()));

        match exit {
            Exit::Ok | Exit::EarlyReturn => {}
            Exit::Err {
                error_type,
                message,
            } => {
                event.error_type = Some(error_type);
                event.error_message = Some(message);
            }
            Exit::Timeout { limit_ms } => {
                event.error_type = Some("Timeout".to_string());
                event.error_message = Some(format!("timed out after {limit_ms}ms"));
            }
            Exit::Panic => {
                event.error_type = Some("Panic".to_string());
                event.error_message = Some("operation panicked".to_string());
            }
        }
        self.logger.ingest(event)
    }
}

impl Drop for HookScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if std::thread::panicking() {
            self.emit(Exit::Panic);
        } else {
            self.emit(Exit::EarlyReturn);
        }
    }
}

/// Last path segment of `E`'s type name, without generic arguments.
fn short_type_name<E: ?Sized>() -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Serialize a result into an output payload. Objects are used as-is,
/// anything else is stored under `result`.
pub fn output_payload<T: Serialize + ?Sized>(value: &T, marker: &str) -> Payload {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        Ok(Value::Null) => Payload::new(),
        Ok(other) => Payload::from([("result".to_string(), other)]),
        Err(_) => Payload::from([("result".to_string(), Value::String(marker.to_string()))]),
    }
}

/// Wrap a synchronous call. The call's result is returned unchanged.
pub fn instrument_sync<T, E, F>(logger: &EventLogger, spec: HookSpec, f: F) -> Result<T, E>
where
    T: Serialize,
    E: Display,
    F: FnOnce() -> Result<T, E>,
{
    let mut scope = logger.scope_with(spec);
    match f() {
        Ok(value) => {
            scope.set_output(output_payload(&value, logger.sanitizer().redaction_marker()));
            scope.finish_ok();
            Ok(value)
        }
        Err(e) => {
            scope.finish_err(&e);
            Err(e)
        }
    }
}

/// Wrap an asynchronous call. The call's result is returned unchanged.
pub async fn instrument_async<T, E, Fut>(
    logger: &EventLogger,
    spec: HookSpec,
    fut: Fut,
) -> Result<T, E>
where
    T: Serialize,
    E: Display,
    Fut: Future<Output = Result<T, E>>,
{
    let mut scope = logger.scope_with(spec);
    match fut.await {
        Ok(value) => {
            scope.set_output(output_payload(&value, logger.sanitizer().redaction_marker()));
            scope.finish_ok();
            Ok(value)
        }
        Err(e) => {
            scope.finish_err(&e);
            Err(e)
        }
    }
}

/// Wrap an asynchronous call with a deadline. A timeout is recorded with
/// `error_type = "Timeout"` and is not retried.
pub async fn instrument_async_with_timeout<T, E, Fut>(
    logger: &EventLogger,
    spec: HookSpec,
    limit: Duration,
    fut: Fut,
) -> Result<T, HookError<E>>
where
    T: Serialize,
    E: Display,
    Fut: Future<Output = Result<T, E>>,
{
    let mut scope = logger.scope_with(spec);
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => {
            scope.set_output(output_payload(&value, logger.sanitizer().redaction_marker()));
            scope.finish_ok();
            Ok(value)
        }
        Ok(Err(e)) => {
            scope.finish_err(&e);
            Err(HookError::Operation(e))
        }
        Err(_) => {
            let limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            scope.finish_timeout(limit_ms);
            Err(HookError::Timeout { limit_ms })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LoggerConfig;
    use agentlog_store::{EventFilter, EventReader, MemoryEventStore};
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug)]
    struct ParseFailure;

    impl Display for ParseFailure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("could not parse")
        }
    }

    fn logger(store: Arc<MemoryEventStore>) -> EventLogger {
        EventLogger::start(
            LoggerConfig {
                flush_interval_ms: 3_600_000,
                ..LoggerConfig::default()
            },
            store,
        )
    }

    async fn all_events(logger: &EventLogger, store: &MemoryEventStore) -> Vec<Event> {
        logger.flush().await.unwrap();
        store.query(&EventFilter::new()).await.unwrap().events
    }

    #[tokio::test]
    async fn sync_success_records_output() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store.clone());
        let out: Result<u32, ParseFailure> =
            instrument_sync(&logger, HookSpec::new("parser", "parse"), || Ok(42));
        assert_eq!(out.unwrap(), 42);

        let events = all_events(&logger, &store).await;
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.level, LogLevel::Info);
        assert_eq!(e.component.as_deref(), Some("parser"));
        assert_eq!(e.function_name.as_deref(), Some("parse"));
        assert_eq!(e.output_data["result"], json!(42));
        assert_eq!(e.metadata["exit"], json!("ok"));
    }

    #[tokio::test]
    async fn error_is_forwarded_unchanged() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store.clone());
        let out: Result<(), ParseFailure> =
            instrument_sync(&logger, HookSpec::new("parser", "parse"), || Err(ParseFailure));
        assert!(matches!(out, Err(ParseFailure)));

        let events = all_events(&logger, &store).await;
        let e = &events[0];
        assert_eq!(e.level, LogLevel::Error);
        assert_eq!(e.error_type.as_deref(), Some("ParseFailure"));
        assert_eq!(e.error_message.as_deref(), Some("could not parse"));
    }

    #[tokio::test]
    async fn async_timeout_is_recorded() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store.clone());
        let out: Result<(), HookError<ParseFailure>> = instrument_async_with_timeout(
            &logger,
            HookSpec::new("tools", "slow"),
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(out, Err(HookError::Timeout { limit_ms: 10 })));

        let events = all_events(&logger, &store).await;
        assert_eq!(events[0].error_type.as_deref(), Some("Timeout"));
        assert_eq!(events[0].metadata["exit"], json!("timeout"));
    }

    #[tokio::test]
    async fn async_success_passes_value_through() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store.clone());
        let out: Result<&str, ParseFailure> =
            instrument_async(&logger, HookSpec::new("tools", "fetch"), async { Ok("body") }).await;
        assert_eq!(out.unwrap(), "body");
        assert_eq!(all_events(&logger, &store).await.len(), 1);
    }

    #[tokio::test]
    async fn early_return_is_recorded() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store.clone());

        fn lookup(logger: &EventLogger, key: Option<&str>) -> Option<usize> {
            let mut scope = logger.scope("cache", "lookup");
            scope.add_metadata("attempt", json!(1));
            let key = key?;
            scope.finish_ok();
            Some(key.len())
        }

        assert_eq!(lookup(&logger, None), None);
        let events = all_events(&logger, &store).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metadata["exit"], json!("early_return"));
        assert_eq!(events[0].metadata["attempt"], json!(1));
        assert_eq!(events[0].level, LogLevel::Info);
    }

    #[tokio::test]
    async fn panic_is_recorded_as_critical() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store.clone());

        let inner = logger.clone();
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _scope = inner.scope("worker", "explode");
            panic!("boom");
        }));
        assert!(caught.is_err());

        let events = all_events(&logger, &store).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, LogLevel::Critical);
        assert_eq!(events[0].error_type.as_deref(), Some("Panic"));
    }

    #[tokio::test]
    async fn entry_and_exit_share_correlation_id() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store.clone());
        let spec = HookSpec::new("harness", "execute")
            .event_type(EventType::BenchmarkStop)
            .with_entry_event(EventType::BenchmarkStart)
            .run("run-1");
        let scope = logger.scope_with(spec);
        let correlation = scope.correlation_id().to_string();
        scope.finish_ok();

        let events = all_events(&logger, &store).await;
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.correlation_id.as_deref() == Some(correlation.as_str())));
        assert!(events.iter().all(|e| e.run_id.as_deref() == Some("run-1")));
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert!(types.contains(&EventType::BenchmarkStart));
        assert!(types.contains(&EventType::BenchmarkStop));
    }

    #[test]
    fn short_type_names() {
        assert_eq!(short_type_name::<ParseFailure>(), "ParseFailure");
        assert_eq!(short_type_name::<std::io::Error>(), "Error");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec");
    }
}
