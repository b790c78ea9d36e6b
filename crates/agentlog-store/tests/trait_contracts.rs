//! Trait contract tests for EventStore and BenchmarkStore.
//!
//! Every check runs against both the in-memory backend and SurrealDB
//! (`mem://`). Any conforming implementation must pass these.

use std::sync::Arc;
use std::time::Duration;

use agentlog_store::*;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn event(t: i64, agent: &str) -> Event {
    Event::new(EventType::ToolCall, LogLevel::Info, format!("call at {t}"))
        .with_agent(agent)
        .at(at(t))
}

async fn memory() -> Arc<dyn EventStore> {
    Arc::new(MemoryEventStore::new())
}

async fn surreal() -> Arc<dyn EventStore> {
    let handle = SurrealHandle::in_memory().await.unwrap();
    Arc::new(handle.event_store())
}

// ===========================================================================
// EventStore contract
// ===========================================================================

async fn append_then_get(store: Arc<dyn EventStore>) {
    let e = event(1, "a1");
    store.append(e.clone()).await.unwrap();
    assert_eq!(store.get(&e.event_id).await.unwrap(), e);

    let missing = store.get(&EventId::new()).await.unwrap_err();
    assert!(matches!(missing, StorageError::EventNotFound { .. }));
}

async fn duplicate_id_rejected(store: Arc<dyn EventStore>) {
    let e = event(1, "a1");
    store.append(e.clone()).await.unwrap();
    let err = store.append(e).await.unwrap_err();
    assert!(matches!(err, StorageError::Duplicate { .. }));
    assert_eq!(store.count(&EventFilter::new()).await.unwrap(), 1);
}

async fn timeline_is_ordered_and_scoped(store: Arc<dyn EventStore>) {
    // Appended out of order on purpose.
    for (t, agent) in [(3, "a1"), (1, "a1"), (2, "a2"), (2, "a1")] {
        store.append(event(t, agent)).await.unwrap();
    }
    let timeline = store
        .timeline(&TimelineKey::Agent("a1".into()))
        .await
        .unwrap();
    let times: Vec<DateTime<Utc>> = timeline.iter().map(|e| e.timestamp).collect();
    assert_eq!(times, vec![at(1), at(2), at(3)]);
    assert!(timeline.iter().all(|e| e.agent_id.as_deref() == Some("a1")));
}

async fn session_timeline(store: Arc<dyn EventStore>) {
    store
        .append(event(1, "a1").with_session("s1"))
        .await
        .unwrap();
    store
        .append(event(2, "a2").with_session("s1"))
        .await
        .unwrap();
    store
        .append(event(3, "a2").with_session("s2"))
        .await
        .unwrap();
    let timeline = store
        .timeline(&TimelineKey::Session("s1".into()))
        .await
        .unwrap();
    assert_eq!(timeline.len(), 2);
}

async fn filters_combine(store: Arc<dyn EventStore>) {
    store.append(event(1, "a1")).await.unwrap();
    store
        .append(
            Event::new(EventType::Error, LogLevel::Error, "Tool search FAILED")
                .with_agent("a1")
                .at(at(2)),
        )
        .await
        .unwrap();
    store
        .append(
            Event::new(EventType::Error, LogLevel::Critical, "out of memory")
                .with_agent("a2")
                .at(at(3)),
        )
        .await
        .unwrap();

    let errors = store
        .query(&EventFilter::new().event_type(EventType::Error))
        .await
        .unwrap();
    assert_eq!(errors.events.len(), 2);

    let severe = store
        .query(&EventFilter::new().min_level(LogLevel::Error).agent("a1"))
        .await
        .unwrap();
    assert_eq!(severe.events.len(), 1);
    assert_eq!(severe.events[0].message, "Tool search FAILED");

    let text = store
        .query(&EventFilter::new().text("failed"))
        .await
        .unwrap();
    assert_eq!(text.events.len(), 1);

    let window = store
        .query(&EventFilter::new().since(at(2)).until(at(3)))
        .await
        .unwrap();
    assert_eq!(window.events.len(), 1);
    assert_eq!(window.events[0].timestamp, at(2));

    assert_eq!(
        store
            .count(&EventFilter::new().level(LogLevel::Critical))
            .await
            .unwrap(),
        1
    );
}

async fn cursor_pagination_visits_every_event_once(store: Arc<dyn EventStore>) {
    // Several events share a timestamp so the id tie-break matters.
    for t in 0..7 {
        store.append(event(t / 2, "a1")).await.unwrap();
    }

    let mut seen = Vec::new();
    let mut filter = EventFilter::new().limit(3);
    loop {
        let page = store.query(&filter).await.unwrap();
        assert!(page.events.len() <= 3);
        seen.extend(page.events.iter().map(|e| e.sort_key()));
        match page.next_cursor {
            Some(cursor) => filter = filter.after(cursor),
            None => break,
        }
    }
    assert_eq!(seen.len(), 7);
    let mut sorted = seen.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted, seen);
}

async fn offset_skips_leading_events(store: Arc<dyn EventStore>) {
    for t in 0..5 {
        store.append(event(t, "a1")).await.unwrap();
    }
    let page = store
        .query(&EventFilter::new().offset(3).limit(10))
        .await
        .unwrap();
    let times: Vec<_> = page.events.iter().map(|e| e.timestamp).collect();
    assert_eq!(times, vec![at(3), at(4)]);
    assert!(page.next_cursor.is_none());
}

async fn cleanup_respects_cutoff_and_pins(store: Arc<dyn EventStore>) {
    let run = RunId::new();
    store.append(event(0, "a1")).await.unwrap();
    store
        .append(event(1, "a1").with_run(run.as_str()))
        .await
        .unwrap();
    store.append(event(100, "a1")).await.unwrap();

    store.pin_run(&run).await.unwrap();
    let removed = store.cleanup_before(at(50)).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.count(&EventFilter::new()).await.unwrap(), 2);

    store.unpin_run(&run).await.unwrap();
    let removed = store.cleanup_before(at(50)).await.unwrap();
    assert_eq!(removed, 1);

    let left = store.query(&EventFilter::new()).await.unwrap();
    assert_eq!(left.events.len(), 1);
    assert_eq!(left.events[0].timestamp, at(100));
}

async fn cleanup_by_retention_window(store: Arc<dyn EventStore>) {
    let now = Utc::now();
    store
        .append(event(0, "a1").at(now - chrono::Duration::hours(2)))
        .await
        .unwrap();
    store
        .append(event(0, "a1").at(now - chrono::Duration::minutes(30)))
        .await
        .unwrap();

    let removed = store.cleanup(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(removed, 1);
    let left = store.query(&EventFilter::new()).await.unwrap();
    assert_eq!(left.events.len(), 1);
    assert!(left.events[0].timestamp > now - chrono::Duration::hours(1));
}

async fn stream_pages_lazily(store: Arc<dyn EventStore>) {
    for t in 0..11 {
        store.append(event(t, "a1")).await.unwrap();
    }
    let reader: Arc<dyn EventReader> = Arc::new(StoreReader(store.clone()));

    let all: Vec<Event> = query_stream(reader.clone(), EventFilter::new(), 4)
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(all.len(), 11);
    assert!(all.windows(2).all(|w| w[0].sort_key() < w[1].sort_key()));

    let capped: Vec<Event> = query_stream(reader, EventFilter::new().offset(2).limit(5), 3)
        .map(|r| r.unwrap())
        .collect()
        .await;
    let times: Vec<_> = capped.iter().map(|e| e.timestamp).collect();
    assert_eq!(times, (2..7).map(at).collect::<Vec<_>>());
}

async fn health_ok(store: Arc<dyn EventStore>) {
    store.health().await.unwrap();
}

/// Adapter from `Arc<dyn EventStore>` to `Arc<dyn EventReader>`.
struct StoreReader(Arc<dyn EventStore>);

#[async_trait::async_trait]
impl EventReader for StoreReader {
    async fn get(&self, event_id: &EventId) -> StorageResult<Event> {
        self.0.get(event_id).await
    }
    async fn query(&self, filter: &EventFilter) -> StorageResult<EventPage> {
        self.0.query(filter).await
    }
    async fn timeline(&self, key: &TimelineKey) -> StorageResult<Vec<Event>> {
        self.0.timeline(key).await
    }
    async fn count(&self, filter: &EventFilter) -> StorageResult<u64> {
        self.0.count(filter).await
    }
    async fn health(&self) -> StorageResult<()> {
        self.0.health().await
    }
}

macro_rules! event_contract {
    ($($name:ident),* $(,)?) => {
        mod memory_events {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(memory().await).await;
                }
            )*
        }
        mod surreal_events {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(surreal().await).await;
                }
            )*
        }
    };
}

event_contract!(
    append_then_get,
    duplicate_id_rejected,
    timeline_is_ordered_and_scoped,
    session_timeline,
    filters_combine,
    cursor_pagination_visits_every_event_once,
    offset_skips_leading_events,
    cleanup_respects_cutoff_and_pins,
    cleanup_by_retention_window,
    stream_pages_lazily,
    health_ok,
);

// ===========================================================================
// BenchmarkStore contract
// ===========================================================================

async fn memory_bench() -> Arc<dyn BenchmarkStore> {
    Arc::new(MemoryBenchmarkStore::new())
}

async fn surreal_bench() -> Arc<dyn BenchmarkStore> {
    let handle = SurrealHandle::in_memory().await.unwrap();
    Arc::new(handle.benchmark_store())
}

fn result(run_id: &RunId, task: &str, config: &str) -> BenchmarkResult {
    let now = Utc::now();
    BenchmarkResult {
        run_id: run_id.clone(),
        task_id: task.into(),
        config_name: config.into(),
        started_at: now,
        finished_at: now,
        success: true,
        score: 0.8,
        raw_output: serde_json::json!({"output": "ok"}),
        error: None,
        error_type: None,
        duration_ms: 12.0,
    }
}

fn record() -> BenchmarkRunRecord {
    BenchmarkRunRecord::new(
        RunId::new(),
        vec!["summarize_doc".into()],
        vec!["fast".into(), "accurate".into()],
        true,
        2,
    )
}

async fn run_lifecycle(store: Arc<dyn BenchmarkStore>) {
    let rec = record();
    let run_id = rec.run_id.clone();
    store.create_run(rec).await.unwrap();
    store
        .update_run_status(&run_id, BenchmarkRunStatus::Running)
        .await
        .unwrap();
    store
        .append_result(result(&run_id, "summarize_doc", "fast"))
        .await
        .unwrap();
    store
        .append_result(result(&run_id, "summarize_doc", "accurate"))
        .await
        .unwrap();
    store
        .update_run_status(&run_id, BenchmarkRunStatus::Completed)
        .await
        .unwrap();

    let got = store.get_run(&run_id).await.unwrap();
    assert_eq!(got.status, BenchmarkRunStatus::Completed);
    assert!(got.finished_at.is_some());
    assert_eq!(store.results_for_run(&run_id).await.unwrap().len(), 2);
}

async fn duplicate_result_rejected(store: Arc<dyn BenchmarkStore>) {
    let rec = record();
    let run_id = rec.run_id.clone();
    store.create_run(rec).await.unwrap();
    store
        .append_result(result(&run_id, "summarize_doc", "fast"))
        .await
        .unwrap();
    let err = store
        .append_result(result(&run_id, "summarize_doc", "fast"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Duplicate { .. }));
}

async fn terminal_run_is_immutable(store: Arc<dyn BenchmarkStore>) {
    let rec = record();
    let run_id = rec.run_id.clone();
    store.create_run(rec).await.unwrap();
    store
        .update_run_status(&run_id, BenchmarkRunStatus::Cancelled)
        .await
        .unwrap();

    let err = store
        .append_result(result(&run_id, "summarize_doc", "fast"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRunState { .. }));

    let err = store
        .update_run_status(&run_id, BenchmarkRunStatus::Running)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRunState { .. }));
}

async fn unknown_run_not_found(store: Arc<dyn BenchmarkStore>) {
    let err = store.get_run(&RunId::new()).await.unwrap_err();
    assert!(matches!(err, StorageError::RunNotFound { .. }));
    let err = store
        .append_result(result(&RunId::new(), "t", "c"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::RunNotFound { .. }));
}

async fn list_runs_newest_first(store: Arc<dyn BenchmarkStore>) {
    let first = record();
    let mut second = record();
    second.created_at = first.created_at + chrono::Duration::seconds(5);
    let (first_id, second_id) = (first.run_id.clone(), second.run_id.clone());
    store.create_run(first).await.unwrap();
    store.create_run(second).await.unwrap();

    let runs = store.list_runs().await.unwrap();
    let ids: Vec<RunId> = runs.into_iter().map(|r| r.run_id).collect();
    assert_eq!(ids, vec![second_id, first_id]);
}

macro_rules! bench_contract {
    ($($name:ident),* $(,)?) => {
        mod memory_bench {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(memory_bench().await).await;
                }
            )*
        }
        mod surreal_bench {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(surreal_bench().await).await;
                }
            )*
        }
    };
}

bench_contract!(
    run_lifecycle,
    duplicate_result_rejected,
    terminal_run_is_immutable,
    unknown_run_not_found,
    list_runs_newest_first,
);
