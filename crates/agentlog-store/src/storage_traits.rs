//! Storage trait definitions for agentlog
//!
//! These traits define the core storage abstractions:
//! - `EventReader`: read side of the event store (query, timeline, lookup)
//! - `EventStore`: write side (append, retention cleanup, run pinning)
//! - `BenchmarkStore`: benchmark run and result persistence
//!
//! All traits are async and backend-agnostic. The lock-striped in-memory
//! backend lives in [`crate::memory`], the SurrealDB backend in
//! [`crate::surreal_store`].

use std::collections::HashMap;
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::records::{
    BenchmarkResult, BenchmarkRunRecord, BenchmarkRunStatus, Event, EventId, EventType, LogLevel,
    RunId,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Page size used by [`query_stream`] when the caller does not pick one.
pub const DEFAULT_STREAM_PAGE: usize = 500;

// ---------------------------------------------------------------------------
// Query model
// ---------------------------------------------------------------------------

/// Keyset pagination cursor: the position of the last event already returned.
///
/// Rendered as `<timestamp_us>:<event_id>`; clients treat it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    pub timestamp_us: i64,
    pub event_id: String,
}

impl Cursor {
    pub fn after(event: &Event) -> Self {
        Self {
            timestamp_us: event.timestamp_us(),
            event_id: event.event_id.0.clone(),
        }
    }

    pub fn key(&self) -> (i64, String) {
        (self.timestamp_us, self.event_id.clone())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.timestamp_us, self.event_id)
    }
}

impl FromStr for Cursor {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts, id) = s
            .split_once(':')
            .ok_or_else(|| StorageError::InvalidCursor(s.to_string()))?;
        let timestamp_us = ts
            .parse::<i64>()
            .map_err(|_| StorageError::InvalidCursor(s.to_string()))?;
        if id.is_empty() {
            return Err(StorageError::InvalidCursor(s.to_string()));
        }
        Ok(Cursor {
            timestamp_us,
            event_id: id.to_string(),
        })
    }
}

impl Serialize for Cursor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Event query filter.
///
/// `since` is inclusive, `until` exclusive. `text` is a case-insensitive
/// substring match on `message`. Results are ordered by
/// `(timestamp, event_id)` ascending so cursors are stable; `limit: None`
/// means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub event_type: Option<EventType>,
    pub level: Option<LogLevel>,
    pub min_level: Option<LogLevel>,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
    pub cursor: Option<Cursor>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = Some(level);
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

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Full predicate check, including time range and cursor position.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp >= until {
                return false;
            }
        }
        if let Some(cursor) = &self.cursor {
            if event.sort_key() <= cursor.key() {
                return false;
            }
        }
        self.matches_attributes(event)
    }

    /// Predicate check on everything except time range and cursor.
    pub fn matches_attributes(&self, event: &Event) -> bool {
        if self.event_type.is_some_and(|t| t != event.event_type) {
            return false;
        }
        if self.level.is_some_and(|l| l != event.level) {
            return false;
        }
        if self.min_level.is_some_and(|l| event.level < l) {
            return false;
        }
        if !opt_eq(&self.agent_id, &event.agent_id)
            || !opt_eq(&self.session_id, &event.session_id)
            || !opt_eq(&self.run_id, &event.run_id)
        {
            return false;
        }
        if let Some(text) = &self.text {
            if !event
                .message
                .to_lowercase()
                .contains(&text.to_lowercase())
            {
                return false;
            }
        }
        true
    }

    /// Lower/upper key bounds implied by `since`, `until` and `cursor`.
    ///
    /// Returns `None` when the range is empty.
    pub fn key_bounds(&self) -> Option<(Bound<(i64, String)>, Bound<(i64, String)>)> {
        let since = self
            .since
            .map(|s| (s.timestamp_micros(), String::new()));
        let lower = match (since, &self.cursor) {
            (Some(s), Some(c)) if c.key() >= s => Bound::Excluded(c.key()),
            (Some(s), _) => Bound::Included(s),
            (None, Some(c)) => Bound::Excluded(c.key()),
            (None, None) => Bound::Unbounded,
        };
        let upper = match self.until {
            Some(u) => Bound::Excluded((u.timestamp_micros(), String::new())),
            None => Bound::Unbounded,
        };

        let empty = match (&lower, &upper) {
            (Bound::Included(l), Bound::Excluded(u)) => l >= u,
            (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
            _ => false,
        };
        if empty {
            None
        } else {
            Some((lower, upper))
        }
    }
}

fn opt_eq(want: &Option<String>, have: &Option<String>) -> bool {
    match want {
        Some(w) => have.as_deref() == Some(w.as_str()),
        None => true,
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<Event>,
    /// Present when more matching events exist after this page.
    pub next_cursor: Option<Cursor>,
}

impl EventPage {
    /// Build a page from an ordered candidate list that holds at most one
    /// more element than `limit`, so the presence of a next page is known
    /// without a second query.
    pub fn from_candidates(mut events: Vec<Event>, limit: Option<usize>) -> Self {
        let next_cursor = match limit {
            Some(limit) if events.len() > limit => {
                events.truncate(limit);
                events.last().map(Cursor::after)
            }
            _ => None,
        };
        Self {
            events,
            next_cursor,
        }
    }
}

/// Whose timeline to read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKey {
    Agent(String),
    Session(String),
}

impl TimelineKey {
    pub fn to_filter(&self) -> EventFilter {
        match self {
            TimelineKey::Agent(id) => EventFilter::new().agent(id.clone()),
            TimelineKey::Session(id) => EventFilter::new().session(id.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Run pinning
// ---------------------------------------------------------------------------

/// Reference-counted set of benchmark runs whose events are exempt from
/// retention cleanup until the run is finalized.
#[derive(Debug, Default)]
pub struct RunPins {
    pins: Mutex<HashMap<String, usize>>,
}

impl RunPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(&self, run_id: &str) {
        let mut pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
        *pins.entry(run_id.to_string()).or_insert(0) += 1;
    }

    pub fn unpin(&self, run_id: &str) {
        let mut pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = pins.get_mut(run_id) {
            *count -= 1;
            if *count == 0 {
                pins.remove(run_id);
            }
        }
    }

    pub fn is_pinned(&self, run_id: &str) -> bool {
        let pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
        pins.contains_key(run_id)
    }

    /// Whether `event` is protected from cleanup.
    pub fn protects(&self, event: &Event) -> bool {
        event.run_id.as_deref().is_some_and(|r| self.is_pinned(r))
    }

    pub fn snapshot(&self) -> Vec<String> {
        let pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = pins.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// ---------------------------------------------------------------------------
// Event storage
// ---------------------------------------------------------------------------

/// Read side of the event store.
#[async_trait]
pub trait EventReader: Send + Sync {
    /// Fetch one event by id. Returns `StorageError::EventNotFound` if absent.
    async fn get(&self, event_id: &EventId) -> StorageResult<Event>;

    /// Return one page of events matching `filter`, ordered by
    /// `(timestamp, event_id)` ascending.
    async fn query(&self, filter: &EventFilter) -> StorageResult<EventPage>;

    /// All events for an agent or session, ordered by timestamp ascending with
    /// ties broken by event id.
    async fn timeline(&self, key: &TimelineKey) -> StorageResult<Vec<Event>>;

    /// Number of events matching `filter` (offset, limit and cursor ignored).
    async fn count(&self, filter: &EventFilter) -> StorageResult<u64>;

    /// Check that the backend can accept writes.
    async fn health(&self) -> StorageResult<()>;
}

/// Durable, indexed event store.
///
/// Guarantees:
/// - `append` is atomic: the event is stored completely or not at all.
/// - `append` is safe for concurrent callers.
/// - Stored events are never modified; cleanup only deletes.
#[async_trait]
pub trait EventStore: EventReader {
    /// Persist one event. Fails with `StorageError::Duplicate` if the id exists.
    async fn append(&self, event: Event) -> StorageResult<()>;

    /// Delete events strictly older than `cutoff`, except events belonging to
    /// a pinned benchmark run. Returns the number deleted.
    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;

    /// Exempt a benchmark run's events from cleanup until `unpin_run`.
    async fn pin_run(&self, run_id: &RunId) -> StorageResult<()>;

    /// Release a pin taken by `pin_run`.
    async fn unpin_run(&self, run_id: &RunId) -> StorageResult<()>;

    /// Delete events older than `now - retention`.
    async fn cleanup(&self, retention: Duration) -> StorageResult<u64> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| StorageError::Backend(format!("retention out of range: {e}")))?;
        self.cleanup_before(Utc::now() - retention).await
    }
}

/// Lazily page through every event matching `filter`.
///
/// `filter.limit` caps the total number of events yielded; `filter.offset`
/// applies once, before the first page. Each call builds an independent
/// stream; there is no shared cursor state between calls.
pub fn query_stream(
    reader: Arc<dyn EventReader>,
    filter: EventFilter,
    page_size: usize,
) -> BoxStream<'static, StorageResult<Event>> {
    struct PageState {
        reader: Arc<dyn EventReader>,
        filter: EventFilter,
        remaining: Option<usize>,
        done: bool,
    }

    let page_size = page_size.max(1);
    let state = PageState {
        reader,
        remaining: filter.limit,
        filter,
        done: false,
    };

    stream::unfold(state, move |mut st| async move {
        if st.done {
            return None;
        }
        let take = match st.remaining {
            Some(0) => return None,
            Some(r) => r.min(page_size),
            None => page_size,
        };

        let mut page_filter = st.filter.clone();
        page_filter.limit = Some(take);

        match st.reader.query(&page_filter).await {
            Ok(page) => {
                st.filter.offset = 0;
                st.filter.cursor = page.next_cursor.clone();
                if st.filter.cursor.is_none() {
                    st.done = true;
                }
                if let Some(r) = st.remaining.as_mut() {
                    *r -= page.events.len().min(*r);
                }
                Some((Ok(page.events), st))
            }
            Err(e) => {
                st.done = true;
                Some((Err(e), st))
            }
        }
    })
    .flat_map(|page: StorageResult<Vec<Event>>| {
        let items: Vec<StorageResult<Event>> = match page {
            Ok(events) => events.into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        stream::iter(items)
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// Benchmark storage
// ---------------------------------------------------------------------------

/// Benchmark run and result persistence.
///
/// Guarantees:
/// - Exactly one result per `(run_id, task_id, config_name)`.
/// - Results are append-only and may only be added while the run is not
///   terminal.
/// - A run in a terminal state (`Completed | Failed | Cancelled`) is immutable.
#[async_trait]
pub trait BenchmarkStore: Send + Sync {
    /// Persist a new run record. Fails with `Duplicate` if the id exists.
    async fn create_run(&self, record: BenchmarkRunRecord) -> StorageResult<()>;

    /// Move a run to `status`. Fails with `InvalidRunState` if the run is
    /// already terminal.
    async fn update_run_status(
        &self,
        run_id: &RunId,
        status: BenchmarkRunStatus,
    ) -> StorageResult<()>;

    /// Append one result to a non-terminal run.
    async fn append_result(&self, result: BenchmarkResult) -> StorageResult<()>;

    /// Retrieve a run record by id.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<BenchmarkRunRecord>;

    /// List all runs, newest first.
    async fn list_runs(&self) -> StorageResult<Vec<BenchmarkRunRecord>>;

    /// All results recorded for a run.
    async fn results_for_run(&self, run_id: &RunId) -> StorageResult<Vec<BenchmarkResult>>;
}
