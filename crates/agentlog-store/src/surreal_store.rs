//! SurrealDB-backed EventStore and BenchmarkStore implementations
//!
//! Uses the row types in `schema` for persistence, converting to and from
//! `records` types at the boundary. Event filters compile to a single
//! parameterized `SELECT`; user input only ever reaches the query as a bound
//! variable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::records::{
    BenchmarkResult, BenchmarkRunRecord, BenchmarkRunStatus, Event, EventId, RunId,
};
use crate::schema::{CountRow, EventBody, EventIdRow, EventRow, ProbeRow, ResultRow, RunRow};
use crate::storage_traits::*;

/// Map a SurrealDB write error, recognizing unique-index violations.
fn write_err(key: String) -> impl FnOnce(surrealdb::Error) -> StorageError {
    move |e| {
        let msg = e.to_string();
        if msg.contains("already exists") || msg.contains("already contains") {
            StorageError::Duplicate { key }
        } else {
            StorageError::Backend(msg)
        }
    }
}

// ---------------------------------------------------------------------------
// Filter compilation
// ---------------------------------------------------------------------------

/// WHERE clause plus the variables it references.
#[derive(Debug, Default)]
struct Compiled {
    clauses: Vec<&'static str>,
    binds: Vec<(&'static str, Value)>,
}

impl Compiled {
    fn push(&mut self, clause: &'static str, name: &'static str, value: Value) {
        self.clauses.push(clause);
        self.binds.push((name, value));
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn compile(filter: &EventFilter, with_cursor: bool) -> Compiled {
    let mut c = Compiled::default();
    if let Some(since) = filter.since {
        c.push("ts_us >= $since_us", "since_us", since.timestamp_micros().into());
    }
    if let Some(until) = filter.until {
        c.push("ts_us < $until_us", "until_us", until.timestamp_micros().into());
    }
    if let Some(t) = filter.event_type {
        c.push("event_type = $event_type", "event_type", t.as_str().into());
    }
    if let Some(level) = filter.level {
        c.push("level = $level", "level", level.as_str().into());
    }
    if let Some(min) = filter.min_level {
        c.push("level_rank >= $min_rank", "min_rank", min.rank().into());
    }
    if let Some(agent) = &filter.agent_id {
        c.push("agent_id = $agent_id", "agent_id", agent.clone().into());
    }
    if let Some(session) = &filter.session_id {
        c.push("session_id = $session_id", "session_id", session.clone().into());
    }
    if let Some(run) = &filter.run_id {
        c.push("run_key = $run_key", "run_key", run.clone().into());
    }
    if let Some(text) = &filter.text {
        c.push(
            "string::contains(message_lc, $text)",
            "text",
            text.to_lowercase().into(),
        );
    }
    if with_cursor {
        if let Some(cursor) = &filter.cursor {
            c.push(
                "(ts_us > $c_ts OR (ts_us = $c_ts AND event_id > $c_id))",
                "c_ts",
                cursor.timestamp_us.into(),
            );
            c.binds.push(("c_id", cursor.event_id.clone().into()));
        }
    }
    c
}

// ---------------------------------------------------------------------------
// SurrealEventStore
// ---------------------------------------------------------------------------

/// SurrealDB-backed implementation of [`EventStore`].
pub struct SurrealEventStore {
    db: Surreal<Any>,
    pins: RunPins,
}

impl SurrealEventStore {
    pub fn new(db: Surreal<Any>) -> Self {
        Self {
            db,
            pins: RunPins::new(),
        }
    }

    /// Run an event select and decode the bodies.
    async fn select_events(&self, compiled: Compiled, tail: String) -> StorageResult<Vec<Event>> {
        let sql = format!(
            "SELECT body, ts_us, event_id FROM events{} ORDER BY ts_us ASC, event_id ASC{}",
            compiled.where_sql(),
            tail
        );
        let mut query = self.db.query(sql);
        for (name, value) in compiled.binds {
            query = query.bind((name, value));
        }
        let mut res = query.await?.check()?;
        let rows: Vec<EventBody> = res.take(0)?;
        rows.into_iter().map(EventBody::decode).collect()
    }
}

#[async_trait]
impl EventReader for SurrealEventStore {
    async fn get(&self, event_id: &EventId) -> StorageResult<Event> {
        let id_owned = event_id.0.clone();
        let mut res = self
            .db
            .query("SELECT body FROM events WHERE event_id = $id")
            .bind(("id", id_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<EventBody> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::EventNotFound {
                event_id: event_id.0.clone(),
            })?
            .decode()
    }

    #[instrument(skip_all, fields(limit = ?filter.limit))]
    async fn query(&self, filter: &EventFilter) -> StorageResult<EventPage> {
        let mut tail = String::new();
        if let Some(limit) = filter.limit {
            tail.push_str(&format!(" LIMIT {}", limit.saturating_add(1)));
        }
        if filter.offset > 0 {
            tail.push_str(&format!(" START {}", filter.offset));
        }
        let events = self.select_events(compile(filter, true), tail).await?;
        Ok(EventPage::from_candidates(events, filter.limit))
    }

    #[instrument(skip(self))]
    async fn timeline(&self, key: &TimelineKey) -> StorageResult<Vec<Event>> {
        self.select_events(compile(&key.to_filter(), false), String::new())
            .await
    }

    async fn count(&self, filter: &EventFilter) -> StorageResult<u64> {
        let compiled = compile(filter, false);
        let sql = format!(
            "SELECT count() AS total FROM events{} GROUP ALL",
            compiled.where_sql()
        );
        let mut query = self.db.query(sql);
        for (name, value) in compiled.binds {
            query = query.bind((name, value));
        }
        let mut res = query.await?.check()?;
        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.total.max(0) as u64).unwrap_or(0))
    }

    async fn health(&self) -> StorageResult<()> {
        let probe_id = uuid::Uuid::new_v4().to_string();
        let _created: Option<ProbeRow> = self
            .db
            .create(("health_probe", probe_id.clone()))
            .content(ProbeRow {
                checked_us: Utc::now().timestamp_micros(),
            })
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let _deleted: Option<ProbeRow> = self
            .db
            .delete(("health_probe", probe_id))
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for SurrealEventStore {
    #[instrument(skip(self, event), fields(event_id = %event.event_id))]
    async fn append(&self, event: Event) -> StorageResult<()> {
        let row = EventRow::from_event(&event)?;
        let id = row.event_id.clone();
        debug!(event_id = %id, event_type = %event.event_type, "appending event");

        let _created: Option<EventRow> = self
            .db
            .create(("events", id.clone()))
            .content(row)
            .await
            .map_err(write_err(format!("event:{id}")))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let pinned = self.pins.snapshot();
        let mut res = self
            .db
            .query(
                "DELETE events WHERE ts_us < $cutoff AND run_key NOTINSIDE $pinned RETURN BEFORE",
            )
            .bind(("cutoff", cutoff.timestamp_micros()))
            .bind(("pinned", pinned))
            .await?
            .check()?;
        let deleted: Vec<EventIdRow> = res.take(0)?;
        Ok(deleted.len() as u64)
    }

    async fn pin_run(&self, run_id: &RunId) -> StorageResult<()> {
        self.pins.pin(run_id.as_str());
        Ok(())
    }

    async fn unpin_run(&self, run_id: &RunId) -> StorageResult<()> {
        self.pins.unpin(run_id.as_str());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SurrealBenchmarkStore
// ---------------------------------------------------------------------------

/// SurrealDB-backed implementation of [`BenchmarkStore`].
pub struct SurrealBenchmarkStore {
    db: Surreal<Any>,
}

impl SurrealBenchmarkStore {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Fetch a run row by ID, returning the DB row or RunNotFound.
    async fn fetch_run(&self, rid: &str) -> StorageResult<RunRow> {
        let rid_owned = rid.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM benchmark_runs WHERE run_id = $rid")
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<RunRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: rid.to_string(),
            })
    }

    /// Fetch a run and verify it is not in a terminal state.
    async fn fetch_open(&self, rid: &str) -> StorageResult<BenchmarkRunRecord> {
        let record = self.fetch_run(rid).await?.decode()?;
        if record.status.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: rid.to_string(),
                status: record.status.to_string(),
                expected: "non-terminal".to_string(),
            });
        }
        Ok(record)
    }
}

#[async_trait]
impl BenchmarkStore for SurrealBenchmarkStore {
    #[instrument(skip(self, record), fields(run_id = %record.run_id))]
    async fn create_run(&self, record: BenchmarkRunRecord) -> StorageResult<()> {
        let row = RunRow::from_record(&record)?;
        debug!(run_id = %record.run_id, "creating benchmark run");

        let _created: Option<RunRow> = self
            .db
            .create(("benchmark_runs", record.run_id.0.clone()))
            .content(row)
            .await
            .map_err(write_err(format!("run:{}", record.run_id)))?;

        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: &RunId,
        status: BenchmarkRunStatus,
    ) -> StorageResult<()> {
        let mut record = self.fetch_open(&run_id.0).await?;
        record.status = status;
        if status.is_terminal() {
            record.finished_at = Some(Utc::now());
        }
        let updated = RunRow::from_record(&record)?;
        let rid_owned = run_id.0.clone();

        self.db
            .query("UPDATE benchmark_runs CONTENT $row WHERE run_id = $rid")
            .bind(("row", updated))
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .check()?;

        Ok(())
    }

    #[instrument(skip(self, result), fields(run_id = %result.run_id, task_id = %result.task_id))]
    async fn append_result(&self, result: BenchmarkResult) -> StorageResult<()> {
        self.fetch_open(&result.run_id.0).await?;
        let key = format!(
            "result:{}/{}/{}",
            result.run_id, result.task_id, result.config_name
        );

        let mut res = self
            .db
            .query(
                "SELECT * FROM benchmark_results \
                 WHERE run_id = $rid AND task_id = $tid AND config_name = $cfg",
            )
            .bind(("rid", result.run_id.0.clone()))
            .bind(("tid", result.task_id.clone()))
            .bind(("cfg", result.config_name.clone()))
            .await?;
        let existing: Vec<ResultRow> = res.take(0)?;
        if !existing.is_empty() {
            return Err(StorageError::Duplicate { key });
        }

        let row = ResultRow::from_result(&result)?;
        let _created: Option<ResultRow> = self
            .db
            .create("benchmark_results")
            .content(row)
            .await
            .map_err(write_err(key))?;

        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<BenchmarkRunRecord> {
        self.fetch_run(&run_id.0).await?.decode()
    }

    async fn list_runs(&self) -> StorageResult<Vec<BenchmarkRunRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM benchmark_runs ORDER BY created_us DESC")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows: Vec<RunRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.iter().map(RunRow::decode).collect()
    }

    async fn results_for_run(&self, run_id: &RunId) -> StorageResult<Vec<BenchmarkResult>> {
        self.fetch_run(&run_id.0).await?;

        let rid_owned = run_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM benchmark_results WHERE run_id = $rid ORDER BY started_us ASC")
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows: Vec<ResultRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.iter().map(ResultRow::decode).collect()
    }
}
