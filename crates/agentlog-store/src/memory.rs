//! In-memory backends for the storage traits.
//!
//! `MemoryEventStore` is lock-striped: events are spread across a fixed number
//! of partitions by hashing the event id, so concurrent appends rarely contend
//! on the same lock. Each partition keeps a time-ordered primary map plus
//! secondary indexes on event type, agent, session and run.
//!
//! `MemoryBenchmarkStore` is a plain `Mutex<HashMap>` ledger.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::records::{
    BenchmarkResult, BenchmarkRunRecord, BenchmarkRunStatus, Event, EventId, EventType, RunId,
};
use crate::storage_traits::*;

/// Number of lock stripes in [`MemoryEventStore`].
pub const STRIPES: usize = 16;

type Key = (i64, String);
type KeyRange = (Bound<Key>, Bound<Key>);

// ---------------------------------------------------------------------------
// MemoryEventStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Partition {
    by_time: BTreeMap<Key, Event>,
    ids: HashMap<String, i64>,
    by_type: HashMap<EventType, BTreeSet<Key>>,
    by_agent: HashMap<String, BTreeSet<Key>>,
    by_session: HashMap<String, BTreeSet<Key>>,
    by_run: HashMap<String, BTreeSet<Key>>,
}

enum Candidates<'a> {
    All,
    Indexed(&'a BTreeSet<Key>),
    Empty,
}

impl Partition {
    fn insert(&mut self, event: Event) {
        let key = event.sort_key();
        self.ids.insert(event.event_id.0.clone(), key.0);
        self.by_type
            .entry(event.event_type)
            .or_default()
            .insert(key.clone());
        if let Some(agent) = &event.agent_id {
            self.by_agent
                .entry(agent.clone())
                .or_default()
                .insert(key.clone());
        }
        if let Some(session) = &event.session_id {
            self.by_session
                .entry(session.clone())
                .or_default()
                .insert(key.clone());
        }
        if let Some(run) = &event.run_id {
            self.by_run.entry(run.clone()).or_default().insert(key.clone());
        }
        self.by_time.insert(key, event);
    }

    fn remove(&mut self, key: &Key) -> Option<Event> {
        let event = self.by_time.remove(key)?;
        self.ids.remove(&event.event_id.0);
        remove_from(&mut self.by_type, &event.event_type, key);
        if let Some(agent) = &event.agent_id {
            remove_from(&mut self.by_agent, agent, key);
        }
        if let Some(session) = &event.session_id {
            remove_from(&mut self.by_session, session, key);
        }
        if let Some(run) = &event.run_id {
            remove_from(&mut self.by_run, run, key);
        }
        Some(event)
    }

    /// Pick the narrowest secondary index the filter allows.
    fn candidates<'a>(&'a self, filter: &EventFilter) -> Candidates<'a> {
        let lookup = |index: Option<&'a BTreeSet<Key>>| match index {
            Some(set) => Candidates::Indexed(set),
            None => Candidates::Empty,
        };
        if let Some(agent) = &filter.agent_id {
            return lookup(self.by_agent.get(agent));
        }
        if let Some(session) = &filter.session_id {
            return lookup(self.by_session.get(session));
        }
        if let Some(run) = &filter.run_id {
            return lookup(self.by_run.get(run));
        }
        if let Some(t) = &filter.event_type {
            return lookup(self.by_type.get(t));
        }
        Candidates::All
    }

    /// Matching events in key order, at most `want` of them.
    fn matching(&self, filter: &EventFilter, range: &KeyRange, want: Option<usize>) -> Vec<Event> {
        let want = want.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        if want == 0 {
            return out;
        }

        let keys: Box<dyn Iterator<Item = &Key> + '_> = match self.candidates(filter) {
            Candidates::Empty => return out,
            Candidates::Indexed(set) => Box::new(set.range(range.clone())),
            Candidates::All => Box::new(self.by_time.range(range.clone()).map(|(k, _)| k)),
        };

        for key in keys {
            if let Some(event) = self.by_time.get(key) {
                if filter.matches_attributes(event) {
                    out.push(event.clone());
                    if out.len() >= want {
                        break;
                    }
                }
            }
        }
        out
    }
}

fn remove_from<K: Hash + Eq>(index: &mut HashMap<K, BTreeSet<Key>>, k: &K, key: &Key) {
    if let Some(set) = index.get_mut(k) {
        set.remove(key);
        if set.is_empty() {
            index.remove(k);
        }
    }
}

/// Lock-striped in-memory event store.
#[derive(Debug)]
pub struct MemoryEventStore {
    stripes: Vec<RwLock<Partition>>,
    pins: RunPins,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| RwLock::new(Partition::default())).collect(),
            pins: RunPins::new(),
        }
    }

    /// Total number of stored events.
    pub fn len(&self) -> usize {
        self.stripes
            .iter()
            .map(|s| s.read().unwrap_or_else(|e| e.into_inner()).by_time.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stripe_for(&self, event_id: &str) -> &RwLock<Partition> {
        let mut hasher = DefaultHasher::new();
        event_id.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    /// Merge per-stripe candidates into one ordered list.
    fn collect(&self, filter: &EventFilter, want: Option<usize>) -> Vec<Event> {
        let Some(range) = filter.key_bounds() else {
            return Vec::new();
        };
        let mut merged: Vec<Event> = Vec::new();
        for stripe in &self.stripes {
            let part = stripe.read().unwrap_or_else(|e| e.into_inner());
            merged.extend(part.matching(filter, &range, want));
        }
        merged.sort_by_key(|e| e.sort_key());
        if let Some(want) = want {
            merged.truncate(want);
        }
        merged
    }
}

#[async_trait]
impl EventReader for MemoryEventStore {
    async fn get(&self, event_id: &EventId) -> StorageResult<Event> {
        let part = self
            .stripe_for(event_id.as_str())
            .read()
            .unwrap_or_else(|e| e.into_inner());
        part.ids
            .get(event_id.as_str())
            .and_then(|ts| part.by_time.get(&(*ts, event_id.0.clone())))
            .cloned()
            .ok_or_else(|| StorageError::EventNotFound {
                event_id: event_id.0.clone(),
            })
    }

    async fn query(&self, filter: &EventFilter) -> StorageResult<EventPage> {
        // One extra candidate tells us whether another page exists.
        let want = filter
            .limit
            .map(|l| filter.offset.saturating_add(l).saturating_add(1));
        let candidates: Vec<Event> = self
            .collect(filter, want)
            .into_iter()
            .skip(filter.offset)
            .collect();
        Ok(EventPage::from_candidates(candidates, filter.limit))
    }

    async fn timeline(&self, key: &TimelineKey) -> StorageResult<Vec<Event>> {
        Ok(self.collect(&key.to_filter(), None))
    }

    async fn count(&self, filter: &EventFilter) -> StorageResult<u64> {
        let mut unpaged = filter.clone();
        unpaged.cursor = None;
        let Some(range) = unpaged.key_bounds() else {
            return Ok(0);
        };
        let mut total = 0u64;
        for stripe in &self.stripes {
            let part = stripe.read().unwrap_or_else(|e| e.into_inner());
            total += part.matching(&unpaged, &range, None).len() as u64;
        }
        Ok(total)
    }

    async fn health(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: Event) -> StorageResult<()> {
        let mut part = self
            .stripe_for(event.event_id.as_str())
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if part.ids.contains_key(event.event_id.as_str()) {
            return Err(StorageError::Duplicate {
                key: format!("event:{}", event.event_id),
            });
        }
        part.insert(event);
        Ok(())
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let upper: Key = (cutoff.timestamp_micros(), String::new());
        let mut removed = 0u64;
        for stripe in &self.stripes {
            let mut part = stripe.write().unwrap_or_else(|e| e.into_inner());
            let doomed: Vec<Key> = part
                .by_time
                .range(..upper.clone())
                .filter(|(_, event)| !self.pins.protects(event))
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                if part.remove(&key).is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
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
// MemoryBenchmarkStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RunState {
    record: BenchmarkRunRecord,
    results: Vec<BenchmarkResult>,
}

/// In-memory benchmark ledger backed by a `HashMap<RunId, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryBenchmarkStore {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryBenchmarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_terminal(record: &BenchmarkRunRecord) -> StorageResult<()> {
    if record.status.is_terminal() {
        return Err(StorageError::InvalidRunState {
            run_id: record.run_id.0.clone(),
            status: record.status.to_string(),
            expected: "non-terminal".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl BenchmarkStore for MemoryBenchmarkStore {
    async fn create_run(&self, record: BenchmarkRunRecord) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if runs.contains_key(record.run_id.as_str()) {
            return Err(StorageError::Duplicate {
                key: format!("run:{}", record.run_id),
            });
        }
        runs.insert(
            record.run_id.0.clone(),
            RunState {
                record,
                results: Vec::new(),
            },
        );
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: &RunId,
        status: BenchmarkRunStatus,
    ) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let state = runs
            .get_mut(run_id.as_str())
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        not_terminal(&state.record)?;
        state.record.status = status;
        if status.is_terminal() {
            state.record.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn append_result(&self, result: BenchmarkResult) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let state = runs
            .get_mut(result.run_id.as_str())
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: result.run_id.0.clone(),
            })?;
        not_terminal(&state.record)?;
        let exists = state
            .results
            .iter()
            .any(|r| r.task_id == result.task_id && r.config_name == result.config_name);
        if exists {
            return Err(StorageError::Duplicate {
                key: format!(
                    "result:{}/{}/{}",
                    result.run_id, result.task_id, result.config_name
                ),
            });
        }
        state.results.push(result);
        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<BenchmarkRunRecord> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.get(run_id.as_str())
            .map(|s| s.record.clone())
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn list_runs(&self) -> StorageResult<Vec<BenchmarkRunRecord>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<BenchmarkRunRecord> =
            runs.values().map(|s| s.record.clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn results_for_run(&self, run_id: &RunId) -> StorageResult<Vec<BenchmarkResult>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.get(run_id.as_str())
            .map(|s| s.results.clone())
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::LogLevel;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn events_spread_across_stripes() {
        let store = MemoryEventStore::new();
        for i in 0..200 {
            store
                .append(Event::new(EventType::System, LogLevel::Info, "e").at(at(i)))
                .await
                .unwrap();
        }
        let used = store
            .stripes
            .iter()
            .filter(|s| !s.read().unwrap().by_time.is_empty())
            .count();
        assert!(used > 1);
        assert_eq!(store.len(), 200);
    }

    #[tokio::test]
    async fn unknown_agent_short_circuits() {
        let store = MemoryEventStore::new();
        store
            .append(Event::new(EventType::System, LogLevel::Info, "e").with_agent("a1"))
            .await
            .unwrap();
        let page = store
            .query(&EventFilter::new().agent("nobody"))
            .await
            .unwrap();
        assert!(page.events.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_secondary_index_entries() {
        let store = MemoryEventStore::new();
        store
            .append(
                Event::new(EventType::ToolCall, LogLevel::Info, "old")
                    .with_agent("a1")
                    .at(at(0)),
            )
            .await
            .unwrap();
        assert_eq!(store.cleanup_before(at(10)).await.unwrap(), 1);

        for stripe in &store.stripes {
            let part = stripe.read().unwrap();
            assert!(part.by_agent.is_empty());
            assert!(part.by_type.is_empty());
            assert!(part.ids.is_empty());
        }
    }
}
