//! Row shapes for the agentlog SurrealDB tables
//!
//! Tables:
//! - events: one row per stored event, indexed columns plus the full JSON body
//! - benchmark_runs: run records
//! - benchmark_results: one row per (run, task, configuration)
//!
//! Timestamps are stored as epoch microseconds so ordering and range filters
//! compare plain integers.

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::records::{BenchmarkResult, BenchmarkRunRecord, Event};
use crate::storage_traits::StorageResult;

/// Indexed projection of an [`Event`].
///
/// The authoritative copy is `body`; the other columns exist for filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EventRow {
    pub event_id: String,
    pub ts_us: i64,
    pub event_type: String,
    pub level: String,
    pub level_rank: i64,
    pub message_lc: String,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    /// Empty when the event belongs to no benchmark run.
    pub run_key: String,
    pub body: String,
}

impl EventRow {
    pub fn from_event(event: &Event) -> StorageResult<Self> {
        Ok(Self {
            event_id: event.event_id.0.clone(),
            ts_us: event.timestamp_us(),
            event_type: event.event_type.as_str().to_string(),
            level: event.level.as_str().to_string(),
            level_rank: event.level.rank(),
            message_lc: event.message.to_lowercase(),
            agent_id: event.agent_id.clone(),
            session_id: event.session_id.clone(),
            run_key: event.run_id.clone().unwrap_or_default(),
            body: serde_json::to_string(event)?,
        })
    }
}

/// Projection returned by event selects.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EventBody {
    pub body: String,
}

impl EventBody {
    pub fn decode(self) -> StorageResult<Event> {
        serde_json::from_str(&self.body).map_err(|e| StorageError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CountRow {
    pub total: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EventIdRow {
    #[allow(dead_code)]
    pub event_id: String,
}

/// Persisted benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RunRow {
    pub run_id: String,
    pub status: String,
    pub created_us: i64,
    pub body: String,
}

impl RunRow {
    pub fn from_record(record: &BenchmarkRunRecord) -> StorageResult<Self> {
        Ok(Self {
            run_id: record.run_id.0.clone(),
            status: record.status.as_str().to_string(),
            created_us: record.created_at.timestamp_micros(),
            body: serde_json::to_string(record)?,
        })
    }

    pub fn decode(&self) -> StorageResult<BenchmarkRunRecord> {
        serde_json::from_str(&self.body).map_err(|e| StorageError::Decode(e.to_string()))
    }
}

/// Persisted benchmark result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResultRow {
    pub run_id: String,
    pub task_id: String,
    pub config_name: String,
    pub started_us: i64,
    pub body: String,
}

impl ResultRow {
    pub fn from_result(result: &BenchmarkResult) -> StorageResult<Self> {
        Ok(Self {
            run_id: result.run_id.0.clone(),
            task_id: result.task_id.clone(),
            config_name: result.config_name.clone(),
            started_us: result.started_at.timestamp_micros(),
            body: serde_json::to_string(result)?,
        })
    }

    pub fn decode(&self) -> StorageResult<BenchmarkResult> {
        serde_json::from_str(&self.body).map_err(|e| StorageError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ProbeRow {
    pub checked_us: i64,
}
