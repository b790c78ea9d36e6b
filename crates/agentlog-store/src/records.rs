//! Persisted record types: events, benchmark results and benchmark runs.
//!
//! These are the canonical shapes the storage layer owns. Normalization and
//! sanitization of raw producer input happens in `agentlog-core`; by the time a
//! value reaches this crate it is already a well-formed [`Event`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Free-form, string-keyed payload (input, output, metadata).
///
/// A `BTreeMap` keeps key order canonical so a stored event serializes to the
/// same bytes every time.
pub type Payload = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique, time-ordered event identifier (UUIDv7 string).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a new time-ordered id.
    pub fn new() -> Self {
        EventId(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a benchmark run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What kind of operational occurrence an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentStart,
    AgentStop,
    AgentDecision,
    ToolCall,
    ToolResult,
    CodeExecution,
    ModelCall,
    UserInteraction,
    Performance,
    Error,
    System,
    BenchmarkStart,
    BenchmarkStop,
    Custom,
}

impl EventType {
    pub const ALL: [EventType; 14] = [
        EventType::AgentStart,
        EventType::AgentStop,
        EventType::AgentDecision,
        EventType::ToolCall,
        EventType::ToolResult,
        EventType::CodeExecution,
        EventType::ModelCall,
        EventType::UserInteraction,
        EventType::Performance,
        EventType::Error,
        EventType::System,
        EventType::BenchmarkStart,
        EventType::BenchmarkStop,
        EventType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentStart => "agent_start",
            EventType::AgentStop => "agent_stop",
            EventType::AgentDecision => "agent_decision",
            EventType::ToolCall => "tool_call",
            EventType::ToolResult => "tool_result",
            EventType::CodeExecution => "code_execution",
            EventType::ModelCall => "model_call",
            EventType::UserInteraction => "user_interaction",
            EventType::Performance => "performance",
            EventType::Error => "error",
            EventType::System => "system",
            EventType::BenchmarkStart => "benchmark_start",
            EventType::BenchmarkStop => "benchmark_stop",
            EventType::Custom => "custom",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| StorageError::Decode(format!("unknown event type: {s}")))
    }
}

/// Severity of an event. Ordered: `Debug < Info < Warning < Error < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    /// Numeric rank used for `min_level` filtering in backends.
    pub fn rank(&self) -> i64 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
            LogLevel::Critical => 4,
        }
    }

    /// Whether this level carries failure information.
    pub fn is_failure(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" | "fatal" => Ok(LogLevel::Critical),
            other => Err(StorageError::Decode(format!("unknown log level: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One immutable structured record of an operational occurrence.
///
/// The store never updates an event after `append`; the only mutation it
/// performs is deletion through retention cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub level: LogLevel,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Shared by the entry and exit events of one instrumented call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Benchmark run that produced this event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    #[serde(default)]
    pub input_data: Payload,
    #[serde(default)]
    pub output_data: Payload,
    #[serde(default)]
    pub metadata: Payload,

    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl Event {
    /// Create a new event stamped with the current time and a fresh id.
    pub fn new(event_type: EventType, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            event_type,
            level,
            message: message.into(),
            agent_id: None,
            session_id: None,
            user_id: None,
            component: None,
            function_name: None,
            tool_name: None,
            correlation_id: None,
            run_id: None,
            input_data: Payload::new(),
            output_data: Payload::new(),
            metadata: Payload::new(),
            duration_ms: 0.0,
            cpu_usage: None,
            memory_usage: None,
            error_type: None,
            error_message: None,
            stack_trace: None,
        }
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms.max(0.0);
        self
    }

    /// Epoch milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Epoch microseconds; the sort key used by every backend.
    pub fn timestamp_us(&self) -> i64 {
        self.timestamp.timestamp_micros()
    }

    /// ISO-8601 / RFC 3339 form of the timestamp.
    pub fn iso_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// `(timestamp_us, event_id)` ordering key.
    pub fn sort_key(&self) -> (i64, String) {
        (self.timestamp_us(), self.event_id.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Benchmark records
// ---------------------------------------------------------------------------

/// Output of running one (task, configuration) pair within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub run_id: RunId,
    pub task_id: String,
    pub config_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    /// Weighted score in 0.0–1.0.
    pub score: f64,
    pub raw_output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure classification, e.g. `"Timeout"` or `"ExecutorError"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub duration_ms: f64,
}

/// Lifecycle state of a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkRunStatus {
    Registered,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BenchmarkRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkRunStatus::Registered => "registered",
            BenchmarkRunStatus::Scheduled => "scheduled",
            BenchmarkRunStatus::Running => "running",
            BenchmarkRunStatus::Completed => "completed",
            BenchmarkRunStatus::Failed => "failed",
            BenchmarkRunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BenchmarkRunStatus::Completed
                | BenchmarkRunStatus::Failed
                | BenchmarkRunStatus::Cancelled
        )
    }
}

impl fmt::Display for BenchmarkRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record of one benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRunRecord {
    pub run_id: RunId,
    pub status: BenchmarkRunStatus,
    pub task_ids: Vec<String>,
    pub config_names: Vec<String>,
    pub parallel: bool,
    pub max_concurrency: usize,
    /// Size of the tasks × configurations work set.
    pub total_work_items: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl BenchmarkRunRecord {
    /// Create a record in `Registered` state.
    pub fn new(
        run_id: RunId,
        task_ids: Vec<String>,
        config_names: Vec<String>,
        parallel: bool,
        max_concurrency: usize,
    ) -> Self {
        let total_work_items = task_ids.len() * config_names.len();
        Self {
            run_id,
            status: BenchmarkRunStatus::Registered,
            task_ids,
            config_names,
            parallel,
            max_concurrency,
            total_work_items,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}
