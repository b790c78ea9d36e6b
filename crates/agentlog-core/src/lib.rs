//! agentlog core library
//!
//! Event capture, instrumentation hooks, the benchmark harness and the read
//! side used by the daemon and CLI.

pub mod analysis;
pub mod buffer;
pub mod config;
pub mod domain;
pub mod harness;
pub mod hooks;
pub mod logger;
pub mod metrics;
pub mod obs;
pub mod query;
pub mod reporting;
pub mod telemetry;

pub use analysis::{
    compare, detect_regressions, summary_stats, RankedConfiguration, RegressionAlert,
    RegressionKind, RegressionThresholds, Severity, SummaryStats, TaskRanking,
};

pub use config::{AgentlogConfig, ConfigError};

pub use domain::{
    normalize, BenchmarkConfiguration, BenchmarkTaskCase, CoreError, RawEvent, RedactionRule,
    Result, Sanitizer, SanitizerConfig, TaskType, ValidationError,
};

pub use harness::{
    BenchmarkCatalog, BenchmarkHarness, BenchmarkRegistry, ExecutionOutput, Executor,
    ExecutorError, HarnessConfig, HarnessError, HttpExecutor, RunHandle, RunRequest, RunSummary,
    Scorer, WeightedCriteriaScorer,
};

pub use hooks::{
    instrument_async, instrument_async_with_timeout, instrument_sync, HookError, HookScope,
    HookSpec,
};

pub use logger::{Attribution, EventLogger, LoggerConfig, LoggerStats};

pub use query::{LogStatistics, PerformanceMetrics, QueryService};

pub use reporting::BenchmarkReport;

pub use agentlog_store::{
    BenchmarkResult, BenchmarkRunRecord, BenchmarkRunStatus, Event, EventFilter, EventId,
    EventType, LogLevel, Payload, RunId, TimelineKey,
};
