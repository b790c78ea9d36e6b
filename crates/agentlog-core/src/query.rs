//! Read-only query facade over event and benchmark storage.
//!
//! `QueryService` holds an [`EventReader`], not an `EventStore`, so it has
//! no way to write events.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use agentlog_store::{
    query_stream, BenchmarkResult, BenchmarkRunRecord, BenchmarkStore, Event, EventFilter,
    EventId, EventPage, EventReader, EventType, LogLevel, RunId, StorageResult, TimelineKey,
    DEFAULT_STREAM_PAGE,
};

use crate::analysis::RegressionThresholds;
use crate::domain::{CoreError, Result};
use crate::obs;
use crate::reporting::BenchmarkReport;

/// Event counts over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogStatistics {
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub total: u64,
    /// Only types with at least one event.
    pub by_type: BTreeMap<String, u64>,
    pub by_level: BTreeMap<String, u64>,
    /// Share of events at `error` or `critical`.
    pub error_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentPerformance {
    pub samples: usize,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
}

/// Aggregated performance fields over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub window_seconds: u64,
    /// Events carrying a duration or resource measurement.
    pub samples: usize,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub p50_duration_ms: f64,
    pub p95_duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_cpu_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_memory_usage: Option<f64>,
    pub per_component: BTreeMap<String, ComponentPerformance>,
}

/// Nearest-rank percentile of sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Running totals for [`PerformanceMetrics`]. Only durations are kept per
/// sample; everything else is summed as events arrive.
#[derive(Debug, Default)]
struct PerformanceSamples {
    durations: Vec<f64>,
    cpu: (f64, usize),
    memory: (f64, usize),
    per_component: BTreeMap<String, (usize, f64, f64)>,
}

impl PerformanceSamples {
    fn observe(&mut self, e: &Event) {
        if e.duration_ms <= 0.0 && e.cpu_usage.is_none() && e.memory_usage.is_none() {
            return;
        }
        self.durations.push(e.duration_ms);
        if let Some(cpu) = e.cpu_usage {
            self.cpu = (self.cpu.0 + cpu, self.cpu.1 + 1);
        }
        if let Some(mem) = e.memory_usage {
            self.memory = (self.memory.0 + mem, self.memory.1 + 1);
        }
        let component = e.component.as_deref().unwrap_or("unknown");
        let slot = self
            .per_component
            .entry(component.to_string())
            .or_insert((0, 0.0, 0.0));
        slot.0 += 1;
        slot.1 += e.duration_ms;
        slot.2 = slot.2.max(e.duration_ms);
    }

    fn finish(mut self, window_seconds: u64) -> PerformanceMetrics {
        self.durations.sort_by(f64::total_cmp);
        let mean = |(sum, n): (f64, usize)| (n > 0).then(|| sum / n as f64);
        PerformanceMetrics {
            window_seconds,
            samples: self.durations.len(),
            avg_duration_ms: average(self.durations.iter().copied()).unwrap_or(0.0),
            min_duration_ms: self.durations.first().copied().unwrap_or(0.0),
            max_duration_ms: self.durations.last().copied().unwrap_or(0.0),
            p50_duration_ms: percentile(&self.durations, 50.0),
            p95_duration_ms: percentile(&self.durations, 95.0),
            avg_cpu_usage: mean(self.cpu),
            avg_memory_usage: mean(self.memory),
            per_component: self
                .per_component
                .into_iter()
                .map(|(name, (samples, sum, max))| {
                    let perf = ComponentPerformance {
                        samples,
                        avg_duration_ms: sum / samples as f64,
                        max_duration_ms: max,
                    };
                    (name, perf)
                })
                .collect(),
        }
    }
}

impl PerformanceMetrics {
    /// Aggregate the measured events among `events`.
    pub fn from_events(window_seconds: u64, events: &[Event]) -> Self {
        let mut samples = PerformanceSamples::default();
        for e in events {
            samples.observe(e);
        }
        samples.finish(window_seconds)
    }
}

/// Read side for the HTTP daemon, CLI and CI.
#[derive(Clone)]
pub struct QueryService {
    events: Arc<dyn EventReader>,
    benchmarks: Arc<dyn BenchmarkStore>,
    thresholds: RegressionThresholds,
}

impl QueryService {
    pub fn new(events: Arc<dyn EventReader>, benchmarks: Arc<dyn BenchmarkStore>) -> Self {
        Self {
            events,
            benchmarks,
            thresholds: RegressionThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: RegressionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn thresholds(&self) -> &RegressionThresholds {
        &self.thresholds
    }

    pub async fn get_event(&self, event_id: &EventId) -> Result<Event> {
        Ok(self.events.get(event_id).await?)
    }

    pub async fn query(&self, filter: &EventFilter) -> Result<EventPage> {
        Ok(self.events.query(filter).await?)
    }

    /// Lazily stream every event matching `filter`.
    pub fn stream(&self, filter: EventFilter) -> BoxStream<'static, StorageResult<Event>> {
        query_stream(Arc::clone(&self.events), filter, DEFAULT_STREAM_PAGE)
    }

    pub async fn timeline(&self, key: &TimelineKey) -> Result<Vec<Event>> {
        Ok(self.events.timeline(key).await?)
    }

    pub async fn health(&self) -> Result<()> {
        Ok(self.events.health().await?)
    }

    /// Counts by type and level over `[since, until)`.
    pub async fn statistics(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<LogStatistics> {
        let mut window = EventFilter::new();
        window.since = since;
        window.until = until;

        let total = self.events.count(&window).await?;
        let mut by_type = BTreeMap::new();
        let mut by_level = BTreeMap::new();
        if total > 0 {
            for t in EventType::ALL {
                let n = self.events.count(&window.clone().event_type(t)).await?;
                if n > 0 {
                    by_type.insert(t.as_str().to_string(), n);
                }
            }
            for l in LogLevel::ALL {
                let n = self.events.count(&window.clone().level(l)).await?;
                if n > 0 {
                    by_level.insert(l.as_str().to_string(), n);
                }
            }
        }
        let failures: u64 = LogLevel::ALL
            .iter()
            .filter(|l| l.is_failure())
            .filter_map(|l| by_level.get(l.as_str()))
            .sum();

        Ok(LogStatistics {
            window_start: since,
            window_end: until,
            total,
            by_type,
            by_level,
            error_rate: if total == 0 {
                0.0
            } else {
                failures as f64 / total as f64
            },
        })
    }

    /// Performance aggregates over the trailing `window`.
    pub async fn performance(&self, window: Duration) -> Result<PerformanceMetrics> {
        let span = chrono::Duration::from_std(window)
            .map_err(|e| CoreError::Config(format!("window out of range: {e}")))?;
        let filter = EventFilter::new().since(Utc::now() - span);
        let samples = self
            .stream(filter)
            .try_fold(PerformanceSamples::default(), |mut acc, e| async move {
                acc.observe(&e);
                Ok(acc)
            })
            .await?;
        Ok(samples.finish(window.as_secs()))
    }

    /// Newline-delimited JSON, one event per line.
    pub fn export_lines(&self, filter: EventFilter) -> BoxStream<'static, Result<String>> {
        self.stream(filter)
            .map(|item| {
                let event = item?;
                let mut line = serde_json::to_string(&event)?;
                line.push('\n');
                Ok(line)
            })
            .boxed()
    }

    pub async fn run(&self, run_id: &RunId) -> Result<BenchmarkRunRecord> {
        Ok(self.benchmarks.get_run(run_id).await?)
    }

    pub async fn runs(&self) -> Result<Vec<BenchmarkRunRecord>> {
        Ok(self.benchmarks.list_runs().await?)
    }

    /// Results of a run. Fails with `not_found` for an unknown run.
    pub async fn results(&self, run_id: &RunId) -> Result<Vec<BenchmarkResult>> {
        self.benchmarks.get_run(run_id).await?;
        Ok(self.benchmarks.results_for_run(run_id).await?)
    }

    /// Report for `run_id`, with regression alerts against `baseline`.
    pub async fn report(&self, run_id: &RunId, baseline: Option<&RunId>) -> Result<BenchmarkReport> {
        let run = self.benchmarks.get_run(run_id).await?;
        let results = self.benchmarks.results_for_run(run_id).await?;
        let baseline_results = match baseline {
            Some(id) => {
                self.benchmarks.get_run(id).await?;
                Some((id.clone(), self.benchmarks.results_for_run(id).await?))
            }
            None => None,
        };

        let report = BenchmarkReport::build(
            run.run_id,
            run.status,
            &results,
            baseline_results
                .as_ref()
                .map(|(id, r)| (id.clone(), r.as_slice())),
            &self.thresholds,
        );
        if let Some(baseline) = &report.baseline_run_id {
            obs::emit_regressions_detected(
                report.run_id.as_str(),
                baseline.as_str(),
                report.alerts.len(),
            );
        }
        Ok(report)
    }
}
