//! Request handlers.

use std::str::FromStr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use agentlog_core::{
    BenchmarkConfiguration, BenchmarkRunRecord, BenchmarkTaskCase, EventFilter, EventType,
    LogLevel, LogStatistics, PerformanceMetrics, RawEvent, RunId, RunRequest, TimelineKey,
};
use agentlog_store::{Cursor, EventPage};

use crate::error::ApiError;
use crate::AppState;

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;
pub const DEFAULT_PERFORMANCE_WINDOW_SECS: u64 = 3600;

type ApiResult<T> = Result<T, ApiError>;

/// Filter parameters shared by `/logs` and `/performance/export`.
#[derive(Debug, Default, Deserialize)]
pub struct LogParams {
    pub event_type: Option<String>,
    pub level: Option<String>,
    pub min_level: Option<String>,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    pub text: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub cursor: Option<String>,
}

/// RFC 3339 or epoch milliseconds.
fn parse_time(field: &str, raw: &str) -> ApiResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| ApiError::validation(format!("{field}: expected RFC 3339 or epoch milliseconds")))
}

fn parse_field<T: FromStr>(field: &str, raw: &str) -> ApiResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| ApiError::validation(format!("{field}: {e}")))
}

fn parse_window(
    since: Option<&str>,
    until: Option<&str>,
) -> ApiResult<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    let since = since.map(|s| parse_time("since", s)).transpose()?;
    let until = until.map(|s| parse_time("until", s)).transpose()?;
    if let (Some(s), Some(u)) = (since, until) {
        if s > u {
            return Err(ApiError::validation("since must not be after until"));
        }
    }
    Ok((since, until))
}

impl LogParams {
    /// Build a filter. `default_limit` applies when the request names none.
    pub fn to_filter(&self, default_limit: Option<usize>) -> ApiResult<EventFilter> {
        let (since, until) = parse_window(self.since.as_deref(), self.until.as_deref())?;
        let mut filter = EventFilter::new();
        filter.since = since;
        filter.until = until;
        if let Some(raw) = &self.event_type {
            filter = filter.event_type(parse_field::<EventType>("event_type", raw)?);
        }
        if let Some(raw) = &self.level {
            filter = filter.level(parse_field::<LogLevel>("level", raw)?);
        }
        if let Some(raw) = &self.min_level {
            filter = filter.min_level(parse_field::<LogLevel>("min_level", raw)?);
        }
        if let Some(id) = &self.agent_id {
            filter = filter.agent(id.clone());
        }
        if let Some(id) = &self.session_id {
            filter = filter.session(id.clone());
        }
        if let Some(id) = &self.run_id {
            filter = filter.run(id.clone());
        }
        if let Some(text) = &self.text {
            filter = filter.text(text.clone());
        }
        if let Some(raw) = &self.cursor {
            filter = filter.after(parse_field::<Cursor>("cursor", raw)?);
        }
        if let Some(offset) = self.offset {
            filter = filter.offset(offset);
        }
        match self.limit.or(default_limit) {
            Some(0) => return Err(ApiError::validation("limit must be at least 1")),
            Some(limit) => filter = filter.limit(limit.min(MAX_PAGE_LIMIT)),
            None => {}
        }
        Ok(filter)
    }
}

pub async fn list_logs(
    State(state): State<AppState>,
    params: Result<Query<LogParams>, QueryRejection>,
) -> ApiResult<Json<EventPage>> {
    let Query(params) = params?;
    let filter = params.to_filter(Some(DEFAULT_PAGE_LIMIT))?;
    Ok(Json(state.query.query(&filter).await?))
}

#[derive(Debug, Deserialize)]
pub struct WindowParams {
    pub since: Option<String>,
    pub until: Option<String>,
}

pub async fn log_statistics(
    State(state): State<AppState>,
    params: Result<Query<WindowParams>, QueryRejection>,
) -> ApiResult<Json<LogStatistics>> {
    let Query(params) = params?;
    let (since, until) = parse_window(params.since.as_deref(), params.until.as_deref())?;
    Ok(Json(state.query.statistics(since, until).await?))
}

#[derive(Debug, Deserialize)]
pub struct TimelineParams {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
}

pub async fn log_timeline(
    State(state): State<AppState>,
    params: Result<Query<TimelineParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let key = match (params.agent_id, params.session_id) {
        (Some(agent), None) => TimelineKey::Agent(agent),
        (None, Some(session)) => TimelineKey::Session(session),
        _ => {
            return Err(ApiError::validation(
                "exactly one of agent_id or session_id is required",
            ))
        }
    };
    let events = state.query.timeline(&key).await?;
    Ok(Json(json!({ "key": key, "events": events })))
}

#[derive(Debug, Deserialize)]
pub struct PerformanceParams {
    pub duration_seconds: Option<u64>,
}

pub async fn performance(
    State(state): State<AppState>,
    params: Result<Query<PerformanceParams>, QueryRejection>,
) -> ApiResult<Json<PerformanceMetrics>> {
    let Query(params) = params?;
    let secs = params
        .duration_seconds
        .unwrap_or(DEFAULT_PERFORMANCE_WINDOW_SECS);
    if secs == 0 {
        return Err(ApiError::validation("duration_seconds must be at least 1"));
    }
    let window = Duration::from_secs(secs);
    Ok(Json(state.query.performance(window).await?))
}

/// Newline-delimited JSON of every matching event.
pub async fn performance_export(
    State(state): State<AppState>,
    params: Result<Query<LogParams>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(params) = params?;
    let filter = params.to_filter(None)?;
    // Fail fast on a dead backend instead of aborting mid-body.
    state.query.health().await.map_err(ApiError::unavailable)?;
    let body = Body::from_stream(state.query.export_lines(filter));
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response())
}

pub async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.query.health().await.map_err(ApiError::unavailable)?;
    Ok(Json(json!({
        "status": "ok",
        "uptime_seconds": state.started.elapsed().as_secs(),
        "logger": state.logger.stats(),
        "active_runs": state.harness.active_runs().len(),
    })))
}

/// Stage a synthetic event and flush it so it is immediately queryable.
pub async fn insert_test_event(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let raw = if body.iter().all(u8::is_ascii_whitespace) {
        RawEvent::new(EventType::System, LogLevel::Info, "synthetic test event")
            .component("agentlogd")
    } else {
        serde_json::from_slice::<RawEvent>(&body)
            .map_err(|e| ApiError::validation(format!("invalid event body: {e}")))?
    };
    let event_id = state.logger.record(raw)?;
    state.logger.flush().await.map_err(ApiError::unavailable)?;
    debug!(event_id = %event_id, "synthetic event stored");
    Ok((StatusCode::CREATED, Json(json!({ "event_id": event_id }))))
}

pub async fn start_benchmark_run(
    State(state): State<AppState>,
    request: Result<Json<RunRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(request) = request?;
    if request.task_ids.is_empty() || request.config_names.is_empty() {
        return Err(ApiError::validation(
            "task_ids and config_names must each name at least one entry",
        ));
    }
    if request.max_concurrency == Some(0) {
        return Err(ApiError::validation("max_concurrency must be at least 1"));
    }
    let handle = state.harness.spawn_run(request).await?;
    let run_id = handle.run_id().clone();
    info!(run_id = %run_id, "benchmark run accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run_id, "status": "scheduled" })),
    ))
}

pub async fn list_benchmark_runs(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<BenchmarkRunRecord>>> {
    Ok(Json(state.query.runs().await?))
}

pub async fn benchmark_results(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run_id = RunId(run_id);
    let run = state.query.run(&run_id).await?;
    let results = state.query.results(&run_id).await?;
    Ok(Json(json!({
        "run_id": run.run_id,
        "status": run.status,
        "total_work_items": run.total_work_items,
        "results": results,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    pub baseline: Option<String>,
    /// `json` (default) or `markdown`.
    pub format: Option<String>,
}

pub async fn benchmark_report(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    params: Result<Query<ReportParams>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(params) = params?;
    let run_id = RunId(run_id);
    let baseline = params.baseline.map(RunId);
    let report = state.query.report(&run_id, baseline.as_ref()).await?;
    match params.format.as_deref() {
        None | Some("json") => Ok(Json(report).into_response()),
        Some("markdown") | Some("md") => Ok((
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            report.to_markdown(),
        )
            .into_response()),
        Some(other) => Err(ApiError::validation(format!(
            "format: expected json or markdown, got {other}"
        ))),
    }
}

pub async fn cancel_benchmark_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let run_id = RunId(run_id);
    if state.harness.cancel(&run_id) {
        info!(run_id = %run_id, "benchmark run cancellation requested");
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "run_id": run_id, "cancelled": true })),
        ));
    }
    let run = state.query.run(&run_id).await?;
    Err(ApiError::conflict(format!(
        "run {} is {} and cannot be cancelled",
        run.run_id, run.status
    )))
}

pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<BenchmarkTaskCase>> {
    Json(state.harness.tasks())
}

pub async fn list_configurations(
    State(state): State<AppState>,
) -> Json<Vec<BenchmarkConfiguration>> {
    Json(state.harness.configurations())
}
