//! agentlog - query, export and benchmark from the command line
//!
//! ## Commands
//!
//! - `logs`: query, timeline, statistics, NDJSON export and retention cleanup
//! - `perf`: performance aggregates over a trailing window
//! - `bench`: run benchmarks from a catalog, show results and reports
//! - `health`: check that the store accepts writes

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde::Serialize;
use tracing::{info, Level};

use agentlog_core::telemetry::init_tracing;
use agentlog_core::{
    AgentlogConfig, BenchmarkCatalog, BenchmarkHarness, BenchmarkReport, EventFilter, EventLogger,
    EventType, Executor, HttpExecutor, LogLevel, QueryService, RunId, RunRequest, Sanitizer,
    TimelineKey,
};
use agentlog_store::{Cursor, EventStore, SurrealBenchmarkStore, SurrealEventStore, SurrealHandle};

#[derive(Parser)]
#[command(name = "agentlog")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Unified event logging and benchmarking for AI agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Database URL (mem://, surrealkv://<path>, ws://host:port)
    #[arg(long, global = true, env = "AGENTLOG_DB_URL")]
    db: Option<String>,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "AGENTLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Output format for command results
    #[arg(short, long, global = true, value_enum, default_value_t = Output::Text)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Query and maintain the event log
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },

    /// Performance aggregates over a trailing window
    Perf {
        /// Window length in seconds
        #[arg(short, long, default_value = "3600")]
        window_secs: u64,
    },

    /// Benchmark runs
    Bench {
        #[command(subcommand)]
        action: BenchAction,
    },

    /// Check that the store accepts writes
    Health,
}

#[derive(Args, Debug, Default, Clone)]
struct FilterArgs {
    #[arg(long)]
    event_type: Option<EventType>,
    #[arg(long)]
    level: Option<LogLevel>,
    /// Minimum level (debug < info < warning < error < critical)
    #[arg(long)]
    min_level: Option<LogLevel>,
    #[arg(long)]
    agent: Option<String>,
    #[arg(long)]
    session: Option<String>,
    #[arg(long)]
    run: Option<String>,
    /// Case-insensitive substring of the message
    #[arg(long)]
    text: Option<String>,
    /// RFC 3339 lower bound (inclusive)
    #[arg(long)]
    since: Option<DateTime<Utc>>,
    /// RFC 3339 upper bound (exclusive)
    #[arg(long)]
    until: Option<DateTime<Utc>>,
}

impl FilterArgs {
    fn to_filter(&self) -> EventFilter {
        let mut filter = EventFilter::new();
        filter.since = self.since;
        filter.until = self.until;
        filter.event_type = self.event_type;
        filter.level = self.level;
        filter.min_level = self.min_level;
        filter.agent_id = self.agent.clone();
        filter.session_id = self.session.clone();
        filter.run_id = self.run.clone();
        filter.text = self.text.clone();
        filter
    }
}

#[derive(Subcommand)]
enum LogsAction {
    /// One page of matching events
    Query {
        #[command(flatten)]
        filter: FilterArgs,

        /// Maximum number of events to show
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Continue after a cursor printed by a previous page
        #[arg(long)]
        cursor: Option<Cursor>,
    },

    /// Ordered events for one agent or session
    Timeline {
        #[arg(long, conflicts_with = "session", required_unless_present = "session")]
        agent: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },

    /// Counts by type and level
    Stats {
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },

    /// Write matching events as newline-delimited JSON
    Export {
        #[command(flatten)]
        filter: FilterArgs,

        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Delete events older than the retention window
    Cleanup {
        /// Retention in hours (default: retention.max_age_hours)
        #[arg(long)]
        older_than_hours: Option<u64>,
    },
}

#[derive(Subcommand)]
enum BenchAction {
    /// Run tasks against configurations and wait for the outcome
    Run {
        /// Catalog of tasks and configurations (JSON or TOML)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Task ids (default: every catalog task)
        #[arg(short, long = "task")]
        tasks: Vec<String>,

        /// Configuration names (default: every catalog configuration)
        #[arg(short = 'C', long = "configuration")]
        configurations: Vec<String>,

        /// Execute work items concurrently
        #[arg(long)]
        parallel: bool,

        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Per-execution timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Executor endpoint (overrides executor.url)
        #[arg(long, env = "AGENTLOG_EXECUTOR_URL")]
        executor: Option<String>,
    },

    /// List runs, newest first
    Runs,

    /// Results of one run
    Results {
        run_id: String,
    },

    /// Summary, rankings and regressions against a baseline
    Report {
        run_id: String,

        #[arg(long)]
        baseline: Option<String>,

        /// Render Markdown instead of the text/JSON output
        #[arg(long)]
        markdown: bool,

        /// Exit non-zero when regressions are detected
        #[arg(long)]
        fail_on_regression: bool,
    },
}

/// Store handles and settings shared by every command.
struct Ctx {
    config: AgentlogConfig,
    events: Arc<SurrealEventStore>,
    benchmarks: Arc<SurrealBenchmarkStore>,
    query: QueryService,
    output: Output,
}

impl Ctx {
    async fn connect(config: AgentlogConfig, output: Output) -> Result<Self> {
        let handle = SurrealHandle::connect(&config.store_config())
            .await
            .with_context(|| format!("Failed to connect to {}", config.storage.url))?;
        Ok(Self::from_handle(&handle, config, output))
    }

    fn from_handle(handle: &SurrealHandle, config: AgentlogConfig, output: Output) -> Self {
        let events = Arc::new(handle.event_store());
        let benchmarks = Arc::new(handle.benchmark_store());
        let query = QueryService::new(events.clone(), benchmarks.clone())
            .with_thresholds(config.regression.clone());
        Self {
            config,
            events,
            benchmarks,
            query,
            output,
        }
    }
}

fn print_json<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn short(id: &str) -> &str {
    &id[..8.min(id.len())]
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    init_tracing(cli.json, level);

    let mut config = AgentlogConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.storage.url = db;
    }
    let ctx = Ctx::connect(config, cli.output).await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Commands::Logs { action } => match action {
            LogsAction::Query {
                filter,
                limit,
                cursor,
            } => cmd_logs_query(&ctx, &mut out, &filter, limit, cursor).await,
            LogsAction::Timeline { agent, session } => {
                let key = match (agent, session) {
                    (Some(agent), _) => TimelineKey::Agent(agent),
                    (None, Some(session)) => TimelineKey::Session(session),
                    (None, None) => bail!("one of --agent or --session is required"),
                };
                cmd_logs_timeline(&ctx, &mut out, &key).await
            }
            LogsAction::Stats { since, until } => cmd_logs_stats(&ctx, &mut out, since, until).await,
            LogsAction::Export { filter, out: path } => match path {
                Some(path) => {
                    let mut file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let n = cmd_logs_export(&ctx, &mut file, &filter).await?;
                    info!(events = n, path = %path.display(), "export written");
                    eprintln!("Exported {} events to {}", n, path.display());
                    Ok(())
                }
                None => cmd_logs_export(&ctx, &mut out, &filter).await.map(|_| ()),
            },
            LogsAction::Cleanup { older_than_hours } => {
                cmd_logs_cleanup(&ctx, &mut out, older_than_hours).await
            }
        },
        Commands::Perf { window_secs } => cmd_perf(&ctx, &mut out, window_secs).await,
        Commands::Bench { action } => match action {
            BenchAction::Run {
                catalog,
                tasks,
                configurations,
                parallel,
                max_concurrency,
                timeout_ms,
                executor,
            } => {
                let catalog = catalog
                    .or_else(|| ctx.config.harness.catalog.clone())
                    .context("No catalog given (use --catalog or harness.catalog)")?;
                let endpoint = executor
                    .or_else(|| ctx.config.executor.url.clone())
                    .context("No executor endpoint (use --executor or executor.url)")?;
                let executor: Arc<dyn Executor> = Arc::new(HttpExecutor::new(
                    endpoint,
                    Duration::from_millis(ctx.config.executor.request_timeout_ms),
                )?);
                let request = RunRequest {
                    task_ids: tasks,
                    config_names: configurations,
                    parallel,
                    max_concurrency,
                    timeout_ms,
                };
                cmd_bench_run(&ctx, &mut out, &catalog, executor, request).await
            }
            BenchAction::Runs => cmd_bench_runs(&ctx, &mut out).await,
            BenchAction::Results { run_id } => cmd_bench_results(&ctx, &mut out, &run_id).await,
            BenchAction::Report {
                run_id,
                baseline,
                markdown,
                fail_on_regression,
            } => {
                let report = cmd_bench_report(&ctx, &mut out, &run_id, baseline.as_deref(), markdown).await?;
                if fail_on_regression && report.has_regressions() {
                    bail!("{} regression(s) detected", report.alerts.len());
                }
                Ok(())
            }
        },
        Commands::Health => cmd_health(&ctx, &mut out).await,
    }
}

/// Show one page of events
async fn cmd_logs_query(
    ctx: &Ctx,
    out: &mut dyn Write,
    filter: &FilterArgs,
    limit: usize,
    cursor: Option<Cursor>,
) -> Result<()> {
    let mut filter = filter.to_filter().limit(limit.max(1));
    if let Some(cursor) = cursor {
        filter = filter.after(cursor);
    }
    let page = ctx.query.query(&filter).await?;
    if ctx.output == Output::Json {
        return print_json(out, &page);
    }

    if page.events.is_empty() {
        writeln!(out, "No events found")?;
        return Ok(());
    }
    for e in &page.events {
        writeln!(
            out,
            "{} {:<8} {:<16} {:<12} {}",
            e.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            e.level.as_str(),
            e.event_type.as_str(),
            e.agent_id.as_deref().unwrap_or("-"),
            e.message
        )?;
    }
    if let Some(next) = &page.next_cursor {
        writeln!(out, "\nnext page: --cursor {next}")?;
    }
    Ok(())
}

/// Ordered events for an agent or session
async fn cmd_logs_timeline(ctx: &Ctx, out: &mut dyn Write, key: &TimelineKey) -> Result<()> {
    let events = ctx.query.timeline(key).await?;
    if ctx.output == Output::Json {
        return print_json(out, &events);
    }
    for e in &events {
        let took = if e.duration_ms > 0.0 {
            format!(" ({:.1} ms)", e.duration_ms)
        } else {
            String::new()
        };
        writeln!(
            out,
            "{} [{}] {} {}{}",
            e.timestamp.format("%H:%M:%S%.3f"),
            short(e.event_id.as_str()),
            e.event_type.as_str(),
            e.message,
            took
        )?;
    }
    Ok(())
}

/// Counts by type and level
async fn cmd_logs_stats(
    ctx: &Ctx,
    out: &mut dyn Write,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Result<()> {
    let stats = ctx.query.statistics(since, until).await?;
    if ctx.output == Output::Json {
        return print_json(out, &stats);
    }
    writeln!(out, "Total events: {}", stats.total)?;
    writeln!(out, "Error rate:   {:.1}%", stats.error_rate * 100.0)?;
    writeln!(out, "\nBy type:")?;
    for (t, n) in &stats.by_type {
        writeln!(out, "  {t:<18} {n}")?;
    }
    writeln!(out, "\nBy level:")?;
    for (l, n) in &stats.by_level {
        writeln!(out, "  {l:<18} {n}")?;
    }
    Ok(())
}

/// Stream matching events as NDJSON. Returns the number written.
async fn cmd_logs_export(ctx: &Ctx, out: &mut dyn Write, filter: &FilterArgs) -> Result<usize> {
    let mut lines = ctx.query.export_lines(filter.to_filter());
    let mut written = 0usize;
    while let Some(line) = lines.next().await {
        out.write_all(line?.as_bytes())?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

/// Delete expired events
async fn cmd_logs_cleanup(ctx: &Ctx, out: &mut dyn Write, older_than_hours: Option<u64>) -> Result<()> {
    let hours = older_than_hours.unwrap_or(ctx.config.retention.max_age_hours);
    let retention = Duration::from_secs(hours.saturating_mul(3600));
    let deleted = ctx.events.cleanup(retention).await?;
    agentlog_core::obs::emit_cleanup_completed(retention.as_secs(), deleted);
    writeln!(out, "Deleted {deleted} events older than {hours}h")?;
    Ok(())
}

/// Performance aggregates
async fn cmd_perf(ctx: &Ctx, out: &mut dyn Write, window_secs: u64) -> Result<()> {
    if window_secs == 0 {
        bail!("--window-secs must be at least 1");
    }
    let perf = ctx.query.performance(Duration::from_secs(window_secs)).await?;
    if ctx.output == Output::Json {
        return print_json(out, &perf);
    }
    writeln!(out, "Window:  {}s, {} samples", perf.window_seconds, perf.samples)?;
    writeln!(
        out,
        "Latency: avg {:.1} ms, p50 {:.1}, p95 {:.1}, min {:.1}, max {:.1}",
        perf.avg_duration_ms,
        perf.p50_duration_ms,
        perf.p95_duration_ms,
        perf.min_duration_ms,
        perf.max_duration_ms
    )?;
    if let Some(cpu) = perf.avg_cpu_usage {
        writeln!(out, "CPU:     avg {cpu:.1}")?;
    }
    if let Some(mem) = perf.avg_memory_usage {
        writeln!(out, "Memory:  avg {mem:.1}")?;
    }
    for (component, p) in &perf.per_component {
        writeln!(
            out,
            "  {component:<20} n={:<6} avg {:.1} ms, max {:.1} ms",
            p.samples, p.avg_duration_ms, p.max_duration_ms
        )?;
    }
    Ok(())
}

/// Register a catalog, run it to completion and print the results
async fn cmd_bench_run(
    ctx: &Ctx,
    out: &mut dyn Write,
    catalog: &Path,
    executor: Arc<dyn Executor>,
    mut request: RunRequest,
) -> Result<()> {
    let catalog = BenchmarkCatalog::load(catalog)
        .with_context(|| format!("Failed to load catalog {}", catalog.display()))?;
    if request.task_ids.is_empty() {
        request.task_ids = catalog.tasks.iter().map(|t| t.task_id.clone()).collect();
    }
    if request.config_names.is_empty() {
        request.config_names = catalog.configurations.iter().map(|c| c.name.clone()).collect();
    }

    let sanitizer = Sanitizer::new(&ctx.config.sanitizer)?;
    let logger = EventLogger::start_with_sanitizer(
        ctx.config.logger.clone(),
        sanitizer,
        ctx.events.clone() as Arc<dyn EventStore>,
    );
    let harness = BenchmarkHarness::new(
        executor,
        logger.clone(),
        ctx.benchmarks.clone(),
        ctx.config.harness.clone(),
    );
    harness.load_catalog(catalog, false)?;
    let harness = Arc::new(harness);

    let summary = harness.run(request).await;
    if let Err(e) = logger.shutdown().await {
        tracing::warn!(error = %e, "benchmark events left unflushed");
    }
    let summary = summary?;

    if ctx.output == Output::Json {
        return print_json(out, &summary);
    }
    writeln!(out, "Run {} {}", summary.run_id, summary.status)?;
    let mut results = summary.results;
    results.sort_by(|a, b| (&a.task_id, &a.config_name).cmp(&(&b.task_id, &b.config_name)));
    for r in &results {
        let outcome = if r.success {
            format!("score {:.3}", r.score)
        } else {
            format!("FAILED ({})", r.error_type.as_deref().unwrap_or("error"))
        };
        writeln!(
            out,
            "  {:<24} {:<16} {:<20} {:.0} ms",
            r.task_id, r.config_name, outcome, r.duration_ms
        )?;
    }
    Ok(())
}

/// List runs
async fn cmd_bench_runs(ctx: &Ctx, out: &mut dyn Write) -> Result<()> {
    let runs = ctx.query.runs().await?;
    if ctx.output == Output::Json {
        return print_json(out, &runs);
    }
    if runs.is_empty() {
        writeln!(out, "No benchmark runs found")?;
        return Ok(());
    }
    for run in &runs {
        writeln!(
            out,
            "{} {:<10} {} items  {}",
            run.run_id,
            run.status,
            run.total_work_items,
            run.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
    }
    Ok(())
}

/// Results of one run
async fn cmd_bench_results(ctx: &Ctx, out: &mut dyn Write, run_id: &str) -> Result<()> {
    let run_id = RunId(run_id.to_string());
    let results = ctx.query.results(&run_id).await?;
    if ctx.output == Output::Json {
        return print_json(out, &results);
    }
    for r in &results {
        writeln!(
            out,
            "{:<24} {:<16} success={} score={:.3} {:.0} ms",
            r.task_id, r.config_name, r.success, r.score, r.duration_ms
        )?;
    }
    Ok(())
}

/// Report for one run
async fn cmd_bench_report(
    ctx: &Ctx,
    out: &mut dyn Write,
    run_id: &str,
    baseline: Option<&str>,
    markdown: bool,
) -> Result<BenchmarkReport> {
    let run_id = RunId(run_id.to_string());
    let baseline = baseline.map(|b| RunId(b.to_string()));
    let report = ctx.query.report(&run_id, baseline.as_ref()).await?;
    if markdown || ctx.output == Output::Text {
        write!(out, "{}", report.to_markdown())?;
    } else {
        print_json(out, &report)?;
    }
    Ok(report)
}

/// Store liveness
async fn cmd_health(ctx: &Ctx, out: &mut dyn Write) -> Result<()> {
    ctx.query
        .health()
        .await
        .with_context(|| format!("Store at {} is not accepting writes", ctx.config.storage.url))?;
    writeln!(out, "ok: {}", ctx.config.storage.url)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlog_core::{BenchmarkConfiguration, BenchmarkTaskCase, ExecutionOutput, ExecutorError, TaskType};
    use agentlog_store::{Event, EventReader};

    struct FixedExecutor;

    #[async_trait::async_trait]
    impl Executor for FixedExecutor {
        async fn execute(
            &self,
            _task: &BenchmarkTaskCase,
            _config: &BenchmarkConfiguration,
        ) -> Result<ExecutionOutput, ExecutorError> {
            Ok(ExecutionOutput::new(serde_json::json!("done")).with_score("quality", 0.9))
        }
    }

    async fn ctx(output: Output) -> Ctx {
        let handle = SurrealHandle::in_memory().await.unwrap();
        Ctx::from_handle(&handle, AgentlogConfig::default(), output)
    }

    async fn seed(ctx: &Ctx) {
        for (i, agent) in ["planner", "planner", "writer"].iter().enumerate() {
            let e = Event::new(EventType::ToolCall, LogLevel::Info, format!("call {i}"))
                .at(Utc::now() - chrono::Duration::seconds(10 - i as i64))
                .with_agent(*agent);
            ctx.events.append(e).await.unwrap();
        }
    }

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "agentlog", "logs", "query", "--level", "error", "--db", "mem://", "-o", "json",
        ])
        .unwrap();
        assert_eq!(cli.db.as_deref(), Some("mem://"));
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::Logs {
                action: LogsAction::Query { filter, limit, .. },
            } => {
                assert_eq!(filter.level, Some(LogLevel::Error));
                assert_eq!(limit, 50);
            }
            _ => panic!("expected logs query"),
        }
        assert!(Cli::try_parse_from(["agentlog", "logs", "query", "--event-type", "nope"]).is_err());
    }

    #[tokio::test]
    async fn test_logs_query_and_export() {
        let ctx = ctx(Output::Text).await;
        seed(&ctx).await;

        let mut buf = Vec::new();
        let filter = FilterArgs {
            agent: Some("planner".into()),
            ..FilterArgs::default()
        };
        cmd_logs_query(&ctx, &mut buf, &filter, 10, None).await.unwrap();
        let shown = text(buf);
        assert!(shown.contains("call 0"));
        assert!(!shown.contains("call 2"));

        let mut buf = Vec::new();
        let n = cmd_logs_export(&ctx, &mut buf, &FilterArgs::default()).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(text(buf).lines().count(), 3);
    }

    #[tokio::test]
    async fn test_logs_stats_json() {
        let ctx = ctx(Output::Json).await;
        seed(&ctx).await;
        let mut buf = Vec::new();
        cmd_logs_stats(&ctx, &mut buf, None, None).await.unwrap();
        let stats: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(stats["total"], 3);
        assert_eq!(stats["by_type"]["tool_call"], 3);
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_events() {
        let ctx = ctx(Output::Text).await;
        let old = Event::new(EventType::System, LogLevel::Info, "ancient")
            .at(Utc::now() - chrono::Duration::hours(48));
        ctx.events.append(old).await.unwrap();
        seed(&ctx).await;

        let mut buf = Vec::new();
        cmd_logs_cleanup(&ctx, &mut buf, Some(24)).await.unwrap();
        assert!(text(buf).contains("Deleted 1 events"));
        assert_eq!(ctx.events.count(&EventFilter::new()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_bench_run_then_report() {
        let ctx = ctx(Output::Text).await;
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = dir.path().join("catalog.json");
        let catalog = serde_json::json!({
            "tasks": [BenchmarkTaskCase::new(
                "summarize_doc",
                TaskType::Summarization,
                [("quality".to_string(), 1.0)].into_iter().collect(),
            )],
            "configurations": [
                BenchmarkConfiguration::new("fast", "model-a"),
                BenchmarkConfiguration::new("accurate", "model-b"),
            ]
        });
        std::fs::write(&catalog_path, catalog.to_string()).unwrap();

        let mut buf = Vec::new();
        let request = RunRequest::new(Vec::<String>::new(), Vec::<String>::new());
        cmd_bench_run(&ctx, &mut buf, &catalog_path, Arc::new(FixedExecutor), request)
            .await
            .unwrap();
        let shown = text(buf);
        assert!(shown.contains("completed"));
        assert!(shown.contains("score 0.900"));

        let runs = ctx.query.runs().await.unwrap();
        assert_eq!(runs.len(), 1);
        let run_id = runs[0].run_id.to_string();

        let mut buf = Vec::new();
        let report = cmd_bench_report(&ctx, &mut buf, &run_id, None, true).await.unwrap();
        assert_eq!(report.total_results, 2);
        assert!(text(buf).contains("# Benchmark Report"));

        let mut buf = Vec::new();
        cmd_health(&ctx, &mut buf).await.unwrap();
        assert!(text(buf).starts_with("ok"));
    }
}
