//! agentlogd - agentlog HTTP daemon
//!
//! Serves event queries, performance aggregates and benchmark runs over HTTP,
//! and sweeps expired events in the background.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, Level};

use agentlog_core::telemetry::init_tracing;
use agentlog_core::{
    AgentlogConfig, BenchmarkCatalog, BenchmarkHarness, EventLogger, Executor, HttpExecutor,
    QueryService, Sanitizer,
};
use agentlog_store::{EventStore, SurrealHandle};
use agentlogd::{router, spawn_retention_sweep, AppState, NoExecutor};

#[derive(Parser)]
#[command(name = "agentlogd")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "agentlog HTTP daemon", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "AGENTLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides server.bind)
    #[arg(long)]
    bind: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json, if args.verbose { Level::DEBUG } else { Level::INFO });

    let mut config = AgentlogConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let handle = SurrealHandle::connect(&config.store_config())
        .await
        .with_context(|| format!("Failed to connect to {}", config.storage.url))?;
    let store = Arc::new(handle.event_store());
    let events: Arc<dyn EventStore> = store.clone();
    let benchmarks = Arc::new(handle.benchmark_store());

    let sanitizer = Sanitizer::new(&config.sanitizer).context("Invalid sanitizer rules")?;
    let logger = EventLogger::start_with_sanitizer(config.logger.clone(), sanitizer, Arc::clone(&events));

    let executor: Arc<dyn Executor> = match &config.executor.url {
        Some(url) => Arc::new(
            HttpExecutor::new(url.clone(), Duration::from_millis(config.executor.request_timeout_ms))
                .context("Failed to build executor client")?,
        ),
        None => {
            info!("no executor endpoint configured; benchmark executions will fail");
            Arc::new(NoExecutor)
        }
    };

    let harness = BenchmarkHarness::new(executor, logger.clone(), benchmarks.clone(), config.harness.clone());
    if let Some(path) = &config.harness.catalog {
        let catalog = BenchmarkCatalog::load(path)
            .with_context(|| format!("Failed to load benchmark catalog {}", path.display()))?;
        harness
            .load_catalog(catalog, false)
            .context("Failed to register benchmark catalog")?;
        info!(
            tasks = harness.tasks().len(),
            configurations = harness.configurations().len(),
            "benchmark catalog loaded"
        );
    }

    let query = QueryService::new(store, benchmarks).with_thresholds(config.regression.clone());
    let state = AppState::new(query, logger.clone(), Arc::new(harness));

    let (stop_tx, stop_rx) = watch::channel(false);
    let sweeper = config.retention.sweep_interval().map(|interval| {
        spawn_retention_sweep(Arc::clone(&events), config.retention.max_age(), interval, stop_rx)
    });

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind))?;
    info!(addr = %config.server.bind, db = %config.storage.url, "agentlogd listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("agentlogd shutting down");
    let _ = stop_tx.send(true);
    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            error!(error = %e, "retention sweep ended abnormally");
        }
    }
    match logger.shutdown().await {
        Ok(written) => info!(written, "event buffer drained"),
        Err(e) => error!(error = %e, "events left unflushed at shutdown"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
