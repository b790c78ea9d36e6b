//! Tracing subscriber setup shared by `agentlogd` and the `agentlog` CLI.
//!
//! The agentlog crates log at the requested level while storage and HTTP
//! dependencies (surrealdb, hyper, reqwest) stay at `warn` unless the
//! operator widens them through `AGENTLOG_LOG` or `RUST_LOG`. Log lines go
//! to stderr; stdout carries command output.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "AGENTLOG_LOG";

const AGENTLOG_TARGETS: [&str; 4] = ["agentlog_core", "agentlog_store", "agentlogd", "agentlog"];

/// `warn` for everything, `level` for the agentlog crates.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    AGENTLOG_TARGETS
        .iter()
        .fold(String::from("warn"), |mut acc, target| {
            acc.push_str(&format!(",{target}={level}"));
            acc
        })
}

fn build_filter(level: Level) -> EnvFilter {
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .find_map(|var| {
            let directives = std::env::var(var).ok()?;
            EnvFilter::try_new(directives.trim()).ok()
        })
        .unwrap_or_else(|| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber. `json` switches to newline-delimited JSON
/// with the current run span attached to each line.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = build_filter(level);
    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
    };
    if installed.is_ok() {
        tracing::debug!(json, level = %level, "tracing initialised");
    }
}
