//! Process configuration.
//!
//! `AgentlogConfig` is read from a TOML file and then overridden from the
//! environment. Every section has defaults, so an empty file is a valid
//! configuration.
//!
//! ```toml
//! [storage]
//! url = "surrealkv://.agentlog/db"
//!
//! [logger]
//! buffer_capacity = 10000
//!
//! [retention]
//! max_age_hours = 168
//!
//! [regression]
//! max_relative_score_drop = 0.10
//! min_success_rate = 0.8
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use agentlog_store::StoreConfig;

use crate::analysis::RegressionThresholds;
use crate::domain::SanitizerConfig;
use crate::harness::HarnessConfig;
use crate::logger::LoggerConfig;

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub url: String,
    pub namespace: String,
    pub database: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            url: "surrealkv://.agentlog/db".to_string(),
            namespace: "agentlog".to_string(),
            database: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    /// Events older than this are deleted by the sweep.
    pub max_age_hours: u64,
    /// 0 disables the background sweep.
    pub sweep_interval_secs: u64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            max_age_hours: 24 * 7,
            sweep_interval_secs: 3600,
        }
    }
}

impl RetentionSection {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours.saturating_mul(3600))
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8700".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// HTTP endpoint of the agent under test; benchmarks are disabled when unset.
    pub url: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            url: None,
            request_timeout_ms: 60_000,
        }
    }
}

/// Top-level agentlog configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentlogConfig {
    pub storage: StorageSection,
    pub logger: LoggerConfig,
    pub sanitizer: SanitizerConfig,
    pub retention: RetentionSection,
    pub regression: RegressionThresholds,
    pub harness: HarnessConfig,
    pub server: ServerSection,
    pub executor: ExecutorSection,
}

impl AgentlogConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from `path` (defaults when `None`), then apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production).
    ///
    /// Recognized keys: `AGENTLOG_DB_URL`, `AGENTLOG_BIND`,
    /// `AGENTLOG_BUFFER_CAPACITY`, `AGENTLOG_RETENTION_HOURS`,
    /// `AGENTLOG_EXECUTOR_URL`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("AGENTLOG_DB_URL") {
            self.storage.url = url;
        }
        if let Some(bind) = lookup("AGENTLOG_BIND") {
            self.server.bind = bind;
        }
        if let Some(raw) = lookup("AGENTLOG_BUFFER_CAPACITY") {
            self.logger.buffer_capacity = parse_number("AGENTLOG_BUFFER_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("AGENTLOG_RETENTION_HOURS") {
            self.retention.max_age_hours = parse_number("AGENTLOG_RETENTION_HOURS", &raw)?;
        }
        if let Some(url) = lookup("AGENTLOG_EXECUTOR_URL") {
            self.executor.url = Some(url);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if self.logger.buffer_capacity == 0 {
            return Err(invalid("logger.buffer_capacity", "must be at least 1"));
        }
        if self.logger.flush_batch_size == 0 {
            return Err(invalid("logger.flush_batch_size", "must be at least 1"));
        }
        if self.harness.default_max_concurrency == 0 {
            return Err(invalid("harness.default_max_concurrency", "must be at least 1"));
        }
        let drop = self.regression.max_relative_score_drop;
        if !(0.0..=1.0).contains(&drop) {
            return Err(invalid(
                "regression.max_relative_score_drop",
                "must be within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.regression.min_success_rate) {
            return Err(invalid("regression.min_success_rate", "must be within [0, 1]"));
        }
        crate::domain::Sanitizer::new(&self.sanitizer).map_err(|e| ConfigError::Invalid {
            key: "sanitizer".to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Connection settings for the storage backend.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.storage.url.clone())
            .with_namespace(self.storage.namespace.clone())
            .with_database(self.storage.database.clone())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let config = AgentlogConfig::from_toml_str("").unwrap();
        assert_eq!(config, AgentlogConfig::default());
        assert_eq!(config.logger.buffer_capacity, 10_000);
        assert_eq!(config.harness.default_max_concurrency, 4);
        assert!((config.regression.max_relative_score_drop - 0.10).abs() < 1e-12);
        config.validate().unwrap();
    }

    #[test]
    fn sections_parse_from_toml() {
        let config = AgentlogConfig::from_toml_str(
            r#"
            [storage]
            url = "mem://"

            [logger]
            buffer_capacity = 50
            flush_interval_ms = 10

            [retention]
            max_age_hours = 1

            [regression]
            max_relative_score_drop = 0.2

            [[sanitizer.redaction_rules]]
            pattern_name = "internal_ticket"
            regex_pattern = "TICKET-[0-9]+"
            replacement = "[REDACTED]"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.url, "mem://");
        assert_eq!(config.logger.buffer_capacity, 50);
        assert_eq!(config.retention.max_age(), Duration::from_secs(3600));
        assert_eq!(config.sanitizer.redaction_rules.len(), 1);
        assert_eq!(config.sanitizer.max_depth, 8);
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("AGENTLOG_DB_URL", "mem://"),
            ("AGENTLOG_BIND", "0.0.0.0:9000"),
            ("AGENTLOG_BUFFER_CAPACITY", "64"),
            ("AGENTLOG_RETENTION_HOURS", "2"),
            ("AGENTLOG_EXECUTOR_URL", "http://agent:8080/run"),
        ]
        .into_iter()
        .collect();

        let mut config = AgentlogConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.storage.url, "mem://");
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.logger.buffer_capacity, 64);
        assert_eq!(config.retention.max_age_hours, 2);
        assert_eq!(config.executor.url.as_deref(), Some("http://agent:8080/run"));
    }

    #[test]
    fn bad_override_is_reported() {
        let mut config = AgentlogConfig::default();
        let err = config
            .apply_overrides(|k| (k == "AGENTLOG_BUFFER_CAPACITY").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut config = AgentlogConfig::default();
        config.logger.buffer_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AgentlogConfig::default();
        config.regression.min_success_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentlog.toml");
        std::fs::write(&path, "[server]\nbind = \"127.0.0.1:1234\"\n").unwrap();
        let config = AgentlogConfig::load(Some(&path)).unwrap();
        // AGENTLOG_BIND may be set in the environment running the tests.
        if std::env::var("AGENTLOG_BIND").is_err() {
            assert_eq!(config.server.bind, "127.0.0.1:1234");
        }
    }
}
