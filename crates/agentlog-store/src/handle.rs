//! SurrealDB connection handle
//!
//! Resolves a connection URL (in-memory, local file or remote WebSocket),
//! selects the namespace/database, runs schema setup and hands out the
//! SurrealDB-backed stores that share the connection.

use std::path::Path;

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StorageError;
use crate::migrations;
use crate::storage_traits::StorageResult;
use crate::surreal_store::{SurrealBenchmarkStore, SurrealEventStore};

/// Connection settings for the SurrealDB backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// `mem://`, `surrealkv://<path>`, or a `ws://` / `wss://` endpoint
    pub url: String,
    pub namespace: String,
    pub database: String,
    /// Root credentials for remote endpoints
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: "agentlog".to_string(),
            database: "main".to_string(),
            username: None,
            password: None,
        }
    }

    /// Ephemeral in-process database.
    pub fn in_memory() -> Self {
        Self::new("mem://")
    }

    /// Durable embedded database stored under `path`.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::new(format!("surrealkv://{}", path.as_ref().display()))
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - AGENTLOG_DB_URL (optional, default: "mem://")
    /// - AGENTLOG_DB_NAMESPACE (optional, default: "agentlog")
    /// - AGENTLOG_DB_DATABASE (optional, default: "main")
    /// - AGENTLOG_DB_USERNAME / AGENTLOG_DB_PASSWORD (optional, root sign-in)
    pub fn from_env() -> Self {
        let url = std::env::var("AGENTLOG_DB_URL").unwrap_or_else(|_| "mem://".to_string());
        let mut config = Self::new(url);
        if let Ok(ns) = std::env::var("AGENTLOG_DB_NAMESPACE") {
            config.namespace = ns;
        }
        if let Ok(db) = std::env::var("AGENTLOG_DB_DATABASE") {
            config.database = db;
        }
        if let (Ok(user), Ok(pass)) = (
            std::env::var("AGENTLOG_DB_USERNAME"),
            std::env::var("AGENTLOG_DB_PASSWORD"),
        ) {
            config = config.with_credentials(user, pass);
        }
        config
    }

    fn local_path(&self) -> Option<&str> {
        self.url
            .strip_prefix("surrealkv://")
            .or_else(|| self.url.strip_prefix("rocksdb://"))
    }
}

/// Shared SurrealDB connection for agentlog.
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

impl SurrealHandle {
    /// Connect, select namespace/database and initialize the schema.
    #[instrument(skip(config), fields(url = %config.url, namespace = %config.namespace))]
    pub async fn connect(config: &StoreConfig) -> StorageResult<Self> {
        if let Some(path) = config.local_path() {
            std::fs::create_dir_all(path).map_err(|e| {
                StorageError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(config.url.as_str())
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {}: {}", config.url, e)))?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            db.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await
            .map_err(|e| StorageError::Connection(format!("Root auth failed: {e}")))?;
        }

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!(url = %config.url, ns = %config.namespace, db = %config.database, "SurrealDB connected");
        Ok(Self { db })
    }

    /// Connect to a fresh in-memory database.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect(&StoreConfig::in_memory()).await
    }

    pub fn event_store(&self) -> SurrealEventStore {
        SurrealEventStore::new(self.db.clone())
    }

    pub fn benchmark_store(&self) -> SurrealBenchmarkStore {
        SurrealBenchmarkStore::new(self.db.clone())
    }

    /// Raw database handle.
    pub fn db(&self) -> &Surreal<Any> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_uses_surrealkv_scheme() {
        let config = StoreConfig::file("/tmp/agentlog-db");
        assert_eq!(config.url, "surrealkv:///tmp/agentlog-db");
        assert_eq!(config.local_path(), Some("/tmp/agentlog-db"));
        assert_eq!(StoreConfig::in_memory().local_path(), None);
    }

    #[tokio::test]
    async fn in_memory_handle_initializes_schema_twice() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        migrations::init_schema(handle.db()).await.unwrap();
    }
}
