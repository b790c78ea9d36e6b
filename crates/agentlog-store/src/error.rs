//! Error types for agentlog-store

use thiserror::Error;

/// Errors that can occur in the persistence layer.
///
/// An operation that returns an error has written nothing: appends are atomic.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend connection could not be established
    #[error("storage connection failed: {0}")]
    Connection(String),

    /// Schema setup failed
    #[error("schema setup failed: {0}")]
    SchemaSetup(String),

    /// Backend rejected or failed a read/write
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Backend is reachable but cannot accept writes
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("event not found: {event_id}")]
    EventNotFound { event_id: String },

    #[error("benchmark run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// A record with the same unique key already exists
    #[error("duplicate record: {key}")]
    Duplicate { key: String },

    #[error("invalid state for run {run_id}: status is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Stored or supplied value could not be decoded
    #[error("decode failed: {0}")]
    Decode(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
