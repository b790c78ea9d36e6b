//! Domain-level error taxonomy for agentlog.

use agentlog_store::StorageError;

/// Errors produced by event and benchmark-definition validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("field {field} is malformed: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("unknown event type: {value}")]
    UnknownEventType { value: String },

    #[error("unknown log level: {value}")]
    UnknownLevel { value: String },

    #[error("scoring weights for task {task_id} sum to {sum}, expected 1.0")]
    InvalidWeights { task_id: String, sum: f64 },
}

/// agentlog core errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("{operation} timed out after {limit_ms}ms")]
    Timeout { operation: String, limit_ms: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ValidationFailed(_) => "validation_failed",
            CoreError::Storage(StorageError::EventNotFound { .. })
            | CoreError::Storage(StorageError::RunNotFound { .. }) => "not_found",
            CoreError::Storage(StorageError::InvalidCursor(_)) => "invalid_cursor",
            CoreError::Storage(_) => "storage_error",
            CoreError::Executor(_) => "executor_error",
            CoreError::Timeout { .. } => "timeout",
            CoreError::Serialization(_) => "serialization_error",
            CoreError::Config(_) => "config_error",
        }
    }
}

/// Result type for agentlog core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError::InvalidWeights {
            task_id: "summarize_doc".into(),
            sum: 0.7,
        };
        let msg = err.to_string();
        assert!(msg.contains("summarize_doc"));
        assert!(msg.contains("0.7"));
    }

    #[test]
    fn codes_are_stable() {
        let err = CoreError::from(ValidationError::MissingField {
            field: "message".into(),
        });
        assert_eq!(err.code(), "validation_failed");

        let err = CoreError::from(StorageError::RunNotFound {
            run_id: "r".into(),
        });
        assert_eq!(err.code(), "not_found");

        let err = CoreError::Timeout {
            operation: "flush".into(),
            limit_ms: 10,
        };
        assert_eq!(err.code(), "timeout");
        assert!(err.to_string().contains("10ms"));
    }
}
