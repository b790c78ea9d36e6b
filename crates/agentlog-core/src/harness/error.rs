//! Harness error types.

use agentlog_store::StorageError;

use crate::domain::ValidationError;

/// Errors from registration and run management. Per-execution failures are
/// never surfaced here; they are recorded as unsuccessful results.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("task already registered: {task_id}")]
    DuplicateTask { task_id: String },

    #[error("configuration already registered: {name}")]
    DuplicateConfiguration { name: String },

    #[error("unknown task: {task_id}")]
    UnknownTask { task_id: String },

    #[error("unknown configuration: {name}")]
    UnknownConfiguration { name: String },

    #[error("invalid benchmark definition: {0}")]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to load benchmark catalog: {0}")]
    Catalog(String),

    #[error("benchmark run task failed: {0}")]
    Join(String),
}

impl HarnessError {
    /// Stable machine-readable code, matching `CoreError::code`.
    pub fn code(&self) -> &'static str {
        match self {
            HarnessError::DuplicateTask { .. } | HarnessError::DuplicateConfiguration { .. } => {
                "duplicate"
            }
            HarnessError::UnknownTask { .. } | HarnessError::UnknownConfiguration { .. } => {
                "not_found"
            }
            HarnessError::Validation(_) => "validation_failed",
            HarnessError::Storage(StorageError::RunNotFound { .. }) => "not_found",
            HarnessError::Storage(_) => "storage_error",
            HarnessError::Catalog(_) => "config_error",
            HarnessError::Join(_) => "executor_error",
        }
    }
}

/// Failure of a single execution against the agent under test.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    #[error("request to executor failed: {0}")]
    Request(String),

    #[error("executor returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("executor returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("execution failed: {0}")]
    Failed(String),
}

impl ExecutorError {
    /// Short name stored as a result's `error_type`.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorError::Request(_) => "ExecutorRequest",
            ExecutorError::Status { .. } => "ExecutorStatus",
            ExecutorError::InvalidResponse(_) => "InvalidResponse",
            ExecutorError::Failed(_) => "ExecutionFailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_kinds() {
        let err = HarnessError::UnknownTask {
            task_id: "t".into(),
        };
        assert_eq!(err.code(), "not_found");
        assert!(err.to_string().contains("t"));

        let err = ExecutorError::Status {
            status: 503,
            body: "busy".into(),
        };
        assert_eq!(err.kind(), "ExecutorStatus");
        assert!(err.to_string().contains("503"));
    }
}
