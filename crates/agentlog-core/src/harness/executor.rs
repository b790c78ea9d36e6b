//! Executor seam: runs one task under one configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::error::ExecutorError;
use crate::domain::{BenchmarkConfiguration, BenchmarkTaskCase};

/// What the agent under test produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Raw output, stored verbatim as the result's `raw_output`.
    pub output: Value,
    /// Optional per-criterion scores in [0, 1], keyed by criterion name.
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

impl ExecutionOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            scores: BTreeMap::new(),
        }
    }

    pub fn with_score(mut self, criterion: impl Into<String>, score: f64) -> Self {
        self.scores.insert(criterion.into(), score);
        self
    }
}

/// Runs a task against a configuration. Implementations must be safe to call
/// concurrently.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        task: &BenchmarkTaskCase,
        config: &BenchmarkConfiguration,
    ) -> Result<ExecutionOutput, ExecutorError>;
}

/// Executor that POSTs `{task, configuration}` to an HTTP endpoint and reads
/// back `{output, scores?}`.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("agentlog/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| ExecutorError::Request(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Interpret an executor response body. A bare non-object body is taken as
/// the output itself.
pub fn parse_response(body: Value) -> Result<ExecutionOutput, ExecutorError> {
    match body {
        Value::Object(mut map) if map.contains_key("output") => {
            let output = map.remove("output").unwrap_or(Value::Null);
            let scores = match map.remove("scores") {
                None | Some(Value::Null) => BTreeMap::new(),
                Some(raw) => serde_json::from_value(raw)
                    .map_err(|e| ExecutorError::InvalidResponse(format!("scores: {e}")))?,
            };
            if let Some(err) = map.get("error").and_then(Value::as_str) {
                return Err(ExecutorError::Failed(err.to_string()));
            }
            Ok(ExecutionOutput { output, scores })
        }
        Value::Object(map) => match map.get("error").and_then(Value::as_str) {
            Some(err) => Err(ExecutorError::Failed(err.to_string())),
            None => Ok(ExecutionOutput::new(Value::Object(map))),
        },
        other => Ok(ExecutionOutput::new(other)),
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(
        &self,
        task: &BenchmarkTaskCase,
        config: &BenchmarkConfiguration,
    ) -> Result<ExecutionOutput, ExecutorError> {
        debug!(task_id = %task.task_id, config = %config.name, endpoint = %self.endpoint, "dispatching execution");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "task": task, "configuration": config }))
            .send()
            .await
            .map_err(|e| ExecutorError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ExecutorError::InvalidResponse(e.to_string()))?;
        parse_response(body)
    }
}
