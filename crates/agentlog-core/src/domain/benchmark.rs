//! Benchmark task cases and configurations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ValidationError;

/// Allowed deviation of a task's scoring weights from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-3;

/// Category of a benchmark task.
///
/// Serialized as a plain string; unrecognized names become `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Summarization,
    DataAnalysis,
    CodeGeneration,
    QuestionAnswering,
    ToolUse,
    Custom(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            TaskType::Summarization => "summarization",
            TaskType::DataAnalysis => "data_analysis",
            TaskType::CodeGeneration => "code_generation",
            TaskType::QuestionAnswering => "question_answering",
            TaskType::ToolUse => "tool_use",
            TaskType::Custom(name) => name,
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "summarization" => TaskType::Summarization,
            "data_analysis" => TaskType::DataAnalysis,
            "code_generation" => TaskType::CodeGeneration,
            "question_answering" => TaskType::QuestionAnswering,
            "tool_use" => TaskType::ToolUse,
            _ => TaskType::Custom(s),
        }
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A standardized benchmark test definition. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTaskCase {
    pub task_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub task_type: TaskType,
    /// Opaque payload handed to the agent under test.
    #[serde(default)]
    pub input_data: Value,
    /// Criterion name to weight; weights sum to 1.0.
    pub scoring_criteria: BTreeMap<String, f64>,
    /// Reference answer used by the default scorer when the executor reports
    /// no per-criterion scores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
}

impl BenchmarkTaskCase {
    pub fn new(
        task_id: impl Into<String>,
        task_type: TaskType,
        scoring_criteria: BTreeMap<String, f64>,
    ) -> Self {
        let task_id = task_id.into();
        Self {
            name: task_id.clone(),
            task_id,
            description: String::new(),
            task_type,
            input_data: Value::Null,
            scoring_criteria,
            expected_output: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input_data = input;
        self
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.task_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "task_id".to_string(),
            });
        }
        if self.scoring_criteria.is_empty() {
            return Err(ValidationError::MissingField {
                field: "scoring_criteria".to_string(),
            });
        }
        if let Some((name, w)) = self
            .scoring_criteria
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(ValidationError::InvalidField {
                field: format!("scoring_criteria.{name}"),
                reason: format!("weight must be a finite number >= 0, got {w}"),
            });
        }
        let sum: f64 = self.scoring_criteria.values().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ValidationError::InvalidWeights {
                task_id: self.task_id.clone(),
                sum,
            });
        }
        Ok(())
    }
}

fn default_temperature() -> f64 {
    0.7
}

/// A named set of execution parameters substituted into a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfiguration {
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Extra executor-specific parameters.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl BenchmarkConfiguration {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "name".to_string(),
            });
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(ValidationError::InvalidField {
                field: "temperature".to_string(),
                reason: format!("must be a finite number >= 0, got {}", self.temperature),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn task_type_serializes_as_string() {
        let json = serde_json::to_string(&TaskType::DataAnalysis).unwrap();
        assert_eq!(json, "\"data_analysis\"");
        let custom: TaskType = serde_json::from_str("\"translation\"").unwrap();
        assert_eq!(custom, TaskType::Custom("translation".into()));
        let known: TaskType = serde_json::from_str("\"code-generation\"").unwrap();
        assert_eq!(known, TaskType::CodeGeneration);
    }

    #[test]
    fn weights_must_sum_to_one() {
        let ok = BenchmarkTaskCase::new(
            "summarize_doc",
            TaskType::Summarization,
            weights(&[("accuracy", 0.6), ("brevity", 0.4)]),
        );
        assert!(ok.validate().is_ok());

        let bad = BenchmarkTaskCase::new(
            "summarize_doc",
            TaskType::Summarization,
            weights(&[("accuracy", 0.6), ("brevity", 0.3)]),
        );
        assert!(matches!(
            bad.validate(),
            Err(ValidationError::InvalidWeights { .. })
        ));

        let negative = BenchmarkTaskCase::new(
            "t",
            TaskType::ToolUse,
            weights(&[("a", 1.5), ("b", -0.5)]),
        );
        assert!(matches!(
            negative.validate(),
            Err(ValidationError::InvalidField { .. })
        ));
    }

    #[test]
    fn configuration_requires_name() {
        assert!(BenchmarkConfiguration::new("", "m").validate().is_err());
        assert!(BenchmarkConfiguration::new("fast", "small-model")
            .with_max_tokens(256)
            .validate()
            .is_ok());
    }
}
