//! Scoring of execution output against a task's weighted criteria.

use std::collections::HashSet;

use serde_json::Value;

use super::executor::ExecutionOutput;
use crate::domain::BenchmarkTaskCase;

/// Turns an execution's output into a score in [0, 1].
pub trait Scorer: Send + Sync {
    fn score(&self, task: &BenchmarkTaskCase, output: &ExecutionOutput) -> f64;
}

/// Weighted sum over `scoring_criteria`.
///
/// Each criterion takes the executor-reported score when present (clamped to
/// [0, 1]); otherwise the token-overlap F1 between the output text and
/// `expected_output`; otherwise 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedCriteriaScorer;

impl Scorer for WeightedCriteriaScorer {
    fn score(&self, task: &BenchmarkTaskCase, output: &ExecutionOutput) -> f64 {
        let fallback = task
            .expected_output
            .as_deref()
            .map(|expected| token_f1(&output_text(&output.output), expected))
            .unwrap_or(0.0);

        let total: f64 = task
            .scoring_criteria
            .iter()
            .map(|(criterion, weight)| {
                let s = output
                    .scores
                    .get(criterion)
                    .copied()
                    .filter(|s| s.is_finite())
                    .map(|s| s.clamp(0.0, 1.0))
                    .unwrap_or(fallback);
                weight * s
            })
            .sum();

        if total.is_nan() {
            0.0
        } else {
            total.clamp(0.0, 1.0)
        }
    }
}

fn output_text(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(map) => ["text", "answer", "output", "summary"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| output.to_string()),
        other => other.to_string(),
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// F1 over unique lowercase word tokens.
pub fn token_f1(candidate: &str, reference: &str) -> f64 {
    let cand: HashSet<String> = tokens(candidate).into_iter().collect();
    let refr: HashSet<String> = tokens(reference).into_iter().collect();
    if cand.is_empty() || refr.is_empty() {
        return if cand.is_empty() && refr.is_empty() { 1.0 } else { 0.0 };
    }
    let overlap = cand.intersection(&refr).count() as f64;
    if overlap == 0.0 {
        return 0.0;
    }
    let precision = overlap / cand.len() as f64;
    let recall = overlap / refr.len() as f64;
    2.0 * precision * recall / (precision + recall)
}
