//! Statistics, configuration ranking and regression detection over
//! benchmark results.
//!
//! All functions are pure: they take result slices and return owned values,
//! with deterministic output ordering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use agentlog_store::BenchmarkResult;

/// Per-(task, configuration) statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub task_id: String,
    pub config_name: String,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation.
    pub stddev: f64,
    pub success_rate: f64,
    pub mean_duration_ms: f64,
}

type PairKey = (String, String);

fn group(results: &[BenchmarkResult]) -> BTreeMap<PairKey, Vec<&BenchmarkResult>> {
    let mut groups: BTreeMap<PairKey, Vec<&BenchmarkResult>> = BTreeMap::new();
    for r in results {
        groups
            .entry((r.task_id.clone(), r.config_name.clone()))
            .or_default()
            .push(r);
    }
    groups
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn stats_for(task_id: &str, config_name: &str, group: &[&BenchmarkResult]) -> SummaryStats {
    let scores: Vec<f64> = group.iter().map(|r| r.score).collect();
    let durations: Vec<f64> = group.iter().map(|r| r.duration_ms).collect();
    let m = mean(&scores);
    let successes = group.iter().filter(|r| r.success).count();
    SummaryStats {
        task_id: task_id.to_string(),
        config_name: config_name.to_string(),
        count: group.len(),
        mean: m,
        median: median(&scores),
        stddev: stddev(&scores, m),
        success_rate: if group.is_empty() {
            0.0
        } else {
            successes as f64 / group.len() as f64
        },
        mean_duration_ms: mean(&durations),
    }
}

/// Statistics per (task_id, config_name), ordered by that key.
pub fn summary_stats(results: &[BenchmarkResult]) -> Vec<SummaryStats> {
    group(results)
        .iter()
        .map(|((task, config), g)| stats_for(task, config, g))
        .collect()
}

/// One configuration's standing on one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedConfiguration {
    pub rank: usize,
    pub config_name: String,
    pub mean_score: f64,
    pub mean_duration_ms: f64,
    pub success_rate: f64,
}

/// Ranking of configurations for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRanking {
    pub task_id: String,
    pub configurations: Vec<RankedConfiguration>,
}

/// Rank configurations per task by mean score, descending. Ties go to the
/// lower mean duration, then to the configuration name.
pub fn compare(results: &[BenchmarkResult]) -> Vec<TaskRanking> {
    let mut by_task: BTreeMap<String, Vec<SummaryStats>> = BTreeMap::new();
    for s in summary_stats(results) {
        by_task.entry(s.task_id.clone()).or_default().push(s);
    }

    by_task
        .into_iter()
        .map(|(task_id, mut stats)| {
            stats.sort_by(|a, b| {
                b.mean
                    .total_cmp(&a.mean)
                    .then(a.mean_duration_ms.total_cmp(&b.mean_duration_ms))
                    .then_with(|| a.config_name.cmp(&b.config_name))
            });
            let configurations = stats
                .into_iter()
                .enumerate()
                .map(|(i, s)| RankedConfiguration {
                    rank: i + 1,
                    config_name: s.config_name,
                    mean_score: s.mean,
                    mean_duration_ms: s.mean_duration_ms,
                    success_rate: s.success_rate,
                })
                .collect();
            TaskRanking {
                task_id,
                configurations,
            }
        })
        .collect()
}

/// Regression policy (the `[regression]` config section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionThresholds {
    /// Alert when the mean score falls by more than this fraction of the
    /// baseline mean.
    pub max_relative_score_drop: f64,
    /// Alert when the success rate falls below this floor (and below the
    /// baseline).
    pub min_success_rate: f64,
}

impl Default for RegressionThresholds {
    fn default() -> Self {
        Self {
            max_relative_score_drop: 0.10,
            min_success_rate: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionKind {
    ScoreDrop,
    SuccessRate,
    /// Pair present in the baseline but missing from the current results.
    Coverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionAlert {
    pub task_id: String,
    pub config_name: String,
    pub kind: RegressionKind,
    pub metric: String,
    pub baseline_value: f64,
    pub current_value: f64,
    /// `(current - baseline) / baseline`; negative for a drop.
    pub relative_change: f64,
    pub severity: Severity,
}

fn score_drop_severity(drop: f64, threshold: f64) -> Severity {
    if drop >= 0.5 {
        Severity::Critical
    } else if drop >= 0.25 {
        Severity::High
    } else if drop >= 2.0 * threshold {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn relative_change(baseline: f64, current: f64) -> f64 {
    if baseline == 0.0 {
        0.0
    } else {
        (current - baseline) / baseline
    }
}

/// Compare `current` against `baseline` per (task_id, config_name).
///
/// Rules, per pair present in both sets:
/// - score drop: baseline mean > 0 and relative decrease > threshold;
/// - success rate: current rate below the floor and below the baseline rate.
///
/// Pairs present only in the baseline yield one coverage alert each. Alerts
/// are ordered by (task, config, kind).
pub fn detect_regressions(
    baseline: &[BenchmarkResult],
    current: &[BenchmarkResult],
    thresholds: &RegressionThresholds,
) -> Vec<RegressionAlert> {
    let base = group(baseline);
    let cur = group(current);
    let mut alerts = Vec::new();

    for ((task_id, config_name), base_group) in &base {
        let b = stats_for(task_id, config_name, base_group);
        let Some(cur_group) = cur.get(&(task_id.clone(), config_name.clone())) else {
            alerts.push(RegressionAlert {
                task_id: task_id.clone(),
                config_name: config_name.clone(),
                kind: RegressionKind::Coverage,
                metric: "result_count".to_string(),
                baseline_value: b.count as f64,
                current_value: 0.0,
                relative_change: -1.0,
                severity: Severity::Medium,
            });
            continue;
        };
        let c = stats_for(task_id, config_name, cur_group);

        if b.mean > 0.0 {
            let drop = (b.mean - c.mean) / b.mean;
            if drop > thresholds.max_relative_score_drop {
                alerts.push(RegressionAlert {
                    task_id: task_id.clone(),
                    config_name: config_name.clone(),
                    kind: RegressionKind::ScoreDrop,
                    metric: "mean_score".to_string(),
                    baseline_value: b.mean,
                    current_value: c.mean,
                    relative_change: -drop,
                    severity: score_drop_severity(drop, thresholds.max_relative_score_drop),
                });
            }
        }

        if c.success_rate < thresholds.min_success_rate && c.success_rate < b.success_rate {
            alerts.push(RegressionAlert {
                task_id: task_id.clone(),
                config_name: config_name.clone(),
                kind: RegressionKind::SuccessRate,
                metric: "success_rate".to_string(),
                baseline_value: b.success_rate,
                current_value: c.success_rate,
                relative_change: relative_change(b.success_rate, c.success_rate),
                severity: if c.success_rate == 0.0 {
                    Severity::Critical
                } else {
                    Severity::High
                },
            });
        }
    }

    alerts.sort_by(|a, b| {
        (&a.task_id, &a.config_name, a.kind).cmp(&(&b.task_id, &b.config_name, b.kind))
    });
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlog_store::RunId;
    use chrono::Utc;
    use serde_json::Value;

    fn result(task: &str, config: &str, score: f64, success: bool, duration_ms: f64) -> BenchmarkResult {
        let now = Utc::now();
        BenchmarkResult {
            run_id: RunId("r".into()),
            task_id: task.into(),
            config_name: config.into(),
            started_at: now,
            finished_at: now,
            success,
            score,
            raw_output: Value::Null,
            error: None,
            error_type: None,
            duration_ms,
        }
    }

    #[test]
    fn stats_per_pair() {
        let results = vec![
            result("t", "a", 0.2, true, 10.0),
            result("t", "a", 0.4, true, 20.0),
            result("t", "a", 0.9, false, 30.0),
            result("t", "b", 1.0, true, 5.0),
        ];
        let stats = summary_stats(&results);
        assert_eq!(stats.len(), 2);
        let a = &stats[0];
        assert_eq!(a.config_name, "a");
        assert_eq!(a.count, 3);
        assert!((a.mean - 0.5).abs() < 1e-9);
        assert!((a.median - 0.4).abs() < 1e-9);
        assert!((a.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((a.mean_duration_ms - 20.0).abs() < 1e-9);
        let expected_sd = ((0.09 + 0.01 + 0.16) / 3.0f64).sqrt();
        assert!((a.stddev - expected_sd).abs() < 1e-9);
        assert_eq!(stats[1].stddev, 0.0);
    }

    #[test]
    fn even_count_median() {
        assert!((median(&[0.1, 0.9, 0.3, 0.5]) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn compare_breaks_ties_by_duration() {
        let results = vec![
            result("t", "slow", 0.8, true, 100.0),
            result("t", "fast", 0.8, true, 10.0),
            result("t", "best", 0.9, true, 500.0),
        ];
        let ranking = compare(&results);
        let order: Vec<_> = ranking[0]
            .configurations
            .iter()
            .map(|c| (c.rank, c.config_name.as_str()))
            .collect();
        assert_eq!(order, vec![(1, "best"), (2, "fast"), (3, "slow")]);
    }

    #[test]
    fn identical_sets_have_no_alerts() {
        let results = vec![
            result("t1", "a", 0.8, true, 1.0),
            result("t1", "b", 0.3, false, 1.0),
            result("t2", "a", 0.0, false, 1.0),
        ];
        let alerts = detect_regressions(&results, &results, &RegressionThresholds::default());
        assert!(alerts.is_empty());
    }

    #[test]
    fn one_pair_drop_yields_one_alert() {
        let baseline = vec![
            result("t1", "a", 0.8, true, 1.0),
            result("t1", "b", 0.6, true, 1.0),
        ];
        let current = vec![
            result("t1", "a", 0.5, true, 1.0),
            result("t1", "b", 0.6, true, 1.0),
        ];
        let alerts = detect_regressions(&baseline, &current, &RegressionThresholds::default());
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.kind, RegressionKind::ScoreDrop);
        assert_eq!(alert.config_name, "a");
        assert!((alert.relative_change + 0.375).abs() < 1e-9);
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn drop_within_threshold_is_ignored() {
        let baseline = vec![result("t", "a", 0.80, true, 1.0)];
        let current = vec![result("t", "a", 0.75, true, 1.0)];
        assert!(detect_regressions(&baseline, &current, &RegressionThresholds::default()).is_empty());
    }

    #[test]
    fn success_rate_floor() {
        let baseline = vec![result("t", "a", 0.0, true, 1.0), result("t", "a", 0.0, true, 1.0)];
        let current = vec![result("t", "a", 0.0, false, 1.0), result("t", "a", 0.0, false, 1.0)];
        let alerts = detect_regressions(&baseline, &current, &RegressionThresholds::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, RegressionKind::SuccessRate);
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn missing_pair_is_coverage_regression() {
        let baseline = vec![result("t", "a", 0.5, true, 1.0), result("t", "b", 0.5, true, 1.0)];
        let current = vec![result("t", "a", 0.5, true, 1.0), result("t", "c", 0.1, true, 1.0)];
        let alerts = detect_regressions(&baseline, &current, &RegressionThresholds::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, RegressionKind::Coverage);
        assert_eq!(alerts[0].config_name, "b");
    }
}
