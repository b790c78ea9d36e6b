//! Benchmark run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agentlog_store::{BenchmarkResult, BenchmarkRunStatus, RunId};

use crate::analysis::{
    compare, detect_regressions, summary_stats, RegressionAlert, RegressionThresholds,
    SummaryStats, TaskRanking,
};

/// Summary, rankings and (optionally) regressions for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_run_id: Option<RunId>,
    pub generated_at: DateTime<Utc>,
    pub status: BenchmarkRunStatus,
    pub total_results: usize,
    pub summaries: Vec<SummaryStats>,
    pub rankings: Vec<TaskRanking>,
    pub alerts: Vec<RegressionAlert>,
}

impl BenchmarkReport {
    /// Build a report. Alerts are computed only when a baseline is given.
    pub fn build(
        run_id: RunId,
        status: BenchmarkRunStatus,
        results: &[BenchmarkResult],
        baseline: Option<(RunId, &[BenchmarkResult])>,
        thresholds: &RegressionThresholds,
    ) -> Self {
        let (baseline_run_id, alerts) = match baseline {
            Some((id, base)) => (Some(id), detect_regressions(base, results, thresholds)),
            None => (None, Vec::new()),
        };
        Self {
            run_id,
            baseline_run_id,
            generated_at: Utc::now(),
            status,
            total_results: results.len(),
            summaries: summary_stats(results),
            rankings: compare(results),
            alerts,
        }
    }

    pub fn has_regressions(&self) -> bool {
        !self.alerts.is_empty()
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Benchmark Report\n\n");
        out.push_str(&format!(
            "- run: `{}`\n- status: {}\n- results: {}\n- generated: {}\n",
            self.run_id,
            self.status,
            self.total_results,
            self.generated_at.to_rfc3339()
        ));
        if let Some(baseline) = &self.baseline_run_id {
            out.push_str(&format!("- baseline: `{}`\n", baseline));
        }
        out.push('\n');

        out.push_str("## Summary\n\n");
        if self.summaries.is_empty() {
            out.push_str("_no results_\n\n");
        } else {
            out.push_str("| task | config | n | mean | median | stddev | success | mean ms |\n");
            out.push_str("|---|---|---|---|---|---|---|---|\n");
            for s in &self.summaries {
                out.push_str(&format!(
                    "| {} | {} | {} | {:.3} | {:.3} | {:.3} | {:.0}% | {:.1} |\n",
                    s.task_id,
                    s.config_name,
                    s.count,
                    s.mean,
                    s.median,
                    s.stddev,
                    s.success_rate * 100.0,
                    s.mean_duration_ms
                ));
            }
            out.push('\n');
        }

        if !self.rankings.is_empty() {
            out.push_str("## Rankings\n");
            for ranking in &self.rankings {
                out.push_str(&format!("\n### {}\n", ranking.task_id));
                for c in &ranking.configurations {
                    out.push_str(&format!(
                        "{}. `{}` (score {:.3}, {:.1} ms)\n",
                        c.rank, c.config_name, c.mean_score, c.mean_duration_ms
                    ));
                }
            }
            out.push('\n');
        }

        if self.baseline_run_id.is_some() {
            out.push_str("## Regressions\n");
            if self.alerts.is_empty() {
                out.push_str("- none\n");
            }
            for a in &self.alerts {
                out.push_str(&format!(
                    "- **{}** `{}` / `{}`: {} {:.3} -> {:.3} ({:+.1}%)\n",
                    a.severity.as_str(),
                    a.task_id,
                    a.config_name,
                    a.metric,
                    a.baseline_value,
                    a.current_value,
                    a.relative_change * 100.0
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn result(run: &str, config: &str, score: f64) -> BenchmarkResult {
        let now = Utc::now();
        BenchmarkResult {
            run_id: RunId(run.into()),
            task_id: "summarize_doc".into(),
            config_name: config.into(),
            started_at: now,
            finished_at: now,
            success: true,
            score,
            raw_output: Value::Null,
            error: None,
            error_type: None,
            duration_ms: 5.0,
        }
    }

    #[test]
    fn report_without_baseline_has_no_regression_section() {
        let results = vec![result("r1", "fast", 0.7), result("r1", "accurate", 0.9)];
        let report = BenchmarkReport::build(
            RunId("r1".into()),
            BenchmarkRunStatus::Completed,
            &results,
            None,
            &RegressionThresholds::default(),
        );
        assert_eq!(report.total_results, 2);
        assert_eq!(report.rankings[0].configurations[0].config_name, "accurate");
        let md = report.to_markdown();
        assert!(md.contains("# Benchmark Report"));
        assert!(md.contains("| summarize_doc | fast |"));
        assert!(!md.contains("## Regressions"));
    }

    #[test]
    fn report_with_baseline_lists_alerts() {
        let baseline = vec![result("r0", "fast", 0.9)];
        let current = vec![result("r1", "fast", 0.3)];
        let report = BenchmarkReport::build(
            RunId("r1".into()),
            BenchmarkRunStatus::Completed,
            &current,
            Some((RunId("r0".into()), baseline.as_slice())),
            &RegressionThresholds::default(),
        );
        assert!(report.has_regressions());
        let md = report.to_markdown();
        assert!(md.contains("## Regressions"));
        assert!(md.contains("**critical**"));
        assert!(md.contains("baseline: `r0`"));
    }
}
