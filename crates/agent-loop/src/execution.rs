//! Execution Records
//!
//! Durable record of one full cycle and the running statistics derived from
//! all of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::perception::Perception;
use crate::plan::Plan;
use crate::reflection::{ActionResult, Reflection};

/// Unique execution identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One complete Perceive → Plan → Act → Reflect cycle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
    pub perception: Perception,
    pub plan: Plan,
    pub results: Vec<ActionResult>,
    pub reflection: Reflection,
    /// Value of the last successful non-reflect step, `null` if none
    pub final_output: Value,
    /// Quality reached the controller's success threshold
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Execution {
    /// Output derived from a cycle's results
    pub fn derive_output(results: &[ActionResult]) -> Value {
        results
            .iter()
            .rev()
            .filter(|r| !r.is_reflection())
            .find_map(ActionResult::value)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Wall-clock duration of the cycle
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Aggregate performance across cycles
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub average_quality: f64,
    quality_sum: f64,
}

impl RunningStats {
    /// Fold one reflection's quality in
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, quality_score: f64, success_threshold: f64) {
        self.total_runs += 1;
        if quality_score >= success_threshold {
            self.successful_runs += 1;
        }
        self.quality_sum += quality_score;
        self.average_quality = self.quality_sum / self.total_runs as f64;
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.successful_runs as f64 / self.total_runs as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::plan::PlanStep;
    use crate::reflection::Outcome;
    use serde_json::json;

    #[test]
    fn test_stats_mean_and_threshold() {
        let mut stats = RunningStats::default();
        for q in [5.0, 1.0, 3.0, 2.5] {
            stats.record(q, 3.0);
        }
        assert_eq!(stats.total_runs, 4);
        assert_eq!(stats.successful_runs, 2);
        assert!((stats.average_quality - 2.875).abs() < 1e-12);
        assert!((stats.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_stats() {
        let stats = RunningStats::default();
        assert_eq!(stats.total_runs, 0);
        assert!((stats.success_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_derive_output_skips_reflection_and_failures() {
        let results = vec![
            ActionResult::new(0, PlanStep::respond(1), Outcome::success(json!("answer"))),
            ActionResult::new(
                1,
                PlanStep::respond(2),
                Outcome::failure(FailureKind::ToolExecution, "x"),
            ),
            ActionResult::new(2, PlanStep::reflect(3), Outcome::success(json!({"completed": 1}))),
        ];
        assert_eq!(Execution::derive_output(&results), json!("answer"));
        assert_eq!(Execution::derive_output(&[]), Value::Null);
    }

    #[test]
    fn test_execution_ids_unique() {
        assert_ne!(ExecutionId::new(), ExecutionId::new());
    }
}
