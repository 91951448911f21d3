//! Action Results and Reflection
//!
//! What Act produced and how Reflect judged it. Scoring is a pluggable
//! [`Evaluator`]; [`HeuristicEvaluator`] is the deterministic fallback and
//! never fails.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FailureKind, Result};
use crate::plan::{Action, PlanStep};

/// Upper bound of the quality scale
pub const MAX_QUALITY: f64 = 5.0;

/// Result of executing one step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { value: Value },
    Failure { kind: FailureKind, message: String },
}

impl Outcome {
    pub const fn success(value: Value) -> Self {
        Self::Success { value }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }
}

/// Output of one plan step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Position of the step in its plan
    pub step_index: usize,
    pub step: PlanStep,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl ActionResult {
    pub fn new(step_index: usize, step: PlanStep, outcome: Outcome) -> Self {
        Self {
            step_index,
            step,
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub const fn value(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success { value } => Some(value),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { message, .. } => Some(message),
        }
    }

    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }

    pub const fn is_reflection(&self) -> bool {
        matches!(self.step.action, Action::Reflect)
    }
}

/// `successes / total`, or 0 for no results
#[allow(clippy::cast_precision_loss)]
pub fn success_rate(results: &[ActionResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let successes = results.iter().filter(|r| r.is_success()).count();
    successes as f64 / results.len() as f64
}

/// Qualitative scoring produced by an evaluator
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub quality_score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub next_actions: Vec<String>,
    pub confidence: f64,
}

impl Assessment {
    pub const fn is_finite(&self) -> bool {
        self.quality_score.is_finite() && self.confidence.is_finite()
    }
}

/// Where a reflection's scores came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionSource {
    Evaluator,
    Heuristic,
}

/// Evaluation of a completed cycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub success_rate: f64,
    pub total_steps: usize,
    pub successful_steps: usize,
    /// 0..=5
    pub quality_score: f64,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub next_actions: Vec<String>,
    /// 0..=1
    pub confidence: f64,
    pub source: ReflectionSource,
    pub timestamp: DateTime<Utc>,
}

impl Reflection {
    /// Combine mechanical counts with an assessment, clamping scores to scale
    pub fn from_assessment(
        results: &[ActionResult],
        assessment: Assessment,
        source: ReflectionSource,
    ) -> Self {
        Self {
            success_rate: success_rate(results),
            total_steps: results.len(),
            successful_steps: results.iter().filter(|r| r.is_success()).count(),
            quality_score: assessment.quality_score.clamp(0.0, MAX_QUALITY),
            strengths: assessment.strengths,
            improvements: assessment.improvements,
            next_actions: assessment.next_actions,
            confidence: assessment.confidence.clamp(0.0, 1.0),
            source,
            timestamp: Utc::now(),
        }
    }
}

/// Scoring capability
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn score(
        &self,
        results: &[ActionResult],
        expected_outcome: Option<&str>,
    ) -> Result<Assessment>;
}

/// Deterministic scoring from success rate and expected-outcome match
///
/// quality = 4 × success rate, +1 when the expected outcome shows up in a
/// successful result (or, with no expectation, when every step succeeded).
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicEvaluator;

impl HeuristicEvaluator {
    pub fn assess(results: &[ActionResult], expected_outcome: Option<&str>) -> Assessment {
        let rate = success_rate(results);
        let failed: Vec<&ActionResult> = results.iter().filter(|r| !r.is_success()).collect();

        let expected_outcome = expected_outcome.map(str::trim).filter(|e| !e.is_empty());
        let matched = expected_outcome.map(|expected| {
            let needle = expected.to_lowercase();
            results
                .iter()
                .filter_map(ActionResult::value)
                .any(|value| value_text(value).to_lowercase().contains(&needle))
        });

        let bonus = match matched {
            Some(true) => 1.0,
            Some(false) => 0.0,
            None if !results.is_empty() && failed.is_empty() => 1.0,
            None => 0.0,
        };

        let mut strengths = Vec::new();
        let mut improvements = Vec::new();
        let mut next_actions = Vec::new();

        if results.is_empty() {
            improvements.push("No steps were executed".to_string());
        } else if failed.is_empty() {
            strengths.push(format!("All {} steps completed", results.len()));
        } else {
            strengths.push(format!(
                "{} of {} steps completed",
                results.len() - failed.len(),
                results.len()
            ));
        }

        for result in &failed {
            improvements.push(format!(
                "Step '{}' failed: {}",
                result.step.description,
                result.error().unwrap_or("unknown error")
            ));
            if let Some(tool) = result.step.tool() {
                next_actions.push(format!("Check the {tool} tool"));
            }
        }

        match matched {
            Some(true) => strengths.push("Expected outcome reached".to_string()),
            Some(false) => {
                improvements.push("Expected outcome not found in results".to_string());
                next_actions.push("Revise the plan towards the expected outcome".to_string());
            }
            None => {}
        }

        Assessment {
            quality_score: 4.0f64.mul_add(rate, bonus).min(MAX_QUALITY),
            strengths,
            improvements,
            next_actions,
            confidence: (0.4f64.mul_add(rate, 0.5) + if matched == Some(true) { 0.1 } else { 0.0 })
                .min(1.0),
        }
    }
}

#[async_trait]
impl Evaluator for HeuristicEvaluator {
    async fn score(
        &self,
        results: &[ActionResult],
        expected_outcome: Option<&str>,
    ) -> Result<Assessment> {
        Ok(Self::assess(results, expected_outcome))
    }
}

/// Text form of a result value used for matching
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
