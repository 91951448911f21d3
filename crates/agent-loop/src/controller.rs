//! Agentic Loop Controller
//!
//! Drives one Perceive → Plan → Act → Reflect cycle per call to
//! [`Controller::run_loop`] and keeps the execution history and running
//! statistics across cycles.
//!
//! Every capability failure is contained at its phase boundary and replaced
//! by a degraded result: the general intent, the single-step fallback plan, a
//! failed [`ActionResult`], or a heuristic [`Reflection`]. Only contract
//! violations reach the caller.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::capability::{ApprovalGate, Responder, StaticApproval, TemplateResponder};
use crate::config::LoopConfig;
use crate::error::{AgentError, FailureKind, Result};
use crate::execution::{Execution, ExecutionId, RunningStats};
use crate::memory::{InMemoryStore, MemoryStore, Metadata};
use crate::perception::{Classifier, Context, Intent, KeywordClassifier, Perception, RECALLED_KEY};
use crate::plan::{Action, IntentTablePlanner, Plan, PlanStep, Planner};
use crate::reflection::{
    ActionResult, Evaluator, HeuristicEvaluator, Outcome, Reflection, ReflectionSource,
};
use crate::tool::{ToolRegistry, ToolResult};

/// Where the controller is within a cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Perceiving,
    Planning,
    Acting,
    Reflecting,
}

/// The agent controller
pub struct Controller {
    classifier: Arc<dyn Classifier>,
    planner: Arc<dyn Planner>,
    evaluator: Option<Arc<dyn Evaluator>>,
    responder: Arc<dyn Responder>,
    approval: Arc<dyn ApprovalGate>,
    tools: Arc<ToolRegistry>,
    memory: Arc<dyn MemoryStore>,
    config: LoopConfig,
    history: Vec<Execution>,
    stats: RunningStats,
    phase: watch::Sender<Phase>,
}

impl Controller {
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    /// Default strategies over the given collaborators
    pub fn with_defaults(tools: Arc<ToolRegistry>, memory: Arc<dyn MemoryStore>) -> Self {
        Self {
            classifier: Arc::new(KeywordClassifier::new()),
            planner: Arc::new(IntentTablePlanner::new()),
            evaluator: None,
            responder: Arc::new(TemplateResponder),
            approval: Arc::new(StaticApproval::default()),
            tools,
            memory,
            config: LoopConfig::default(),
            history: Vec::new(),
            stats: RunningStats::default(),
            phase: watch::channel(Phase::Idle).0,
        }
    }

    /// PERCEIVE: classify the input and gather context. Never fails.
    pub async fn perceive(&self, input: &str, context: Option<Context>) -> Perception {
        let intent = match self.classifier.classify(input).await {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(
                    kind = %FailureKind::Classification,
                    error = %e,
                    "Classifier failed, using general intent"
                );
                Intent::General
            }
        };

        let mut perception = Perception::new(input, intent, &self.config.role);
        if let Some(context) = context {
            perception = perception.with_context(context);
        }

        let query = input.trim();
        if self.config.recall_limit > 0 && !query.is_empty() {
            let recalled = self.memory.search(query, self.config.recall_limit).await;
            if !recalled.is_empty() {
                let entries = recalled
                    .into_iter()
                    .map(|(key, value)| json!({ "key": key, "value": value }))
                    .collect();
                perception.context.insert(RECALLED_KEY.into(), Value::Array(entries));
            }
        }

        tracing::debug!(
            intent = %perception.intent,
            complexity = perception.complexity.get(),
            "Perceived input"
        );
        perception
    }

    /// PLAN: ask the planner for steps and append the terminal reflect step.
    /// Falls back to a single `respond` step if the planner fails or
    /// proposes nothing.
    pub async fn plan(&self, perception: &Perception) -> Plan {
        let plan = match self.planner.propose_steps(perception).await {
            Ok(steps) => Plan::with_reflection(steps).unwrap_or_else(|| {
                tracing::warn!(
                    kind = %FailureKind::Planning,
                    "Planner proposed no steps, using fallback plan"
                );
                Plan::fallback()
            }),
            Err(e) => {
                tracing::warn!(
                    kind = %FailureKind::Planning,
                    error = %e,
                    "Planner failed, using fallback plan"
                );
                Plan::fallback()
            }
        };

        tracing::debug!(steps = plan.len(), fallback = plan.fallback, "Planned");
        plan
    }

    /// ACT: run every step in priority order. A failing step is recorded and
    /// the remaining steps still run.
    pub async fn act(&self, plan: &Plan, perception: &Perception) -> Result<Vec<ActionResult>> {
        if plan.is_empty() {
            return Err(AgentError::Contract("act requires a non-empty plan".into()));
        }

        let mut results = Vec::with_capacity(plan.len());
        for index in plan.execution_order() {
            let step = &plan.steps()[index];
            let outcome = self.execute_step(step, perception, &results).await;

            match &outcome {
                Outcome::Success { .. } => {
                    tracing::debug!(step = index, action = step.action.label(), "Step succeeded");
                }
                Outcome::Failure { kind, message } => {
                    tracing::debug!(
                        step = index,
                        action = step.action.label(),
                        %kind,
                        %message,
                        "Step failed"
                    );
                }
            }

            results.push(ActionResult::new(index, step.clone(), outcome));
        }

        Ok(results)
    }

    async fn execute_step(
        &self,
        step: &PlanStep,
        perception: &Perception,
        prior: &[ActionResult],
    ) -> Outcome {
        match &step.action {
            Action::UseTool { tool, arguments } => {
                match self.tools.invoke(tool, arguments.clone()).await {
                    ToolResult::Success { value, .. } => Outcome::success(value),
                    ToolResult::Failure { kind, message, .. } => Outcome::failure(kind, message),
                }
            }
            Action::Respond => match self.responder.respond(perception, prior).await {
                Ok(text) => Outcome::success(Value::String(text)),
                Err(e) => Outcome::failure(FailureKind::ToolExecution, e.to_string()),
            },
            Action::RequestApproval => match self.approval.approve(step, perception).await {
                Ok(true) => Outcome::success(json!({ "approved": true })),
                Ok(false) => Outcome::failure(FailureKind::ToolExecution, "Approval denied"),
                Err(e) => Outcome::failure(FailureKind::ToolExecution, e.to_string()),
            },
            Action::Reflect => {
                let completed = prior.iter().filter(|r| r.is_success()).count();
                Outcome::success(json!({
                    "completed": completed,
                    "failed": prior.len() - completed,
                }))
            }
        }
    }

    /// REFLECT: mechanical success rate plus evaluator scores, with the
    /// heuristic evaluator standing in when the evaluator is missing, fails,
    /// or returns non-finite numbers.
    pub async fn reflect(
        &self,
        results: &[ActionResult],
        expected_outcome: Option<&str>,
    ) -> Reflection {
        if let Some(evaluator) = &self.evaluator {
            match evaluator.score(results, expected_outcome).await {
                Ok(assessment) if assessment.is_finite() => {
                    return Reflection::from_assessment(
                        results,
                        assessment,
                        ReflectionSource::Evaluator,
                    );
                }
                Ok(_) => {
                    tracing::warn!(
                        kind = %FailureKind::Evaluation,
                        "Evaluator returned non-finite scores, using heuristic"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        kind = %FailureKind::Evaluation,
                        error = %e,
                        "Evaluator failed, using heuristic"
                    );
                }
            }
        }

        Reflection::from_assessment(
            results,
            HeuristicEvaluator::assess(results, expected_outcome),
            ReflectionSource::Heuristic,
        )
    }

    /// Run one full cycle
    pub async fn run_loop(
        &mut self,
        input: &str,
        expected_outcome: Option<&str>,
    ) -> Result<Execution> {
        self.run_loop_with_context(input, None, expected_outcome).await
    }

    /// Run one full cycle with caller context merged into the perception
    pub async fn run_loop_with_context(
        &mut self,
        input: &str,
        context: Option<Context>,
        expected_outcome: Option<&str>,
    ) -> Result<Execution> {
        let result = self.cycle(input, context, expected_outcome).await;
        self.enter(Phase::Idle);
        result
    }

    async fn cycle(
        &mut self,
        input: &str,
        context: Option<Context>,
        expected_outcome: Option<&str>,
    ) -> Result<Execution> {
        let started_at = Utc::now();
        let id = ExecutionId::new();
        tracing::debug!(execution = %id, role = %self.config.role, "Starting agentic loop");

        self.enter(Phase::Perceiving);
        let perception = self.perceive(input, context).await;
        self.enter(Phase::Planning);
        let plan = self.plan(&perception).await;
        self.enter(Phase::Acting);
        let results = self.act(&plan, &perception).await?;
        self.enter(Phase::Reflecting);
        let reflection = self.reflect(&results, expected_outcome).await;

        let execution = Execution {
            id,
            input: input.to_string(),
            expected_outcome: expected_outcome.map(str::to_string),
            final_output: Execution::derive_output(&results),
            success: reflection.quality_score >= self.config.success_threshold,
            perception,
            plan,
            results,
            reflection,
            started_at,
            finished_at: Utc::now(),
        };

        self.record(&execution).await;

        tracing::info!(
            execution = %execution.id,
            intent = %execution.perception.intent,
            steps = execution.results.len(),
            quality = execution.reflection.quality_score,
            success_rate = execution.reflection.success_rate,
            "Agentic loop completed"
        );

        Ok(execution)
    }

    fn enter(&self, phase: Phase) {
        tracing::trace!(?phase, "Phase transition");
        self.phase.send_replace(phase);
    }

    async fn record(&mut self, execution: &Execution) {
        self.stats
            .record(execution.reflection.quality_score, self.config.success_threshold);
        self.history.push(execution.clone());

        if self.config.remember_executions && !execution.final_output.is_null() {
            let key = format!("{}:{}", execution.perception.intent, execution.input.trim());
            let mut metadata = Metadata::new();
            metadata.insert("execution_id".into(), json!(execution.id.as_str()));
            metadata.insert("quality_score".into(), json!(execution.reflection.quality_score));
            metadata.insert("success".into(), json!(execution.success));
            self.memory
                .put(&key, execution.final_output.clone(), Some(metadata))
                .await;
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Phase updates, observable from other tasks while a cycle runs
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// All executions, oldest first
    pub fn history(&self) -> &[Execution] {
        &self.history
    }

    pub fn last_execution(&self) -> Option<&Execution> {
        self.history.last()
    }

    pub const fn stats(&self) -> &RunningStats {
        &self.stats
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn memory(&self) -> &dyn MemoryStore {
        self.memory.as_ref()
    }

    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }
}

/// Builder for a [`Controller`]
#[derive(Default)]
pub struct ControllerBuilder {
    classifier: Option<Arc<dyn Classifier>>,
    planner: Option<Arc<dyn Planner>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    responder: Option<Arc<dyn Responder>>,
    approval: Option<Arc<dyn ApprovalGate>>,
    tools: Option<Arc<ToolRegistry>>,
    memory: Option<Arc<dyn MemoryStore>>,
    config: LoopConfig,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn classifier<C: Classifier + 'static>(mut self, classifier: C) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    #[must_use]
    pub fn planner<P: Planner + 'static>(mut self, planner: P) -> Self {
        self.planner = Some(Arc::new(planner));
        self
    }

    #[must_use]
    pub fn evaluator<E: Evaluator + 'static>(mut self, evaluator: E) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    #[must_use]
    pub fn responder<R: Responder + 'static>(mut self, responder: R) -> Self {
        self.responder = Some(Arc::new(responder));
        self
    }

    #[must_use]
    pub fn approval_gate<G: ApprovalGate + 'static>(mut self, gate: G) -> Self {
        self.approval = Some(Arc::new(gate));
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    #[must_use]
    pub fn memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    #[must_use]
    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.config.role = role.into();
        self
    }

    #[must_use]
    pub const fn success_threshold(mut self, threshold: f64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn build(self) -> Result<Controller> {
        self.config.validate()?;

        let tools = self.tools.unwrap_or_default();
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));

        let mut controller = Controller::with_defaults(tools, memory);
        controller.config = self.config;
        if let Some(classifier) = self.classifier {
            controller.classifier = classifier;
        }
        if let Some(planner) = self.planner {
            controller.planner = planner;
        }
        if let Some(responder) = self.responder {
            controller.responder = responder;
        }
        if let Some(approval) = self.approval {
            controller.approval = approval;
        }
        controller.evaluator = self.evaluator;

        Ok(controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::CalculatorTool;
    use async_trait::async_trait;

    struct BrokenClassifier;

    #[async_trait]
    impl Classifier for BrokenClassifier {
        async fn classify(&self, _text: &str) -> Result<Intent> {
            Err(AgentError::Classification("model offline".into()))
        }
    }

    struct EmptyPlanner;

    #[async_trait]
    impl Planner for EmptyPlanner {
        async fn propose_steps(&self, _perception: &Perception) -> Result<Vec<PlanStep>> {
            Ok(Vec::new())
        }
    }

    struct NanEvaluator;

    #[async_trait]
    impl Evaluator for NanEvaluator {
        async fn score(
            &self,
            _results: &[ActionResult],
            _expected: Option<&str>,
        ) -> Result<crate::reflection::Assessment> {
            Ok(crate::reflection::Assessment {
                quality_score: f64::NAN,
                confidence: 0.5,
                ..Default::default()
            })
        }
    }

    struct FailingEvaluator;

    #[async_trait]
    impl Evaluator for FailingEvaluator {
        async fn score(
            &self,
            _results: &[ActionResult],
            _expected: Option<&str>,
        ) -> Result<crate::reflection::Assessment> {
            Err(AgentError::Evaluation("scorer unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_classifier_failure_degrades_to_general() {
        let controller = Controller::builder().classifier(BrokenClassifier).build().unwrap();
        let perception = controller.perceive("15 * 8", None).await;
        assert_eq!(perception.intent, Intent::General);
    }

    #[tokio::test]
    async fn test_empty_proposal_uses_fallback() {
        let controller = Controller::builder().planner(EmptyPlanner).build().unwrap();
        let perception = controller.perceive("anything", None).await;
        let plan = controller.plan(&perception).await;
        assert!(plan.fallback);
        assert_eq!(plan.steps(), &[PlanStep::fallback()]);
    }

    #[tokio::test]
    async fn test_non_finite_evaluator_uses_heuristic() {
        let controller = Controller::builder().evaluator(NanEvaluator).build().unwrap();
        let reflection = controller.reflect(&[], None).await;
        assert_eq!(reflection.source, ReflectionSource::Heuristic);
    }

    #[tokio::test]
    async fn test_failing_evaluator_uses_heuristic() {
        let mut controller = Controller::builder().evaluator(FailingEvaluator).build().unwrap();
        let execution = controller.run_loop("hello", None).await.unwrap();
        assert_eq!(execution.reflection.source, ReflectionSource::Heuristic);
        assert!((execution.reflection.quality_score - 5.0).abs() < f64::EPSILON);
        assert!(execution.success);
    }

    #[tokio::test]
    async fn test_empty_plan_is_contract_violation() {
        let controller = Controller::builder().build().unwrap();
        let perception = controller.perceive("hi", None).await;
        let empty: Plan = serde_json::from_value(json!({"steps": [], "fallback": false})).unwrap();

        let err = controller.act(&empty, &perception).await.unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_reflect_step_counts_prior_results() {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(CalculatorTool).await;
        let controller = Controller::builder().tools(tools).build().unwrap();

        let perception = controller.perceive("2 + 2", None).await;
        let plan = controller.plan(&perception).await;
        let results = controller.act(&plan, &perception).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].value(), Some(&json!(4)));
        assert_eq!(results[1].value(), Some(&json!({"completed": 1, "failed": 0})));
    }

    #[tokio::test]
    async fn test_approval_gate_controls_validation_steps() {
        let mut denied = Controller::builder().build().unwrap();
        let execution = denied.run_loop("Please approve the refund", None).await.unwrap();
        assert_eq!(execution.perception.intent, Intent::ValidationRequired);
        assert!(!execution.results[0].is_success());
        assert!(execution.results[1].is_success());

        let mut approved = Controller::builder()
            .approval_gate(StaticApproval::approve_all())
            .build()
            .unwrap();
        let execution = approved.run_loop("Please approve the refund", None).await.unwrap();
        assert!(execution.results.iter().all(ActionResult::is_success));
    }

    #[tokio::test]
    async fn test_outputs_are_remembered_and_recalled() {
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let mut controller = Controller::builder().memory(memory.clone()).build().unwrap();

        controller.run_loop("hello there", None).await.unwrap();
        assert!(memory.get("conversation:hello there").await.is_some());

        let perception = controller.perceive("hello there", None).await;
        assert!(perception.recalled().is_some());
    }

    #[tokio::test]
    async fn test_phase_returns_to_idle() {
        let mut controller = Controller::builder().build().unwrap();
        let mut phases = controller.watch_phase();
        assert_eq!(controller.phase(), Phase::Idle);

        controller.run_loop("hello", None).await.unwrap();

        assert_eq!(controller.phase(), Phase::Idle);
        assert!(phases.has_changed().unwrap());
        assert_eq!(*phases.borrow_and_update(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = Controller::builder().role("  ").build();
        assert!(matches!(result, Err(AgentError::Config(_))));
    }
}
