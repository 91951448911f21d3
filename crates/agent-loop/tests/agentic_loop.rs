//! End-to-end behaviour of the Perceive → Plan → Act → Reflect loop.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use agent_loop::{
    Action, ActionResult, AgentError, Arguments, Assessment, Controller, Evaluator, FailureKind,
    FnTool, InMemoryStore, Intent, MemoryStore, Perception, PlanStep, Planner, ToolRegistry,
    ToolResult, register_builtins,
};
use async_trait::async_trait;
use serde_json::json;

async fn builtin_controller() -> (Controller, Arc<dyn MemoryStore>) {
    let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let tools = Arc::new(ToolRegistry::new());
    register_builtins(&tools, memory.clone()).await;

    let controller = Controller::builder()
        .tools(tools)
        .memory(memory.clone())
        .build()
        .unwrap();
    (controller, memory)
}

struct FailingPlanner;

#[async_trait]
impl Planner for FailingPlanner {
    async fn propose_steps(&self, _perception: &Perception) -> agent_loop::Result<Vec<PlanStep>> {
        Err(AgentError::Planning("planner offline".into()))
    }
}

struct FixedPlanner(Vec<PlanStep>);

#[async_trait]
impl Planner for FixedPlanner {
    async fn propose_steps(&self, _perception: &Perception) -> agent_loop::Result<Vec<PlanStep>> {
        Ok(self.0.clone())
    }
}

/// Returns scores in order, one per call
struct ScriptedEvaluator {
    scores: Vec<f64>,
    calls: AtomicUsize,
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn score(
        &self,
        _results: &[ActionResult],
        _expected: Option<&str>,
    ) -> agent_loop::Result<Assessment> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Assessment {
            quality_score: self.scores[call % self.scores.len()],
            confidence: 0.7,
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn calculation_end_to_end() {
    let (mut controller, _) = builtin_controller().await;

    let execution = controller.run_loop("15 * 8 + 42", Some("162")).await.unwrap();

    assert_eq!(execution.perception.intent, Intent::Calculation);
    assert_eq!(execution.plan.steps()[0].tool(), Some("calculator"));
    assert!(execution.results[0].is_success());
    assert_eq!(execution.results[0].value(), Some(&json!(162)));
    assert_eq!(execution.final_output, json!(162));
    assert!(execution.success);
    assert!((execution.reflection.success_rate - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn long_sums_and_dates_take_their_own_paths() {
    let (mut controller, _) = builtin_controller().await;

    let sum = vec!["1"; 10_000].join(" + ");
    let execution = controller.run_loop(&sum, None).await.unwrap();
    assert_eq!(execution.perception.intent, Intent::Calculation);
    assert_eq!(execution.final_output, json!(10_000));

    let execution = controller
        .run_loop("What happened on 2024-01-15?", None)
        .await
        .unwrap();
    assert_eq!(execution.perception.intent, Intent::InformationLookup);
    assert_eq!(execution.plan.steps()[0].tool(), Some("search"));
}

#[tokio::test]
async fn failing_planner_yields_fallback_plan() {
    let mut controller = Controller::builder().planner(FailingPlanner).build().unwrap();

    let execution = controller.run_loop("What is the capital of France?", None).await.unwrap();

    assert!(execution.plan.fallback);
    assert_eq!(execution.plan.len(), 1);
    assert_eq!(execution.plan.steps()[0].action, Action::Respond);
    assert_eq!(execution.plan.steps()[0].priority, 1);
    assert_eq!(execution.results.len(), 1);
    assert!(execution.results[0].is_success());
}

#[tokio::test]
async fn failing_middle_step_does_not_stop_the_plan() {
    let tools = Arc::new(ToolRegistry::new());
    tools
        .register(FnTool::new("boom", "Always fails", |_| anyhow::bail!("exploded")))
        .await;

    let steps = vec![
        PlanStep::respond(1),
        PlanStep::use_tool("boom", Arguments::new(), 2),
        PlanStep::respond(3),
    ];
    let controller = Controller::builder()
        .tools(tools)
        .planner(FixedPlanner(steps.clone()))
        .build()
        .unwrap();

    let perception = controller.perceive("do three things", None).await;
    let plan = agent_loop::Plan::from_steps(steps).unwrap();
    let results = controller.act(&plan, &perception).await.unwrap();
    let reflection = controller.reflect(&results, None).await;

    assert_eq!(results.len(), 3);
    assert!(!results[1].is_success());
    assert_eq!(results[1].failure_kind(), Some(FailureKind::ToolExecution));
    assert!(results[2].is_success());
    assert!((reflection.success_rate - 2.0 / 3.0).abs() < 1e-12);
    assert_eq!(reflection.successful_steps, 2);
}

#[tokio::test]
async fn steps_run_in_priority_order() {
    let steps = vec![
        PlanStep::use_tool("calculator", Arguments::new(), 5),
        PlanStep::respond(1),
        PlanStep::request_approval(5),
    ];
    let mut controller = Controller::builder().planner(FixedPlanner(steps)).build().unwrap();

    let execution = controller.run_loop("anything", None).await.unwrap();
    let order: Vec<usize> = execution.results.iter().map(|r| r.step_index).collect();

    assert_eq!(order, vec![1, 0, 2, 3]);
    assert!(execution.results.last().unwrap().is_reflection());
}

#[tokio::test]
async fn average_quality_is_mean_of_scores() {
    let scores = vec![5.0, 2.0, 3.5, 0.5];
    let mut controller = Controller::builder()
        .evaluator(ScriptedEvaluator {
            scores,
            calls: AtomicUsize::new(0),
        })
        .build()
        .unwrap();

    for input in ["hello", "what time is it?", "tell me something", "bye"] {
        controller.run_loop(input, None).await.unwrap();
    }

    let stats = controller.stats();
    assert_eq!(stats.total_runs, 4);
    assert_eq!(stats.successful_runs, 2);
    assert!((stats.average_quality - 2.75).abs() < 1e-12);
    assert_eq!(controller.history().len(), 4);
    assert_eq!(controller.last_execution().unwrap().input, "bye");
}

#[tokio::test]
async fn unregistered_tool_reports_not_found() {
    let registry = ToolRegistry::new();

    let result = registry.invoke("missing", Arguments::new()).await;
    assert_eq!(result.kind(), Some(FailureKind::ToolNotFound));

    registry
        .register(FnTool::new("echo", "Echo arguments", |call| Ok(json!(call.arguments))))
        .await;
    let mut args = Arguments::new();
    args.insert("x".into(), json!(1));
    let result = registry.invoke("echo", args).await;
    assert_eq!(result, ToolResult::success("echo", json!({"x": 1})));
}

#[tokio::test]
async fn missing_tool_step_is_recorded_not_raised() {
    let steps = vec![PlanStep::use_tool("weather", Arguments::new(), 1)];
    let mut controller = Controller::builder().planner(FixedPlanner(steps)).build().unwrap();

    let execution = controller.run_loop("will it rain?", None).await.unwrap();

    assert_eq!(execution.results[0].failure_kind(), Some(FailureKind::ToolNotFound));
    assert!(!execution.success);
}

#[tokio::test]
async fn bounded_memory_evicts_least_recently_used() {
    let capacity = NonZeroUsize::new(3).unwrap();
    let store = InMemoryStore::bounded(capacity);

    for key in ["a", "b", "c"] {
        store.put(key, json!(key), None).await;
    }
    store.get("a").await;
    store.put("d", json!("d"), None).await;

    assert_eq!(store.len().await, 3);
    assert!(store.get("b").await.is_none());
    assert!(store.get("a").await.is_some());
    assert!(store.metadata("d").await.unwrap().contains_key("timestamp"));
}

#[tokio::test]
async fn information_lookup_searches_memory() {
    let (mut controller, memory) = builtin_controller().await;
    memory
        .put("faq:opening-hours", json!("We are open 9 to 5"), None)
        .await;

    let execution = controller.run_loop("What are the opening hours?", None).await.unwrap();

    assert_eq!(execution.perception.intent, Intent::InformationLookup);
    assert_eq!(execution.plan.steps()[0].tool(), Some("search"));
    assert!(execution.results.iter().all(ActionResult::is_success));
}

#[tokio::test]
async fn controllers_share_memory_across_tasks() {
    let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let tools = Arc::new(ToolRegistry::new());
    register_builtins(&tools, memory.clone()).await;

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let memory = memory.clone();
            let tools = tools.clone();
            tokio::spawn(async move {
                let mut controller =
                    Controller::builder().tools(tools).memory(memory).build().unwrap();
                controller.run_loop(&format!("{i} + {i}"), None).await.unwrap()
            })
        })
        .collect();

    let executions: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    for (i, execution) in executions.iter().enumerate() {
        assert_eq!(execution.final_output, json!(i * 2));
    }
    assert_eq!(memory.len().await, 4);
}
