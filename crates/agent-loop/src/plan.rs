//! Plans and Planning Strategies
//!
//! A [`Plan`] is an ordered, never-empty list of [`PlanStep`]s. Strategies
//! implement [`Planner`]; the controller owns the terminal reflect step and
//! the fallback when a strategy fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::builtin::extract_expression;
use crate::error::Result;
use crate::perception::{Intent, Perception};
use crate::tool::Arguments;

/// What a step does
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Invoke a registered tool
    UseTool {
        tool: String,
        #[serde(default)]
        arguments: Arguments,
    },
    /// Produce a direct answer
    Respond,
    /// Ask a human to approve before continuing
    RequestApproval,
    /// Summarise the results gathered so far
    Reflect,
}

impl Action {
    pub fn use_tool(tool: impl Into<String>, arguments: Arguments) -> Self {
        Self::UseTool {
            tool: tool.into(),
            arguments,
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::UseTool { .. } => "use_tool",
            Self::Respond => "respond",
            Self::RequestApproval => "request_approval",
            Self::Reflect => "reflect",
        }
    }
}

/// One unit of intended work
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(flatten)]
    pub action: Action,
    /// Lower runs earlier
    pub priority: u32,
    pub description: String,
}

impl PlanStep {
    pub fn new(action: Action, priority: u32, description: impl Into<String>) -> Self {
        Self {
            action,
            priority,
            description: description.into(),
        }
    }

    pub fn respond(priority: u32) -> Self {
        Self::new(Action::Respond, priority, "Respond directly")
    }

    pub fn use_tool(tool: impl Into<String>, arguments: Arguments, priority: u32) -> Self {
        let tool = tool.into();
        let description = format!("Use the {tool} tool");
        Self::new(Action::use_tool(tool, arguments), priority, description)
    }

    pub fn request_approval(priority: u32) -> Self {
        Self::new(Action::RequestApproval, priority, "Request human approval")
    }

    pub fn reflect(priority: u32) -> Self {
        Self::new(Action::Reflect, priority, "Reflect on results")
    }

    /// Single step substituted when planning fails
    pub fn fallback() -> Self {
        Self::respond(1)
    }

    /// Target tool, for tool steps
    pub fn tool(&self) -> Option<&str> {
        match &self.action {
            Action::UseTool { tool, .. } => Some(tool),
            _ => None,
        }
    }
}

/// Ordered sequence of steps; never empty
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    steps: Vec<PlanStep>,
    /// Set when the planner failed and the fallback step was substituted
    pub fallback: bool,
}

impl Plan {
    /// Plan from proposed steps with a terminal reflect step appended;
    /// `None` when nothing was proposed
    pub fn with_reflection(mut steps: Vec<PlanStep>) -> Option<Self> {
        let last = steps.iter().map(|s| s.priority).max()?;
        steps.push(PlanStep::reflect(last.saturating_add(1)));
        Some(Self {
            steps,
            fallback: false,
        })
    }

    /// The single-step degraded plan
    pub fn fallback() -> Self {
        Self {
            steps: vec![PlanStep::fallback()],
            fallback: true,
        }
    }

    /// Plan exactly as given; `None` when empty
    pub fn from_steps(steps: Vec<PlanStep>) -> Option<Self> {
        (!steps.is_empty()).then_some(Self {
            steps,
            fallback: false,
        })
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step indices in execution order: ascending priority, ties by position
    pub fn execution_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.steps.len()).collect();
        order.sort_by_key(|&i| self.steps[i].priority);
        order
    }
}

/// Planning capability
#[async_trait]
pub trait Planner: Send + Sync {
    async fn propose_steps(&self, perception: &Perception) -> Result<Vec<PlanStep>>;
}

/// Static intent → action table
#[derive(Clone, Debug)]
pub struct IntentTablePlanner {
    calculator_tool: String,
    search_tool: String,
}

impl Default for IntentTablePlanner {
    fn default() -> Self {
        Self {
            calculator_tool: "calculator".into(),
            search_tool: "search".into(),
        }
    }
}

impl IntentTablePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_calculator_tool(mut self, name: impl Into<String>) -> Self {
        self.calculator_tool = name.into();
        self
    }

    #[must_use]
    pub fn with_search_tool(mut self, name: impl Into<String>) -> Self {
        self.search_tool = name.into();
        self
    }

    pub fn steps_for(&self, perception: &Perception) -> Vec<PlanStep> {
        match perception.intent {
            Intent::Calculation => {
                let expression = extract_expression(&perception.input)
                    .unwrap_or_else(|| perception.input.trim().to_string());
                let mut args = Arguments::new();
                args.insert("expression".into(), Value::String(expression));
                vec![PlanStep::use_tool(&self.calculator_tool, args, 1)]
            }
            Intent::InformationLookup => {
                let mut args = Arguments::new();
                args.insert("query".into(), Value::String(perception.input.trim().to_string()));
                vec![
                    PlanStep::use_tool(&self.search_tool, args, 1),
                    PlanStep::respond(2),
                ]
            }
            Intent::ValidationRequired => {
                vec![PlanStep::request_approval(1), PlanStep::respond(2)]
            }
            Intent::Conversation | Intent::General => vec![PlanStep::respond(1)],
        }
    }
}

#[async_trait]
impl Planner for IntentTablePlanner {
    async fn propose_steps(&self, perception: &Perception) -> Result<Vec<PlanStep>> {
        Ok(self.steps_for(perception))
    }
}
