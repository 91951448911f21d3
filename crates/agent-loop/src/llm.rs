//! LLM-backed Capabilities
//!
//! Classifier, planner, evaluator and responder implementations that
//! delegate to any [`LlmProvider`]. Replies are expected to carry JSON,
//! either in a fenced block or inline; anything unparseable surfaces as the
//! capability's error so the controller can degrade.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::capability::Responder;
use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::perception::{Classifier, Intent, Perception};
use crate::plan::{Action, PlanStep, Planner};
use crate::provider::{GenerationOptions, LlmProvider};
use crate::reflection::{ActionResult, Assessment, Evaluator, Outcome, value_text};
use crate::tool::{Arguments, ToolRegistry};

const PLANNER_PROMPT: &str = r#"You plan actions for an agent.

Reply with a JSON block in this exact format:
```json
{"steps": [{"action": "use_tool", "tool": "tool_name", "arguments": {"arg": "value"}, "priority": 1, "description": "why"}]}
```

Valid actions: use_tool, respond, request_approval.
Lower priority runs first. Do not add a reflection step."#;

const EVALUATOR_PROMPT: &str = r#"You evaluate the results of an agent's actions.

Reply with a JSON block in this exact format:
```json
{"quality_score": 0.0, "strengths": [], "improvements": [], "next_actions": [], "confidence": 0.0}
```

quality_score is between 0 and 5, confidence between 0 and 1."#;

/// Pull the JSON payload out of a model reply
///
/// Prefers a ```` ```json ```` fence, then any fence, then the outermost
/// braces.
pub fn extract_json(content: &str) -> Option<&str> {
    for marker in ["```json", "```"] {
        if let Some(start) = content.find(marker) {
            let after = &content[start + marker.len()..];
            if let Some(end) = after.find("```") {
                let body = after[..end].trim();
                if body.starts_with('{') {
                    return Some(body);
                }
            }
        }
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

fn parse_reply<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    let json = extract_json(content)
        .ok_or_else(|| AgentError::Parse("no JSON object in reply".into()))?;
    serde_json::from_str(json).map_err(|e| AgentError::Parse(e.to_string()))
}

/// Shared provider handle and generation settings
#[derive(Clone)]
struct Backend {
    provider: Arc<dyn LlmProvider>,
    options: GenerationOptions,
}

impl Backend {
    async fn ask(&self, system: &str, user: String) -> Result<String> {
        let messages = [Message::system(system), Message::user(user)];
        let completion = self.provider.complete(&messages, &self.options).await?;
        tracing::trace!(
            provider = self.provider.name(),
            tokens = completion.usage.as_ref().map(|u| u.total_tokens),
            "Completion received"
        );
        Ok(completion.content)
    }
}

/// Asks the model for one intent label
pub struct LlmClassifier {
    backend: Backend,
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            backend: Backend {
                provider,
                options: GenerationOptions::default().with_temperature(0.0),
            },
        }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, text: &str) -> Result<Intent> {
        let labels: Vec<&str> = Intent::ALL.iter().map(|i| i.as_str()).collect();
        let system = format!(
            "Classify the user's message. Reply with exactly one label from: {}",
            labels.join(", ")
        );

        let reply = self
            .backend
            .ask(&system, text.to_string())
            .await
            .map_err(|e| AgentError::Classification(e.to_string()))?;

        let label = reply
            .split(|c: char| c.is_whitespace() || c == ',' || c == '.')
            .find(|w| !w.is_empty())
            .unwrap_or_default()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`');
        Intent::from_str(label)
    }
}

#[derive(Deserialize)]
struct RawPlan {
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    action: String,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    arguments: Option<Arguments>,
    #[serde(default)]
    priority: Option<u32>,
    #[serde(default)]
    description: Option<String>,
}

impl RawStep {
    /// `None` for reflect steps, which the controller appends itself.
    /// Unknown action names are taken as tool names.
    fn into_step(self, position: u32) -> Result<Option<PlanStep>> {
        let action = match self.action.as_str() {
            "reflect" => return Ok(None),
            "respond" | "answer" => Action::Respond,
            "request_approval" | "approval" | "ask_human" => Action::RequestApproval,
            "use_tool" | "tool" => {
                let tool = self.tool.ok_or_else(|| {
                    AgentError::Planning("use_tool step without a tool name".into())
                })?;
                Action::use_tool(tool, self.arguments.unwrap_or_default())
            }
            other => Action::use_tool(other, self.arguments.unwrap_or_default()),
        };

        let description = self.description.unwrap_or_else(|| action.label().replace('_', " "));
        Ok(Some(PlanStep::new(action, self.priority.unwrap_or(position), description)))
    }
}

/// Asks the model for a JSON plan
pub struct LlmPlanner {
    backend: Backend,
    tools: Option<Arc<ToolRegistry>>,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            backend: Backend {
                provider,
                options: GenerationOptions::default().with_temperature(0.2),
            },
            tools: None,
        }
    }

    /// Describe registered tools in the prompt
    #[must_use]
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    async fn system_prompt(&self) -> String {
        let mut prompt = PLANNER_PROMPT.to_string();
        if let Some(tools) = &self.tools {
            if !tools.is_empty().await {
                prompt.push_str("\n\n");
                prompt.push_str(&tools.prompt_section().await);
            }
        }
        prompt
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn propose_steps(&self, perception: &Perception) -> Result<Vec<PlanStep>> {
        let user = format!(
            "Role: {}\nIntent: {}\nComplexity: {}\nInput: {}",
            perception.role,
            perception.intent,
            perception.complexity.get(),
            perception.input
        );

        let reply = self
            .backend
            .ask(&self.system_prompt().await, user)
            .await
            .map_err(|e| AgentError::Planning(e.to_string()))?;
        let raw: RawPlan = parse_reply(&reply)?;

        let mut steps = Vec::with_capacity(raw.steps.len());
        for (position, step) in (1u32..).zip(raw.steps) {
            if let Some(step) = step.into_step(position)? {
                steps.push(step);
            }
        }
        Ok(steps)
    }
}

/// Asks the model to score a cycle's results
pub struct LlmEvaluator {
    backend: Backend,
}

impl LlmEvaluator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            backend: Backend {
                provider,
                options: GenerationOptions::default().with_temperature(0.0),
            },
        }
    }
}

fn describe_results(results: &[ActionResult]) -> String {
    results
        .iter()
        .map(|r| match &r.outcome {
            Outcome::Success { value } => {
                format!("- {}: ok, {}", r.step.description, value_text(value))
            }
            Outcome::Failure { kind, message } => {
                format!("- {}: failed ({kind}), {message}", r.step.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn score(
        &self,
        results: &[ActionResult],
        expected_outcome: Option<&str>,
    ) -> Result<Assessment> {
        let mut user = format!("Results:\n{}", describe_results(results));
        if let Some(expected) = expected_outcome {
            user.push_str(&format!("\n\nExpected outcome: {expected}"));
        }

        let reply = self
            .backend
            .ask(EVALUATOR_PROMPT, user)
            .await
            .map_err(|e| AgentError::Evaluation(e.to_string()))?;
        parse_reply(&reply).map_err(|e| AgentError::Evaluation(e.to_string()))
    }
}

/// Free-text answers from the model
pub struct LlmResponder {
    backend: Backend,
}

impl LlmResponder {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            backend: Backend {
                provider,
                options: GenerationOptions::default(),
            },
        }
    }
}

#[async_trait]
impl Responder for LlmResponder {
    async fn respond(&self, perception: &Perception, prior: &[ActionResult]) -> Result<String> {
        let mut system = format!("You are a helpful {}. Be concise and accurate.", perception.role);
        if let Some(Value::Array(recalled)) = perception.recalled() {
            system.push_str("\n\nRelevant memory:");
            for entry in recalled {
                system.push_str(&format!("\n- {}", value_text(&entry["value"])));
            }
        }
        if !prior.is_empty() {
            system.push_str("\n\nEarlier steps:\n");
            system.push_str(&describe_results(prior));
        }

        let reply = self.backend.ask(&system, perception.input.clone()).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(AgentError::Provider("empty response".into()));
        }
        Ok(reply.to_string())
    }
}
