//! Direct-response and human-approval capabilities used by Act.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::perception::{Intent, Perception};
use crate::plan::{Action, PlanStep};
use crate::reflection::{ActionResult, value_text};

/// Produces the text for a `respond` step
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, perception: &Perception, prior: &[ActionResult]) -> Result<String>;
}

/// Decides `request_approval` steps
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn approve(&self, step: &PlanStep, perception: &Perception) -> Result<bool>;
}

/// Canned replies built from the perception and earlier step results
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateResponder;

impl TemplateResponder {
    fn compose(perception: &Perception, prior: &[ActionResult]) -> String {
        match perception.intent {
            Intent::Conversation => {
                format!("Hello! I'm your {}. How can I help you today?", perception.role)
            }
            Intent::ValidationRequired => {
                let approved = prior
                    .iter()
                    .any(|r| matches!(r.step.action, Action::RequestApproval) && r.is_success());
                if approved {
                    format!("Approved. Proceeding with: \"{}\"", perception.input.trim())
                } else {
                    format!(
                        "\"{}\" needs human approval, which was not granted.",
                        perception.input.trim()
                    )
                }
            }
            _ => {
                let last = prior
                    .iter()
                    .rev()
                    .filter(|r| !r.is_reflection())
                    .find_map(ActionResult::value);

                if let Some(value) = last {
                    return summarize(value);
                }
                if let Some(Value::Array(recalled)) = perception.recalled() {
                    if let Some(first) = recalled.first() {
                        return format!("From memory: {}", value_text(&first["value"]));
                    }
                }
                format!(
                    "As your {}, I received: \"{}\"",
                    perception.role,
                    perception.input.trim()
                )
            }
        }
    }
}

fn summarize(value: &Value) -> String {
    match value {
        Value::Array(hits) if hits.is_empty() => "No matching information found.".to_string(),
        Value::Array(hits) => {
            let found: Vec<String> = hits
                .iter()
                .map(|hit| hit.get("value").map_or_else(|| value_text(hit), value_text))
                .collect();
            format!("Found: {}", found.join("; "))
        }
        other => value_text(other),
    }
}

#[async_trait]
impl Responder for TemplateResponder {
    async fn respond(&self, perception: &Perception, prior: &[ActionResult]) -> Result<String> {
        Ok(Self::compose(perception, prior))
    }
}

/// Gate with a fixed answer
#[derive(Clone, Copy, Debug)]
pub struct StaticApproval {
    approve: bool,
}

impl StaticApproval {
    pub const fn approve_all() -> Self {
        Self { approve: true }
    }

    pub const fn deny_all() -> Self {
        Self { approve: false }
    }
}

impl Default for StaticApproval {
    fn default() -> Self {
        Self::deny_all()
    }
}

#[async_trait]
impl ApprovalGate for StaticApproval {
    async fn approve(&self, step: &PlanStep, _perception: &Perception) -> Result<bool> {
        tracing::debug!(step = %step.description, approved = self.approve, "Static approval");
        Ok(self.approve)
    }
}
