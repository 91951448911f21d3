//! Tool System
//!
//! Name-keyed registry of capabilities the Act phase may invoke.
//! Tools are registered at runtime and invoked through [`ToolRegistry::invoke`],
//! which never fails: every problem comes back as a tagged [`ToolResult`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{AgentError, FailureKind, Result};

/// Named tool arguments
pub type Arguments = serde_json::Map<String, Value>;

/// Tool call request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: Arguments,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// String argument lookup
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Tagged result of a tool invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success {
        name: String,
        value: Value,
    },
    Failure {
        name: String,
        kind: FailureKind,
        message: String,
    },
}

impl ToolResult {
    pub fn success(name: impl Into<String>, value: Value) -> Self {
        Self::Success {
            name: name.into(),
            value,
        }
    }

    pub fn failure(name: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            name: name.into(),
            kind,
            message: message.into(),
        }
    }

    fn from_error(name: &str, err: &AgentError) -> Self {
        Self::failure(name, err.tool_failure_kind(), err.to_string())
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Success { name, .. } | Self::Failure { name, .. } => name,
        }
    }

    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::Failure { .. } => None,
        }
    }

    pub const fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterSchema {
    pub fn required(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
        default: Value,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: false,
            default: Some(default),
        }
    }
}

/// Tool definition schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,

    /// Whether tool has side effects
    #[serde(default)]
    pub has_side_effects: bool,
}

/// Tool trait - implement to add new capabilities
///
/// A tool that talks to anything slow is responsible for its own timeout;
/// the registry only applies one when configured with [`ToolRegistry::with_timeout`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments
    async fn execute(&self, call: &ToolCall) -> Result<Value>;

    /// Validate arguments before execution (optional)
    fn validate(&self, call: &ToolCall) -> Result<()> {
        let schema = self.schema();

        for param in &schema.parameters {
            if param.required && !call.arguments.contains_key(&param.name) {
                return Err(AgentError::ToolValidation(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
        }

        Ok(())
    }
}

#[derive(Default)]
struct Entries {
    order: Vec<String>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

/// Registry for available tools
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<Entries>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any invocation that runs longer than `limit`
    #[must_use]
    pub const fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Register a tool under its schema name
    pub async fn register<T: Tool + 'static>(&self, tool: T) {
        let name = tool.schema().name;
        self.register_arc(name, Arc::new(tool)).await;
    }

    /// Register a tool under an explicit name, replacing any previous binding
    pub async fn register_as<T: Tool + 'static>(&self, name: impl Into<String>, tool: T) {
        self.register_arc(name.into(), Arc::new(tool)).await;
    }

    /// Register a shared tool
    pub async fn register_arc(&self, name: String, tool: Arc<dyn Tool>) {
        let mut entries = self.entries.write().await;
        if entries.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "Replaced tool binding");
        } else {
            entries.order.push(name);
        }
    }

    /// Get a tool by name
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entries.read().await.tools.get(name).cloned()
    }

    /// Invoke a tool by name
    pub async fn invoke(&self, name: &str, arguments: Arguments) -> ToolResult {
        self.execute(&ToolCall::new(name, arguments)).await
    }

    /// Execute a tool call
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name).await else {
            tracing::warn!(tool = %call.name, "Tool not registered");
            return ToolResult::from_error(&call.name, &AgentError::ToolNotFound(call.name.clone()));
        };

        // Validate first
        if let Err(e) = tool.validate(call) {
            return ToolResult::from_error(&call.name, &e);
        }

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, tool.execute(call))
                .await
                .unwrap_or_else(|_| {
                    Err(AgentError::ToolExecution(format!(
                        "timed out after {}ms",
                        limit.as_millis()
                    )))
                }),
            None => tool.execute(call).await,
        };

        match outcome {
            Ok(value) => ToolResult::success(&call.name, value),
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "Tool failed");
                ToolResult::from_error(&call.name, &e)
            }
        }
    }

    /// Registered names in registration order
    pub async fn list(&self) -> Vec<String> {
        self.entries.read().await.order.clone()
    }

    /// Get all tool schemas in registration order
    pub async fn schemas(&self) -> Vec<ToolSchema> {
        let entries = self.entries.read().await;
        entries
            .order
            .iter()
            .filter_map(|name| entries.tools.get(name))
            .map(|tool| tool.schema())
            .collect()
    }

    /// Number of registered tools
    pub async fn len(&self) -> usize {
        self.entries.read().await.order.len()
    }

    /// Check if empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Prompt section describing available tools, for LLM planners
    pub async fn prompt_section(&self) -> String {
        let mut prompt = String::from("## Available Tools\n\n");

        for schema in self.schemas().await {
            prompt.push_str(&format!("### {}\n{}\n", schema.name, schema.description));

            if !schema.parameters.is_empty() {
                prompt.push_str("**Parameters:**\n");
                for param in &schema.parameters {
                    let required = if param.required { " (required)" } else { "" };
                    prompt.push_str(&format!(
                        "- `{}` ({}){}: {}\n",
                        param.name, param.param_type, required, param.description
                    ));
                }
            }
            prompt.push('\n');
        }

        prompt
    }
}
