//! Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Classifier capability failed
    #[error("Classification failed: {0}")]
    Classification(String),

    /// Planning capability failed
    #[error("Planning failed: {0}")]
    Planning(String),

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool validation failed
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Evaluator capability failed
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Parse error (e.g., malformed LLM output)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Misuse of the controller (e.g., acting on an empty plan)
    #[error("Contract violation: {0}")]
    Contract(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Whether this error is a caller contract violation rather than a
    /// runtime failure of some capability.
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(_))
    }

    /// Failure tag used when this error is recorded against a tool invocation.
    pub const fn tool_failure_kind(&self) -> FailureKind {
        match self {
            Self::ToolNotFound(_) => FailureKind::ToolNotFound,
            _ => FailureKind::ToolExecution,
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// Tag attached to a failure that was contained at a phase boundary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Classification,
    Planning,
    ToolNotFound,
    ToolExecution,
    Evaluation,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Classification => "classification_failure",
            Self::Planning => "planning_failure",
            Self::ToolNotFound => "tool_not_found",
            Self::ToolExecution => "tool_execution_failure",
            Self::Evaluation => "evaluation_failure",
        };
        f.write_str(label)
    }
}
