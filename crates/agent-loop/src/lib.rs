//! # agent-loop
//!
//! A general-purpose agentic loop: every input goes through
//! Perceive → Plan → Act → Reflect, and the controller keeps a history of
//! executions plus running quality statistics.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Controller                         │
//! │                                                           │
//! │  Classifier ──▶ Planner ──▶ Act ──▶ Evaluator             │
//! │                              │                            │
//! │          ┌──────────────┬────┴───────┬──────────────┐     │
//! │          │ ToolRegistry │ Responder  │ ApprovalGate │     │
//! │          └──────┬───────┴────────────┴──────────────┘     │
//! │                 │                                         │
//! │           MemoryStore (recall, search, remember)          │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Each capability is a trait, so the keyword and table-driven defaults can
//! be swapped for the LLM-backed versions in [`llm`] or for anything else
//! without touching the loop.

pub mod builtin;
pub mod capability;
pub mod config;
pub mod controller;
pub mod error;
pub mod execution;
pub mod llm;
pub mod memory;
pub mod message;
pub mod perception;
pub mod plan;
pub mod provider;
pub mod reflection;
pub mod tool;

pub use builtin::{CalculatorTool, DateTimeTool, FnTool, SearchTool, register_builtins};
pub use capability::{ApprovalGate, Responder, StaticApproval, TemplateResponder};
pub use config::LoopConfig;
pub use controller::{Controller, ControllerBuilder, Phase};
pub use error::{AgentError, FailureKind, Result};
pub use execution::{Execution, ExecutionId, RunningStats};
pub use llm::{LlmClassifier, LlmEvaluator, LlmPlanner, LlmResponder};
pub use memory::{InMemoryStore, MemoryStore};
pub use message::{Message, Role};
pub use perception::{Classifier, Complexity, Context, Intent, KeywordClassifier, Perception};
pub use plan::{Action, IntentTablePlanner, Plan, PlanStep, Planner};
pub use provider::{Completion, GenerationOptions, LlmProvider};
pub use reflection::{ActionResult, Assessment, Evaluator, HeuristicEvaluator, Outcome, Reflection};
pub use tool::{Arguments, Tool, ToolCall, ToolRegistry, ToolResult, ToolSchema};
