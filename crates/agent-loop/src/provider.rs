//! LLM Provider Strategy Pattern
//!
//! Common interface for whatever completion backend the LLM-backed
//! capabilities in [`crate::llm`] talk to. The controller never sees a
//! provider directly; it only sees the capability traits.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_loop::provider::{GenerationOptions, LlmProvider};
//!
//! let completion = provider.complete(&messages, &GenerationOptions::default()).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "gpt-4")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

const fn default_temperature() -> f32 { 0.7 }
const fn default_max_tokens() -> u32 { 1024 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop_sequences: Vec::new(),
        }
    }
}

impl GenerationOptions {
    /// Same options with a different temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Response from an LLM completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

impl Completion {
    /// Plain completion with no usage data
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            usage: None,
            finish_reason: Some(FinishReason::Stop),
        }
    }
}

/// Token usage statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to plug a backend into the LLM capabilities.
/// Providers are expected to enforce their own request timeouts and return
/// an error instead of hanging.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Generate a completion from messages
    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion>;

    /// Estimate token count for text (provider-specific tokenization)
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Default: rough estimate of ~4 chars per token
        u32::try_from(text.len() / 4).unwrap_or(u32::MAX)
    }
}
