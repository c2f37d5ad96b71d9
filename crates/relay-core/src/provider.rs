//! Model Provider Strategy
//!
//! Defines a common interface for chat-completion backends (OpenAI-compatible
//! endpoints, local inference, test doubles) so the orchestrator can work
//! with any of them. The provider receives the conversation plus the current
//! tool catalog and replies with either plain text or tool invocations;
//! retries, rate limiting, and authentication are the provider's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;
use crate::tool::{ToolDescriptor, ToolInvocation};

/// Configuration for model generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4o-mini", "qwen-plus")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
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

/// Reason for the model finishing its reply
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

/// One reply from the model collaborator.
///
/// Either plain text, or a request to invoke tools, or both. When several
/// invocations are present the orchestrator's multi-call policy decides how
/// many are executed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelReply {
    /// Generated text, if any
    pub content: Option<String>,

    /// Tool invocations requested by the model
    #[serde(default)]
    pub tool_calls: Vec<ToolInvocation>,

    /// Model that generated this reply
    pub model: String,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,
}

impl ModelReply {
    /// Create a plain-text reply (mostly useful in tests)
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            model: String::new(),
            finish_reason: Some(FinishReason::Stop),
            usage: None,
        }
    }

    /// The reply's text, empty if the model produced none
    pub fn content_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Whether the model asked for at least one tool invocation
    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Strategy trait for model providers
///
/// Implement this trait to add support for new chat-completion backends.
/// The orchestrator works exclusively through this interface.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Ask the model for the next turn, given the conversation so far and
    /// the tools it may request
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &GenerationOptions,
    ) -> Result<ModelReply>;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Estimate token count for text (provider-specific tokenization)
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Default: rough estimate of ~4 chars per token
        (text.len() / 4) as u32
    }
}
