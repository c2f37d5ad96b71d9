//! OpenAI-Compatible Provider
//!
//! Implementation of `ModelProvider` for the OpenAI chat completions API
//! and anything wire-compatible with it (Azure OpenAI, DashScope, vLLM,
//! LM Studio). Tool schemas go out as function declarations; tool
//! invocations come back with their arguments JSON-encoded in a string and
//! are decoded into structured values here.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::{
    error::{RelayError, Result},
    message::{Message, Role},
    provider::{FinishReason, GenerationOptions, ModelProvider, ModelReply, TokenUsage},
    tool::{ToolDescriptor, ToolInvocation},
};

/// OpenAI provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API key sent as a bearer token
    pub api_key: String,

    /// Base URL of the API, without the trailing `/chat/completions`
    pub base_url: String,

    /// Default model identifier
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            timeout_secs: 120,
        }
    }
}

impl OpenAiConfig {
    /// Read configuration from `OPENAI_API_KEY` (required),
    /// `OPENAI_BASE_URL` and `OPENAI_MODEL` (optional)
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| RelayError::Config("OPENAI_API_KEY is not set".into()))?;
        let mut config = Self {
            api_key,
            ..Self::default()
        };
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config.model = model;
        }
        Ok(config)
    }
}

/// OpenAI-compatible chat completion provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    /// Create from configuration
    pub fn from_config(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RelayError::Provider(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OpenAiConfig::from_env()?)
    }

    /// Default model this provider was configured with
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Convert relay messages to the OpenAI wire format
    fn convert_messages(messages: &[Message]) -> Result<Vec<WireMessage>> {
        messages.iter().map(WireMessage::from_message).collect()
    }

    /// Render tool descriptors as function declarations
    fn convert_tools(tools: &[ToolDescriptor]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|tool| WireTool {
                kind: "function",
                function: WireFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                },
            })
            .collect()
    }

    /// Convert a chat completion response to a model reply
    fn parse_reply(response: ChatResponse) -> Result<ModelReply> {
        let model = response.model;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Parse("completion returned no choices".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(WireToolCall::into_invocation)
            .collect::<Result<Vec<_>>>()?;

        Ok(ModelReply {
            content: choice.message.content,
            tool_calls,
            model,
            finish_reason: choice.finish_reason.as_deref().map(parse_finish_reason),
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &GenerationOptions,
    ) -> Result<ModelReply> {
        let request = ChatRequest {
            model: &options.model,
            messages: Self::convert_messages(messages)?,
            tools: Self::convert_tools(tools),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        tracing::debug!(
            model = %options.model,
            messages = messages.len(),
            tools = tools.len(),
            "requesting chat completion"
        );

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    RelayError::ProviderUnavailable(e.to_string())
                } else {
                    RelayError::Provider(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Provider(format!(
                "chat completion failed with {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Parse(format!("malformed completion response: {e}")))?;
        Self::parse_reply(parsed)
    }

    async fn health_check(&self) -> Result<bool> {
        let result = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await;
        match result {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!("OpenAI health check failed: {e}");
                Ok(false)
            }
        }
    }
}

fn parse_finish_reason(raw: &str) -> FinishReason {
    match raw {
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn from_message(message: &Message) -> Result<Self> {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let tool_calls = message
            .tool_calls
            .iter()
            .map(WireToolCall::from_invocation)
            .collect::<Result<Vec<_>>>()?;
        // The API rejects an assistant tool-call turn with empty content;
        // it must be omitted, not blank.
        let content = if message.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(message.content.clone())
        };
        Ok(Self {
            role,
            content,
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    /// Some compatible endpoints omit the call id
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

impl WireToolCall {
    fn from_invocation(invocation: &ToolInvocation) -> Result<Self> {
        Ok(Self {
            id: invocation.id.clone(),
            kind: "function".into(),
            function: WireFunctionCall {
                name: invocation.name.clone(),
                arguments: serde_json::to_string(&invocation.arguments)?,
            },
        })
    }

    /// Decode the JSON-encoded argument string back into a structured value
    fn into_invocation(self) -> Result<ToolInvocation> {
        let arguments = if self.function.arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&self.function.arguments).map_err(|e| {
                RelayError::Parse(format!(
                    "tool call '{}' carries malformed arguments: {e}",
                    self.function.name
                ))
            })?
        };
        // A missing call id gets a generated one so the answering tool
        // turn can still reference it.
        if self.id.is_empty() {
            return Ok(ToolInvocation::new(self.function.name, arguments));
        }
        Ok(ToolInvocation {
            id: self.id,
            name: self.function.name,
            arguments,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
