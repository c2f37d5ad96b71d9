//! Query Orchestration
//!
//! Turns a single-shot chat completion into the multi-step protocol:
//! ask the model with the tool catalog attached, execute the tool calls it
//! requests through the backend, feed the observations back into the
//! conversation, and ask again until the model answers in plain text or the
//! round budget runs out.

use std::sync::Arc;

use crate::error::Result;
use crate::message::{Conversation, Message};
use crate::provider::{GenerationOptions, ModelProvider};
use crate::tool::{ToolBackend, ToolCatalog, ToolInvocation};

/// What to do when one model reply carries several tool invocations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MultiCallPolicy {
    /// Execute only the first invocation; the rest are dropped with a log
    /// line. Matches the observed single-call protocol.
    #[default]
    FirstWins,

    /// Execute every invocation, in the order the model requested them
    Sequential,
}

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Optional system prompt prepended to fresh conversations
    pub system_prompt: Option<String>,

    /// Maximum tool round trips per query before the model's reply is
    /// returned as-is
    pub max_tool_rounds: usize,

    /// Policy for replies carrying several tool invocations
    pub multi_call: MultiCallPolicy,

    /// Generation options passed to the provider
    pub generation: GenerationOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_tool_rounds: 1,
            multi_call: MultiCallPolicy::default(),
            generation: GenerationOptions::default(),
        }
    }
}

/// Drives the model/tool conversation for one query at a time
pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    backend: Arc<dyn ToolBackend>,
    catalog: Arc<ToolCatalog>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        backend: Arc<dyn ToolBackend>,
        catalog: Arc<ToolCatalog>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            backend,
            catalog,
            config,
        }
    }

    /// The catalog view this orchestrator renders into model requests
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Get configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Answer a single query on a throwaway conversation
    pub async fn ask(&self, query: &str) -> Result<String> {
        let mut conversation = match &self.config.system_prompt {
            Some(prompt) => Conversation::with_system_prompt(prompt.clone()),
            None => Conversation::new(),
        };
        self.answer(&mut conversation, query).await
    }

    /// Answer a query, appending all turns to the given conversation.
    ///
    /// Performs at most `max_tool_rounds` tool round trips; each round
    /// appends the assistant turn carrying the executed invocations and one
    /// tool turn per invocation, then re-queries the model.
    pub async fn answer(&self, conversation: &mut Conversation, query: &str) -> Result<String> {
        conversation.push(Message::user(query));

        let mut rounds = 0;
        loop {
            conversation.truncate_to_fit();
            let tools = self.catalog.snapshot();
            let reply = self
                .provider
                .complete(conversation.messages(), &tools, &self.config.generation)
                .await?;

            if !reply.requests_tools() || rounds >= self.config.max_tool_rounds {
                if reply.requests_tools() {
                    tracing::debug!(
                        rounds,
                        "tool round budget exhausted; returning model text"
                    );
                }
                let text = reply.content_or_empty().to_string();
                conversation.push(Message::assistant(text.clone()));
                return Ok(text);
            }
            rounds += 1;

            let selected = self.select_calls(reply.tool_calls);
            // Record only the invocations that will actually be executed, so
            // every recorded invocation has an answering tool turn.
            conversation.push(Message::assistant_with_tools(
                reply.content.unwrap_or_default(),
                selected.clone(),
            ));

            for call in &selected {
                let observation = self.execute(call).await?;
                conversation.push(Message::tool(observation, call.id.clone()));
            }
        }
    }

    /// Apply the multi-call policy to the model's requested invocations
    fn select_calls(&self, mut calls: Vec<ToolInvocation>) -> Vec<ToolInvocation> {
        match self.config.multi_call {
            MultiCallPolicy::Sequential => calls,
            MultiCallPolicy::FirstWins => {
                if calls.len() > 1 {
                    tracing::debug!(
                        dropped = calls.len() - 1,
                        "first-wins policy: ignoring additional tool invocations"
                    );
                }
                calls.truncate(1);
                calls
            }
        }
    }

    /// Execute one invocation, folding recoverable failures into an error
    /// observation the model can react to. A closed session is fatal.
    async fn execute(&self, call: &ToolInvocation) -> Result<String> {
        tracing::debug!(tool = %call.name, "executing tool call");
        match self
            .backend
            .call_tool(&call.name, call.arguments.clone())
            .await
        {
            Ok(output) => Ok(output),
            Err(err) if err.is_recoverable_tool_failure() => {
                tracing::warn!(tool = %call.name, error = %err, "tool call failed");
                Ok(format!("[tool '{}' failed] {}", call.name, err))
            }
            Err(err) => Err(err),
        }
    }
}
