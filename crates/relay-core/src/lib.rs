//! # relay-core
//!
//! Model-facing core of the relay agent: conversation model, remote tool
//! catalog, and the orchestration loop that folds tool results back into the
//! model's reasoning turn.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Orchestrator                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ Conversation │  │ ToolCatalog  │  │   ModelProvider    │  │
//! │  │   (turns)    │──│  (snapshot)  │──│    (Strategy)      │  │
//! │  └──────────────┘  └──────┬───────┘  └────────────────────┘  │
//! └───────────────────────────┼──────────────────────────────────┘
//!                             │ ToolBackend (seam)
//!                             ▼
//!                    MCP session (relay-mcp)
//! ```
//!
//! The `ModelProvider` trait abstracts the chat-completion collaborator; the
//! `ToolBackend` trait abstracts whatever executes tools remotely. Neither
//! side knows about the other's wire format.

pub mod error;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod tool;

pub use error::{RelayError, Result};
pub use message::{Conversation, Message, Role};
pub use orchestrator::{MultiCallPolicy, Orchestrator, OrchestratorConfig};
pub use provider::{GenerationOptions, ModelProvider, ModelReply};
pub use tool::{ToolBackend, ToolCatalog, ToolDescriptor, ToolInvocation};
