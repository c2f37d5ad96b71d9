//! # Relay MCP
//!
//! Client-side implementation of the Model Context Protocol over a child
//! process's stdio. Layers, bottom up:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  lifecycle   launch → handshake → teardown  │
//! ├─────────────────────────────────────────────┤
//! │  session     request/response correlation   │
//! ├─────────────────────────────────────────────┤
//! │  protocol    JSON-RPC 2.0 message shapes    │
//! ├─────────────────────────────────────────────┤
//! │  transport   child process, line framing    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! [`McpSession`] implements `relay_core::ToolBackend`, so the
//! orchestrator drives remote tools without knowing they live in another
//! process.

pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{McpError, Result};
pub use lifecycle::Connection;
pub use session::{McpSession, SessionConfig, SessionState};
pub use transport::{LaunchSpec, StdioTransport};
