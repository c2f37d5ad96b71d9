//! Error Types

use thiserror::Error;

use relay_core::RelayError;

/// Result type alias for MCP client operations
pub type Result<T> = std::result::Result<T, McpError>;

/// MCP client error types
#[derive(Error, Debug)]
pub enum McpError {
    /// The server process could not be started
    #[error("Failed to launch server process: {0}")]
    Launch(String),

    /// Writing a frame to the server failed
    #[error("Transport write error: {0}")]
    Write(String),

    /// Reading a frame from the server failed
    #[error("Transport read error: {0}")]
    Read(String),

    /// The handshake response was missing or malformed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// A message violated the wire protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server reported a tool failure
    #[error("Tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    /// No response arrived within the configured bound
    #[error("Request '{0}' timed out")]
    Timeout(String),

    /// The session is closed; no further requests are possible
    #[error("Session closed")]
    Closed,

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<McpError> for RelayError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Closed => RelayError::SessionClosed,
            McpError::Timeout(method) => RelayError::ToolTimeout(method),
            McpError::Tool { name, message } => {
                RelayError::ToolExecution(format!("{name}: {message}"))
            }
            other => RelayError::Other(other.to_string()),
        }
    }
}
