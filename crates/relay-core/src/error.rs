//! Error Types

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay error types
#[derive(Error, Debug)]
pub enum RelayError {
    /// Model provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Tool not offered by the remote catalog
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Remote tool reported a failure
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// No tool response within the configured bound
    #[error("Tool call timed out: {0}")]
    ToolTimeout(String),

    /// The tool session is closed; no further calls are possible
    #[error("Session closed")]
    SessionClosed,

    /// Parse error (e.g., model tool-call arguments)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Check whether the conversation can continue after this error.
    ///
    /// Failures of a single tool call are folded back into the conversation
    /// as an error observation so the model can react to them. A closed
    /// session or a provider failure ends the query instead.
    pub fn is_recoverable_tool_failure(&self) -> bool {
        matches!(
            self,
            RelayError::ToolExecution(_)
                | RelayError::ToolTimeout(_)
                | RelayError::ToolNotFound(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Provider(msg) => format!("The model service encountered an error: {}", msg),
            RelayError::ProviderUnavailable(_) => {
                "The model service is currently unavailable. Please try again.".into()
            }
            RelayError::ToolNotFound(name) => format!("The tool '{}' is not available.", name),
            RelayError::ToolExecution(msg) => format!("Tool error: {}", msg),
            RelayError::ToolTimeout(_) => "A tool took too long to respond.".into(),
            RelayError::SessionClosed => {
                "The tool server connection was closed. Please restart the client.".into()
            }
            RelayError::Config(msg) => format!("Configuration problem: {}", msg),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failures_are_recoverable() {
        assert!(RelayError::ToolExecution("boom".into()).is_recoverable_tool_failure());
        assert!(RelayError::ToolTimeout("tools/call".into()).is_recoverable_tool_failure());
        assert!(!RelayError::SessionClosed.is_recoverable_tool_failure());
        assert!(!RelayError::Provider("down".into()).is_recoverable_tool_failure());
    }
}
