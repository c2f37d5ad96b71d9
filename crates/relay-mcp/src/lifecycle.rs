//! Connection Lifecycle
//!
//! Ties the subprocess transport and the session together: launch the
//! server, hand the stdio halves to a session, run the handshake, and on
//! shutdown tear everything down in the reverse order. A failed handshake
//! never leaks the child process.

use std::future::Future;
use std::sync::Arc;

use crate::error::{McpError, Result};
use crate::session::{McpSession, SessionConfig};
use crate::transport::{LaunchSpec, StdioTransport};

/// A running MCP server process with an initialized session on top
pub struct Connection {
    transport: StdioTransport,
    session: Arc<McpSession>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Launch the server described by `spec` and complete the handshake.
    /// On any failure the child process is stopped before returning.
    pub async fn establish(spec: &LaunchSpec, config: SessionConfig) -> Result<Self> {
        let mut transport = StdioTransport::start(spec).await?;

        let (writer, reader) = match transport.split() {
            Ok(halves) => halves,
            Err(err) => {
                transport.stop().await;
                return Err(err);
            }
        };

        let session = Arc::new(McpSession::new(writer, reader, config));
        if let Err(err) = session.initialize().await {
            tracing::warn!(command = %spec.command, error = %err, "handshake failed");
            session.close().await;
            transport.stop().await;
            return Err(err);
        }

        Ok(Self { transport, session })
    }

    /// Handle to the initialized session
    pub fn session(&self) -> Arc<McpSession> {
        self.session.clone()
    }

    /// Whether the server process is still running
    pub fn is_alive(&mut self) -> bool {
        self.transport.is_alive()
    }

    /// Close the session, then stop the server process. Returns the
    /// server's exit code when it could be collected.
    pub async fn shutdown(mut self) -> Option<i32> {
        self.session.close().await;
        self.transport.stop().await
    }
}

/// Establish a connection, hand the session to `body`, and tear the server
/// down on every exit path. The body's error is preserved; teardown issues
/// are only logged.
pub async fn run<F, Fut, T, E>(
    spec: &LaunchSpec,
    config: SessionConfig,
    body: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(Arc<McpSession>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<McpError>,
{
    let connection = Connection::establish(spec, config).await?;
    let result = body(connection.session()).await;
    let exit = connection.shutdown().await;
    tracing::debug!(exit_code = ?exit, "MCP server shut down");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::error::McpError;

    fn short_timeout() -> SessionConfig {
        SessionConfig {
            request_timeout: Duration::from_millis(300),
            ..SessionConfig::default()
        }
    }

    // A stdio MCP server faked with a shell loop: answers initialize (id 1)
    // and tools/list (id 2), ignores everything else.
    const STUB_SERVER: &str = r#"
        while read -r line; do
            case "$line" in
                *'"method":"initialize"'*)
                    printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"stub","version":"0"},"capabilities":{"tools":{}}}}'
                    ;;
                *'"method":"tools/list"'*)
                    printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"list_tables"}]}}'
                    ;;
            esac
        done
    "#;

    #[tokio::test]
    async fn establish_handshakes_and_serves_tools() {
        let spec = LaunchSpec::new("sh").with_args(["-c", STUB_SERVER]);
        let mut connection = Connection::establish(&spec, short_timeout()).await.unwrap();
        assert!(connection.is_alive());

        let tools = connection.session().list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "list_tables");

        connection.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_server_process() {
        let spec = LaunchSpec::new("sh").with_args(["-c", STUB_SERVER]);
        let connection = Connection::establish(&spec, short_timeout()).await.unwrap();
        let session = connection.session();

        let exit = connection.shutdown().await;
        assert_eq!(exit, Some(0));

        let err = session.call_tool("anything", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Closed));
    }

    #[tokio::test]
    async fn run_tears_down_even_when_body_fails() {
        let spec = LaunchSpec::new("sh").with_args(["-c", STUB_SERVER]);
        let captured: Arc<std::sync::Mutex<Option<Arc<McpSession>>>> =
            Arc::new(std::sync::Mutex::new(None));

        let kept = captured.clone();
        let err = run(&spec, short_timeout(), |session| {
            *kept.lock().unwrap() = Some(session.clone());
            async move {
                let tools = session.list_tools().await?;
                assert_eq!(tools.len(), 1);
                Err::<(), _>(McpError::Protocol("body failed".into()))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, McpError::Protocol(_)));
        let session = captured.lock().unwrap().take().unwrap();
        assert_eq!(session.state().await, crate::session::SessionState::Closed);
    }

    #[tokio::test]
    async fn establish_fails_cleanly_against_silent_server() {
        // `cat` echoes our own frames back and never answers, so the
        // handshake times out; the child must not be left running.
        let spec = LaunchSpec::new("cat");
        let err = Connection::establish(&spec, short_timeout())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Handshake(_)));
    }

    #[tokio::test]
    async fn establish_fails_when_launch_fails() {
        let spec = LaunchSpec::new("/no/such/mcp/server");
        let err = Connection::establish(&spec, short_timeout())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Launch(_)));
    }
}
