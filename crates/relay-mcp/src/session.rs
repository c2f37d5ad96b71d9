//! MCP Session
//!
//! Correlated request/response layer over the subprocess transport. Every
//! outbound request gets a fresh monotonic id; a single background task
//! drains inbound frames and wakes the waiter whose id matches. Callers
//! never touch the transport directly, so any number of requests may be in
//! flight at once.
//!
//! State machine: Unconnected → Handshaking → Ready → Closed. Closed is
//! terminal; closing cancels every pending request.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;

use relay_core::tool::{ToolBackend, ToolDescriptor};

use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, ClientCapabilities, Implementation, Inbound, InitializeParams,
    InitializeResult, ListToolsResult, Notification, PROTOCOL_VERSION, Request, Response, methods,
};
use crate::transport::{FrameReader, FrameWriter};

/// Session lifecycle states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Transport attached, handshake not yet performed
    Unconnected,
    /// Handshake request in flight
    Handshaking,
    /// Handshake acknowledged; tool requests are legal
    Ready,
    /// Terminal; every operation fails
    Closed,
}

/// Session tuning knobs
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Bound on how long any single request may wait for its response
    pub request_timeout: Duration,

    /// Client name reported during the handshake
    pub client_name: String,

    /// Client version reported during the handshake
    pub client_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            client_name: "relay".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

type Waiter = oneshot::Sender<Response>;

/// State shared with the background reader task
struct Shared {
    pending: RwLock<HashMap<u64, Waiter>>,
    state: RwLock<SessionState>,
}

impl Shared {
    /// Transition to Closed and cancel every pending request. Idempotent.
    async fn close(&self) {
        // Mark closed before dropping waiters so no new request can slip
        // into the pending map afterwards.
        {
            let mut state = self.state.write().await;
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        let mut pending = self.pending.write().await;
        let cancelled = pending.len();
        pending.clear(); // dropping the senders fails the waiters
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled pending requests on session close");
        }
    }
}

/// A live MCP session over a subprocess transport
pub struct McpSession {
    writer: Mutex<Option<FrameWriter>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    config: SessionConfig,
    reader_task: JoinHandle<()>,
}

impl McpSession {
    /// Attach a session to the framed transport halves and start the
    /// background reader. The session is Unconnected until `initialize`.
    pub fn new(writer: FrameWriter, reader: FrameReader, config: SessionConfig) -> Self {
        let shared = Arc::new(Shared {
            pending: RwLock::new(HashMap::new()),
            state: RwLock::new(SessionState::Unconnected),
        });
        let reader_task = tokio::spawn(read_loop(reader, shared.clone()));
        Self {
            writer: Mutex::new(Some(writer)),
            shared,
            next_id: AtomicU64::new(1),
            config,
            reader_task,
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        *self.shared.state.read().await
    }

    /// Number of requests currently awaiting a response (diagnostics)
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.read().await.len()
    }

    /// Perform the handshake. Valid only once, from Unconnected; any
    /// failure leaves the session Closed.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        {
            let mut state = self.shared.state.write().await;
            match *state {
                SessionState::Unconnected => *state = SessionState::Handshaking,
                SessionState::Closed => return Err(McpError::Closed),
                _ => return Err(McpError::Handshake("initialize called twice".into())),
            }
        }

        match self.handshake().await {
            Ok(result) => {
                *self.shared.state.write().await = SessionState::Ready;
                let server = result
                    .server_info
                    .as_ref()
                    .map_or("unknown", |info| info.name.as_str());
                tracing::info!(server, protocol = %result.protocol_version, "MCP session ready");
                Ok(result)
            }
            Err(err) => {
                self.shared.close().await;
                Err(match err {
                    McpError::Handshake(message) => McpError::Handshake(message),
                    other => McpError::Handshake(other.to_string()),
                })
            }
        }
    }

    async fn handshake(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: self.config.client_name.clone(),
                version: self.config.client_version.clone(),
            },
        };
        let response = self
            .request(methods::INITIALIZE, Some(serde_json::to_value(&params)?))
            .await?;

        if let Some(error) = response.error {
            return Err(McpError::Handshake(error.to_string()));
        }
        let result = response
            .result
            .ok_or_else(|| McpError::Handshake("empty handshake response".into()))?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Handshake(format!("malformed handshake response: {e}")))?;

        self.notify(methods::INITIALIZED).await?;
        Ok(result)
    }

    /// Fetch the server's tool catalog. Valid only in Ready.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_ready().await?;
        let response = self.request(methods::TOOLS_LIST, None).await?;

        if let Some(error) = response.error {
            return Err(McpError::Protocol(format!("tools/list failed: {error}")));
        }
        let result = response
            .result
            .ok_or_else(|| McpError::Protocol("empty tools/list response".into()))?;
        let parsed: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("malformed tools/list result: {e}")))?;
        Ok(parsed.tools)
    }

    /// Invoke one remote tool and return its textual result payload.
    /// Valid only in Ready.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        self.ensure_ready().await?;
        let params = CallToolParams {
            name: name.into(),
            arguments: Some(arguments),
        };
        let response = self
            .request(methods::TOOLS_CALL, Some(serde_json::to_value(&params)?))
            .await?;

        if let Some(error) = response.error {
            return Err(McpError::Tool {
                name: name.into(),
                message: error.to_string(),
            });
        }
        let result = response
            .result
            .ok_or_else(|| McpError::Protocol("empty tools/call response".into()))?;
        let parsed: CallToolResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("malformed tools/call result: {e}")))?;

        if parsed.is_error {
            return Err(McpError::Tool {
                name: name.into(),
                message: parsed.text(),
            });
        }
        Ok(parsed.text())
    }

    /// Heartbeat round trip. Valid only in Ready.
    pub async fn ping(&self) -> Result<()> {
        self.ensure_ready().await?;
        let response = self.request(methods::PING, None).await?;
        if let Some(error) = response.error {
            return Err(McpError::Protocol(format!("ping failed: {error}")));
        }
        Ok(())
    }

    /// Close the session, cancelling all pending requests. Idempotent.
    /// Dropping the writer closes the server's stdin, which is its
    /// graceful shutdown signal.
    pub async fn close(&self) {
        self.shared.close().await;
        self.reader_task.abort();
        self.writer.lock().await.take();
    }

    async fn ensure_ready(&self) -> Result<()> {
        match *self.shared.state.read().await {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(McpError::Closed),
            _ => Err(McpError::Protocol("session not initialized".into())),
        }
    }

    /// Send one request and wait for its correlated response, bounded by
    /// the configured timeout.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            // Register the waiter before sending so a fast response cannot
            // arrive unmatched. The state check happens under the pending
            // lock: close() clears the map after marking Closed, so a
            // request can never slip in behind it and sit out its timeout.
            let mut pending = self.shared.pending.write().await;
            if *self.shared.state.read().await == SessionState::Closed {
                return Err(McpError::Closed);
            }
            pending.insert(id, tx);
        }

        let frame = serde_json::to_string(&Request::new(id, method, params))?;
        if let Err(err) = self.send_frame(&frame).await {
            self.shared.pending.write().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // The waiter was dropped: the session closed underneath us.
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => {
                self.shared.pending.write().await.remove(&id);
                Err(McpError::Timeout(method.into()))
            }
        }
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let frame = serde_json::to_string(&Notification::new(method))?;
        self.send_frame(&frame).await
    }

    async fn send_frame(&self, frame: &str) -> Result<()> {
        match self.writer.lock().await.as_mut() {
            Some(writer) => writer.send(frame).await,
            None => Err(McpError::Closed),
        }
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[async_trait]
impl ToolBackend for McpSession {
    async fn list_tools(&self) -> relay_core::Result<Vec<ToolDescriptor>> {
        McpSession::list_tools(self).await.map_err(Into::into)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> relay_core::Result<String> {
        McpSession::call_tool(self, name, arguments)
            .await
            .map_err(Into::into)
    }
}

/// Drain inbound frames for the lifetime of the session. Ends, closing the
/// session, when the server closes its output or the transport fails.
async fn read_loop(mut reader: FrameReader, shared: Arc<Shared>) {
    loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => dispatch(&frame, &shared).await,
            Ok(None) => {
                tracing::debug!("transport reached end of stream");
                break;
            }
            Err(err) => {
                tracing::warn!(error = %err, "transport read failed");
                break;
            }
        }
    }
    shared.close().await;
}

/// Route one inbound frame. Unmatched or malformed frames are logged and
/// dropped, never fatal.
async fn dispatch(frame: &str, shared: &Shared) {
    match serde_json::from_str::<Inbound>(frame) {
        Ok(Inbound::Response(response)) => {
            let Some(id) = response.id_u64() else {
                tracing::warn!("discarding response with non-numeric id");
                return;
            };
            let waiter = shared.pending.write().await.remove(&id);
            match waiter {
                // The receiver may have timed out meanwhile; a failed send
                // here is the same late-response case, and just as harmless.
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => tracing::warn!(id, "discarding response for unknown or expired request"),
            }
        }
        Ok(Inbound::Notification(notification)) => {
            tracing::debug!(method = %notification.method, "server notification");
        }
        Ok(Inbound::Request(request)) => {
            tracing::warn!(method = %request.method, "unexpected request from server");
        }
        Err(err) => {
            tracing::warn!(error = %err, "discarding malformed frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipe_session(config: SessionConfig) -> (Arc<McpSession>, FrameWriter, FrameReader) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let session = Arc::new(McpSession::new(
            FrameWriter::new(client_write),
            FrameReader::new(client_read),
            config,
        ));
        (
            session,
            FrameWriter::new(server_write),
            FrameReader::new(server_read),
        )
    }

    /// Read frames until the next request, skipping notifications
    async fn read_request(reader: &mut FrameReader) -> Request {
        loop {
            let frame = reader.next_frame().await.unwrap().unwrap();
            if let Inbound::Request(request) = serde_json::from_str(&frame).unwrap() {
                return request;
            }
        }
    }

    async fn respond(writer: &mut FrameWriter, id: u64, result: Value) {
        let frame = json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string();
        writer.send(&frame).await.unwrap();
    }

    fn text_result(text: &str) -> Value {
        json!({ "content": [{ "type": "text", "text": text }] })
    }

    /// Script the server half of a successful handshake
    async fn serve_initialize(reader: &mut FrameReader, writer: &mut FrameWriter) {
        let request = read_request(reader).await;
        assert_eq!(request.method, methods::INITIALIZE);
        respond(
            writer,
            request.id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": { "name": "fake-server", "version": "0.0.1" },
                "capabilities": { "tools": {} }
            }),
        )
        .await;
    }

    #[tokio::test]
    async fn handshake_transitions_to_ready_and_sends_initialized() {
        let (session, mut sw, mut sr) = pipe_session(SessionConfig::default());
        let server = tokio::spawn(async move {
            serve_initialize(&mut sr, &mut sw).await;
            // The initialized notification must follow the handshake.
            let frame = sr.next_frame().await.unwrap().unwrap();
            let Inbound::Notification(notification) = serde_json::from_str(&frame).unwrap() else {
                panic!("expected notification, got: {frame}");
            };
            assert_eq!(notification.method, methods::INITIALIZED);
        });

        let result = session.initialize().await.unwrap();
        assert_eq!(result.server_info.unwrap().name, "fake-server");
        assert_eq!(session.state().await, SessionState::Ready);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_error_response_closes_session() {
        let (session, mut sw, mut sr) = pipe_session(SessionConfig::default());
        let server = tokio::spawn(async move {
            let request = read_request(&mut sr).await;
            let frame = json!({
                "jsonrpc": "2.0",
                "id": request.id,
                "error": { "code": -32600, "message": "unsupported protocol" }
            })
            .to_string();
            sw.send(&frame).await.unwrap();
        });

        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, McpError::Handshake(_)));
        assert_eq!(session.state().await, SessionState::Closed);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_calls_match_reordered_responses() {
        let (session, mut sw, mut sr) = pipe_session(SessionConfig::default());
        let server = tokio::spawn(async move {
            serve_initialize(&mut sr, &mut sw).await;
            let first = read_request(&mut sr).await;
            let second = read_request(&mut sr).await;
            // Answer in reverse arrival order; correlation must still hold.
            for request in [second, first] {
                let name = request.params.as_ref().unwrap()["name"]
                    .as_str()
                    .unwrap()
                    .to_string();
                respond(&mut sw, request.id, text_result(&format!("result-{name}"))).await;
            }
        });

        session.initialize().await.unwrap();
        let (alpha, beta) = tokio::join!(
            session.call_tool("alpha", json!({})),
            session.call_tool("beta", json!({}))
        );

        assert_eq!(alpha.unwrap(), "result-alpha");
        assert_eq!(beta.unwrap(), "result-beta");
        assert_eq!(session.pending_count().await, 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_response_id_is_discarded() {
        let (session, mut sw, mut sr) = pipe_session(SessionConfig::default());
        let server = tokio::spawn(async move {
            serve_initialize(&mut sr, &mut sw).await;
            let request = read_request(&mut sr).await;
            // A stale response for an id nobody is waiting on...
            respond(&mut sw, 999, text_result("stale")).await;
            // ...must not disturb the real one.
            respond(&mut sw, request.id, text_result("fresh")).await;
        });

        session.initialize().await.unwrap();
        let result = session.call_tool("list_tables", json!({})).await.unwrap();

        assert_eq!(result, "fresh");
        assert_eq!(session.pending_count().await, 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn close_cancels_all_pending_requests() {
        let (session, mut sw, mut sr) = pipe_session(SessionConfig::default());
        let (requests_seen_tx, requests_seen_rx) = oneshot::channel();
        let server = tokio::spawn(async move {
            serve_initialize(&mut sr, &mut sw).await;
            for _ in 0..3 {
                read_request(&mut sr).await;
            }
            requests_seen_tx.send(()).unwrap();
            // Never respond; hold the transport open.
            std::future::pending::<()>().await;
        });

        session.initialize().await.unwrap();
        let callers: Vec<_> = (0..3)
            .map(|i| {
                let session = session.clone();
                tokio::spawn(
                    async move { session.call_tool(&format!("tool-{i}"), json!({})).await },
                )
            })
            .collect();

        requests_seen_rx.await.unwrap();
        assert_eq!(session.pending_count().await, 3);
        session.close().await;

        for caller in callers {
            let err = caller.await.unwrap().unwrap_err();
            assert!(matches!(err, McpError::Closed));
        }
        assert_eq!(session.pending_count().await, 0);
        assert_eq!(session.state().await, SessionState::Closed);
        server.abort();
    }

    #[tokio::test]
    async fn close_racing_a_request_fails_it_with_closed() {
        // Whichever side of the waiter registration the close lands on,
        // the caller gets Closed right away instead of waiting out the
        // request timeout.
        for _ in 0..8 {
            let (session, mut sw, mut sr) = pipe_session(SessionConfig::default());
            let server = tokio::spawn(async move {
                serve_initialize(&mut sr, &mut sw).await;
                std::future::pending::<()>().await;
            });

            session.initialize().await.unwrap();
            let caller = {
                let session = session.clone();
                tokio::spawn(async move { session.call_tool("slow", json!({})).await })
            };
            tokio::task::yield_now().await;
            session.close().await;

            let err = tokio::time::timeout(Duration::from_secs(2), caller)
                .await
                .expect("caller must not wait out the request timeout")
                .unwrap()
                .unwrap_err();
            assert!(matches!(err, McpError::Closed));
            server.abort();
        }
    }

    #[tokio::test]
    async fn timeout_removes_pending_and_late_response_is_dropped() {
        let config = SessionConfig {
            request_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        };
        let (session, mut sw, mut sr) = pipe_session(config);
        let (timed_out_tx, timed_out_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            serve_initialize(&mut sr, &mut sw).await;
            let request = read_request(&mut sr).await;
            // Wait for the caller to give up, then answer anyway.
            timed_out_rx.await.unwrap();
            respond(&mut sw, request.id, text_result("too late")).await;
            // The session must still work for a fresh request.
            let ping = read_request(&mut sr).await;
            assert_eq!(ping.method, methods::PING);
            respond(&mut sw, ping.id, json!({})).await;
        });

        session.initialize().await.unwrap();
        let err = session.call_tool("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout(_)));
        assert_eq!(session.pending_count().await, 0);

        timed_out_tx.send(()).unwrap();
        // The late response is discarded; the session keeps serving.
        session.ping().await.unwrap();
        assert_eq!(session.pending_count().await, 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_eof_closes_session() {
        let (session, mut sw, mut sr) = pipe_session(SessionConfig::default());
        let server = tokio::spawn(async move {
            serve_initialize(&mut sr, &mut sw).await;
            // Dropping both halves ends the stream.
        });

        session.initialize().await.unwrap();
        server.await.unwrap();

        // Wait for the reader task to observe EOF.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while session.state().await != SessionState::Closed {
            assert!(tokio::time::Instant::now() < deadline, "session never closed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let err = session.call_tool("anything", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Closed));
    }

    #[tokio::test]
    async fn tool_error_result_surfaces_as_tool_error() {
        let (session, mut sw, mut sr) = pipe_session(SessionConfig::default());
        let server = tokio::spawn(async move {
            serve_initialize(&mut sr, &mut sw).await;
            let request = read_request(&mut sr).await;
            respond(
                &mut sw,
                request.id,
                json!({
                    "content": [{ "type": "text", "text": "no such table" }],
                    "isError": true
                }),
            )
            .await;
        });

        session.initialize().await.unwrap();
        let err = session.call_tool("run_query", json!({})).await.unwrap_err();

        match err {
            McpError::Tool { name, message } => {
                assert_eq!(name, "run_query");
                assert_eq!(message, "no such table");
            }
            other => panic!("expected tool error, got: {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn list_tools_parses_catalog() {
        let (session, mut sw, mut sr) = pipe_session(SessionConfig::default());
        let server = tokio::spawn(async move {
            serve_initialize(&mut sr, &mut sw).await;
            let request = read_request(&mut sr).await;
            assert_eq!(request.method, methods::TOOLS_LIST);
            respond(
                &mut sw,
                request.id,
                json!({
                    "tools": [
                        {
                            "name": "list_tables",
                            "description": "List database tables",
                            "inputSchema": { "type": "object" }
                        },
                        { "name": "run_query" }
                    ]
                }),
            )
            .await;
        });

        session.initialize().await.unwrap();
        let tools = session.list_tools().await.unwrap();

        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "list_tables");
        assert_eq!(tools[1].name, "run_query");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn operations_require_initialization() {
        let (session, _sw, _sr) = pipe_session(SessionConfig::default());
        let err = session.call_tool("anything", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (session, mut sw, mut sr) = pipe_session(SessionConfig::default());
        let server = tokio::spawn(async move {
            serve_initialize(&mut sr, &mut sw).await;
        });

        session.initialize().await.unwrap();
        server.await.unwrap();
        session.close().await;
        session.close().await;

        assert_eq!(session.state().await, SessionState::Closed);
        let err = session.call_tool("anything", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Closed));
    }
}
