//! MCP Wire Protocol
//!
//! JSON-RPC 2.0 message shapes and the typed payloads for the MCP methods
//! this client speaks. Frames are newline-delimited JSON on the wire; the
//! transport handles framing, this module only defines shapes. Request ids
//! are caller-generated and echoed verbatim by the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::ToolDescriptor;

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision this client implements
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Well-known method names agreed with the server
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PING: &str = "ping";
}

/// An outbound JSON-RPC request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC notification (no id, no response expected)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params: None,
        }
    }
}

/// An inbound JSON-RPC response, carrying either a result or an error
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub jsonrpc: Option<String>,

    /// Echo of the request id. Kept as a raw value so a misbehaving server
    /// cannot fail the whole frame parse.
    pub id: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// The correlation id, if the server echoed a numeric one
    pub fn id_u64(&self) -> Option<u64> {
        self.id.as_u64()
    }
}

/// JSON-RPC error object
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Any message the server may send.
///
/// Variant order matters for untagged deserialization: a request carries
/// both `method` and `id`, a response only `id`, a notification only
/// `method`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// Client identity sent during the handshake
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// Capabilities advertised by this client (none beyond tool calling)
#[derive(Clone, Debug, Default, Serialize)]
pub struct ClientCapabilities {}

/// Params for the `initialize` request
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

/// Result of the `initialize` request
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub server_info: Option<Implementation>,
    #[serde(default)]
    pub capabilities: Value,
}

/// Result of `tools/list`
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Params for `tools/call`
#[derive(Clone, Debug, Serialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Result of `tools/call`
#[derive(Clone, Debug, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Concatenated text of all text content blocks
    pub fn text(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        parts.join("\n")
    }
}

/// One block of tool result content
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Content types this client does not render
    #[serde(other)]
    Other,
}
