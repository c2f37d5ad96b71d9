//! Tool Catalog
//!
//! Descriptors for remotely hosted tools and the read-only catalog view the
//! orchestrator renders into model requests. Execution happens behind the
//! [`ToolBackend`] seam; input schemas are passed through to the model and
//! never validated here.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Description of a single remote tool, as advertised by the server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier within a catalog
    pub name: String,

    /// Human-readable description (shown to the model)
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the tool's input, opaque to the relay
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// A tool invocation requested by the model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Call id, echoed back on the answering tool turn
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as a structured value
    #[serde(default)]
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

/// Seam between the orchestrator and whatever executes tools remotely.
///
/// The orchestrator works exclusively through this interface; the MCP
/// session implements it.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Fetch the current tool catalog from the remote side
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Execute one tool call and return its textual result payload
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String>;
}

/// Read-only cache of the latest catalog fetch.
///
/// `refresh` swaps the whole set atomically; readers holding a snapshot
/// never observe a partial update.
pub struct ToolCatalog {
    backend: Arc<dyn ToolBackend>,
    tools: RwLock<Arc<Vec<ToolDescriptor>>>,
}

impl ToolCatalog {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self {
            backend,
            tools: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Re-fetch the catalog and replace the cached set. Returns the number
    /// of tools now available.
    pub async fn refresh(&self) -> Result<usize> {
        let tools = self.backend.list_tools().await?;
        let count = tools.len();
        *self.tools.write().unwrap() = Arc::new(tools);
        tracing::debug!(tools = count, "tool catalog refreshed");
        Ok(count)
    }

    /// Current snapshot of the catalog
    pub fn snapshot(&self) -> Arc<Vec<ToolDescriptor>> {
        self.tools.read().unwrap().clone()
    }

    /// Names of the currently known tools
    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|t| t.name.clone()).collect()
    }

    /// Number of tools in the current snapshot
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Check if no tools are known
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedBackend {
        tools: Vec<ToolDescriptor>,
    }

    #[async_trait]
    impl ToolBackend for FixedBackend {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(self.tools.clone())
        }

        async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<String> {
            Ok(String::new())
        }
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: format!("{name} tool"),
            input_schema: json!({ "type": "object" }),
        }
    }

    #[tokio::test]
    async fn refresh_replaces_whole_set() {
        let backend = Arc::new(FixedBackend {
            tools: vec![descriptor("list_tables"), descriptor("run_query")],
        });
        let catalog = ToolCatalog::new(backend);
        assert!(catalog.is_empty());

        let old_snapshot = catalog.snapshot();
        let count = catalog.refresh().await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(catalog.names(), vec!["list_tables", "run_query"]);
        // A snapshot taken before the refresh is untouched
        assert!(old_snapshot.is_empty());
    }

    #[test]
    fn invocation_new_assigns_distinct_ids() {
        let first = ToolInvocation::new("list_tables", json!({}));
        let second = ToolInvocation::new("list_tables", json!({}));
        assert!(!first.id.is_empty());
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn descriptor_parses_mcp_shape() {
        let raw = json!({
            "name": "list_tables",
            "description": "List database tables",
            "inputSchema": { "type": "object", "properties": {} }
        });
        let tool: ToolDescriptor = serde_json::from_value(raw).unwrap();
        assert_eq!(tool.name, "list_tables");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn descriptor_defaults_missing_fields() {
        let tool: ToolDescriptor = serde_json::from_value(json!({ "name": "bare" })).unwrap();
        assert!(tool.description.is_empty());
        assert_eq!(tool.input_schema["type"], "object");
    }
}
