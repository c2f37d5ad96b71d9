//! Client Configuration
//!
//! Loads the `config.json` file describing which MCP servers the client may
//! launch. Entries keep their file order; when several servers are
//! configured the first one wins.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use relay_mcp::LaunchSpec;

/// Top-level client configuration file
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Named server launch specs, in file order
    #[serde(rename = "mcpServers")]
    mcp_servers: serde_json::Map<String, serde_json::Value>,
}

impl ClientConfig {
    /// Load and parse the configuration file at `path`
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse configuration from its JSON text
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        if config.mcp_servers.is_empty() {
            anyhow::bail!("no MCP servers configured under \"mcpServers\"");
        }
        Ok(config)
    }

    /// Names of all configured servers, in file order
    pub fn server_names(&self) -> Vec<&str> {
        self.mcp_servers.keys().map(String::as_str).collect()
    }

    /// The first configured server, which is the one the client connects to
    pub fn first_server(&self) -> anyhow::Result<(String, LaunchSpec)> {
        let (name, value) = self
            .mcp_servers
            .iter()
            .next()
            .context("no MCP servers configured")?;
        let spec: LaunchSpec = serde_json::from_value(value.clone())
            .with_context(|| format!("invalid launch spec for server \"{name}\""))?;
        Ok((name.clone(), spec))
    }
}
