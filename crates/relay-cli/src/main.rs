//! Interactive MCP Chat Client
//!
//! Launches the first MCP server named in the config file, connects a
//! session over its stdio, and runs a read-eval loop: each query goes to
//! the model together with the server's tool catalog, requested tool calls
//! are executed over the session, and the model's final text is printed.

mod config;

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_core::{
    Orchestrator, OrchestratorConfig, RelayError, ToolCatalog,
    provider::{GenerationOptions, ModelProvider},
    tool::ToolBackend,
};
use relay_mcp::{SessionConfig, lifecycle};
use relay_openai::OpenAiProvider;

use crate::config::ClientConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".into());
    let config = ClientConfig::load(&config_path)?;
    let (server_name, spec) = config.first_server()?;
    if config.server_names().len() > 1 {
        tracing::warn!(
            "multiple servers configured; using the first one: {server_name}"
        );
    }

    // Initialize the model provider
    let provider = Arc::new(OpenAiProvider::from_env()?);
    match provider.health_check().await {
        Ok(true) => tracing::info!("✓ Model endpoint reachable"),
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ Model endpoint not reachable - queries will fail");
        }
    }
    let generation = GenerationOptions {
        model: provider.model().to_string(),
        ..GenerationOptions::default()
    };

    // Launch the server, run the loop, and always tear the server down,
    // whichever way the loop ends.
    tracing::info!(server = %server_name, command = %spec.command, "connecting to MCP server");
    lifecycle::run(&spec, SessionConfig::default(), |session| async move {
        let backend: Arc<dyn ToolBackend> = session;
        let catalog = Arc::new(ToolCatalog::new(backend.clone()));
        catalog.refresh().await?;
        tracing::info!("Connected to server with {} tools:", catalog.len());
        for name in catalog.names() {
            tracing::info!("  • {name}");
        }

        let orchestrator = Orchestrator::new(
            provider,
            backend,
            catalog,
            OrchestratorConfig {
                generation,
                ..OrchestratorConfig::default()
            },
        );
        chat_loop(&orchestrator).await
    })
    .await
}

/// Read queries from stdin until `quit`, end of input, or Ctrl-C
async fn chat_loop(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    println!("\nMCP Client Started!");
    println!("Type your queries or 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nQuery: ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("quit") {
            break;
        }

        match orchestrator.ask(query).await {
            Ok(answer) => println!("\n{answer}"),
            Err(RelayError::SessionClosed) => {
                eprintln!("\nError: lost connection to the MCP server");
                anyhow::bail!("MCP session closed");
            }
            Err(err) => eprintln!("\nError: {}", err.user_message()),
        }
    }
    Ok(())
}
