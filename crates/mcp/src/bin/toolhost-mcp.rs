// Standalone MCP server binary

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use toolhost_core::MemoryStorage;
use toolhost_mcp::tools::{ToolRegistry, WhoAmITool};
use toolhost_mcp::{Environment, McpServer, ToolhostConfig, TransportMeta};

#[derive(Parser, Debug)]
#[command(name = "toolhost-mcp", version, about = "Multi-tenant MCP tool server over stdio")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "toolhost.toml")]
    config: PathBuf,

    /// Credential presented as a bearer token on every request
    #[arg(long, env = "TOOLHOST_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries protocol traffic, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolhost_core=info,toolhost_mcp=info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    tracing::info!("Toolhost MCP server starting...");

    let config = ToolhostConfig::load(&args.config)?;

    let storage = Arc::new(MemoryStorage::new());

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(WhoAmITool))?;

    tracing::info!("Registered {} tools", registry.len());

    let dispatcher = config.build_dispatcher(storage, registry, Environment::new());

    let mut transport = TransportMeta::new();
    if let Some(api_key) = args.api_key.as_deref() {
        transport = transport.with_bearer(api_key);
    }

    let server = McpServer::new(Arc::new(dispatcher)).with_transport(transport);
    server.start().await?;

    Ok(())
}
