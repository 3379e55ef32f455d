//! Stable Diffusion WebUI MCP Server
//!
//! MCP server fronting a Stable Diffusion WebUI instance.

use anyhow::Result;
use clap::Parser;
use sdwebui_mcp_common::storage::{self, ArtifactStore};
use sdwebui_mcp_common::{Config, McpServerBuilder, TransportArgs};
use sdwebui_mcp_server::{SdWebuiHandler, SdWebuiServer};
use std::sync::Arc;

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "sdwebui-mcp-server")]
#[command(about = "MCP server for Stable Diffusion WebUI text-to-image generation")]
struct Args {
    /// Transport configuration
    #[command(flatten)]
    transport: TransportArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    sdwebui_mcp_common::tracing::init_tracing();
    sdwebui_mcp_common::tracing::install_panic_hook();

    tracing::info!("sdwebui-mcp-server starting...");

    let args = Args::parse();

    let config = Config::from_env()?;
    tracing::info!(
        sdwebui_url = %config.sdwebui_url,
        image_dir = %config.image_dir.display(),
        public_url = %config.public_url,
        "Configuration loaded"
    );

    let store = Arc::new(ArtifactStore::new(
        config.image_dir.clone(),
        config.public_url.clone(),
    ));
    let handler = SdWebuiHandler::new(&config, store.clone())?;
    let server = SdWebuiServer::new(handler);

    let transport = args.transport.into_transport();
    tracing::info!(transport = %transport, "Starting MCP server");

    McpServerBuilder::new(server)
        .with_transport(transport)
        .with_file_routes(storage::read_router(store), config.port)
        .run()
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
