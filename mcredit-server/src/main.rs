//! Weather MCP server with credit-metered handlers.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p mcredit-server --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p mcredit-server
//!
//! # Configure logging level
//! RUST_LOG=debug cargo run -p mcredit-server
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `config.toml`)
//! - `HOST` - Override bind address (default: `0.0.0.0`)
//! - `PORT` - Override port (default: `3000`)
//! - `RUST_LOG` - Log level filter (default: `info`)

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use mcredit_server::build_app;
use mcredit_server::config::ServerConfig;
use mcredit_server::shutdown::SigDown;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Server failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        server_name = %config.server_name,
        agent_id = %config.agent_id,
        context_mode = ?config.context_mode,
        "Loaded configuration"
    );

    let app = build_app(&config)?;

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("MCP server listening on http://{addr}/mcp");

    let sig_down = SigDown::try_new()?;
    let shutdown = sig_down.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    sig_down.recv().await;

    tracing::info!("Server shut down gracefully");
    Ok(())
}
