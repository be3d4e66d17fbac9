//! Cypher Template Server entry point.
//!
//! Features:
//! - `.env` support for local development
//! - Graceful shutdown with request draining
//! - Signal handling (SIGTERM, SIGINT, SIGHUP)

use anyhow::Result;
use cypher_template_server::shutdown::{install_signal_handlers, new_shutdown_controller};
use cypher_template_server::transport::start_http_server_with_shutdown;
use cypher_template_server::{Config, CypherTemplateServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal outside development
    dotenvy::dotenv().ok();

    init_logging();

    let version = env!("CARGO_PKG_VERSION");
    info!("Cypher Template Server v{} starting...", version);

    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.database);

    let shutdown_controller = new_shutdown_controller(&config.shutdown);
    install_signal_handlers(shutdown_controller.clone()).await;

    let server = CypherTemplateServer::new(&config).await?;
    info!(
        "Server initialized with {} template(s)",
        server.registry().len()
    );

    start_http_server_with_shutdown(server, config.http, Some(shutdown_controller)).await?;
    info!("Server shutdown complete");

    Ok(())
}

/// Initialize tracing subscriber with stderr output.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn,cypher_template_server=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
