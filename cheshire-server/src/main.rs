//! cheshire-server - Conversational agent host
//!
//! HTTP server for the Cheshire host: the turn endpoint, memory and
//! extension administration, and the live routes contributed by extensions.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod error;
mod middleware;
mod routes;
mod state;

use config::Config;
use state::AppState;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "cheshire-server", version, about)]
struct Cli {
    /// Configuration file (default: $CHESHIRE_DIR/config.toml)
    #[arg(long, env = "CHESHIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(long, env = "CHESHIRE_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("cheshire_server=info".parse()?)
                .add_directive("cheshire_sdk=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("cheshire-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    info!("Config loaded from {:?}", config.config_path);

    let state = Arc::new(AppState::build(&config).await?);
    let app = routes::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    state.host.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
