//! XPS live frame listener
//!
//! Connects to the broadcast server and logs every received frame.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xps_listener::{ListenerConfig, LoggingOperator, ResilientListener};

#[derive(Parser, Debug)]
#[command(name = "xps-listener", version, about = "Consume the XPS live frame channel")]
struct Args {
    /// Config file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Broadcast URL, overriding the config file
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ListenerConfig::load_from(path),
        None => ListenerConfig::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(url) = args.url {
        config.url = url;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    info!("Starting XPS listener v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config.config_path.display());

    let listener = Arc::new(
        ResilientListener::new(config.url.clone(), Arc::new(LoggingOperator))
            .with_entity(config.entity.clone())
            .with_reconnect_delay(config.reconnect_delay()),
    );

    tokio::select! {
        _ = listener.listen() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            listener.stop();
        }
    }

    info!("XPS listener stopped");
    Ok(())
}
