//! XPS Daemon - live frame distribution
//!
//! Reads run events from the instrument over a Unix socket, appends every
//! frame to the run store and streams it to connected viewers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use xps_broadcaster::FrameBroadcaster;
use xps_daemon::{DaemonConfig, IngestServer, RunDispatcher, StoreKind};
use xps_store::{IncrementalStore, MemoryBackend, SqliteBackend, StoreBackend};

#[derive(Parser, Debug)]
#[command(name = "xps-daemon", version, about = "Distribute live XPS frames")]
struct Args {
    /// Config file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep runs in memory only
    #[arg(long)]
    ephemeral: bool,
}

fn open_store(config: &DaemonConfig, ephemeral: bool) -> Result<IncrementalStore> {
    let backend: Arc<dyn StoreBackend> = if ephemeral || config.store.kind == StoreKind::Memory {
        warn!("Using in-memory run store, runs are lost on exit");
        Arc::new(MemoryBackend::new())
    } else {
        let db_path = config.store_db_path()?;
        let backend = SqliteBackend::open(&db_path)
            .with_context(|| format!("Failed to open run store {}", db_path.display()))?;
        info!("Run store: {}", db_path.display());
        Arc::new(backend)
    };
    Ok(IncrementalStore::new(backend))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DaemonConfig::load_from(path),
        None => DaemonConfig::load(),
    }
    .context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .with_level(true)
        .init();

    info!("Starting XPS daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config.config_path.display());

    let store = open_store(&config, args.ephemeral)?;

    let broadcaster = Arc::new(
        FrameBroadcaster::new(config.broadcaster_config())
            .context("Invalid broadcast configuration")?,
    );
    broadcaster
        .start()
        .await
        .context("Failed to start broadcaster")?;

    let mut dispatcher = RunDispatcher::new(Some(store));
    dispatcher.add_sink(broadcaster.clone());

    let (events_tx, events_rx) = mpsc::channel(config.event_queue_size.max(1));
    let dispatcher_task = tokio::spawn(dispatcher.run(events_rx));

    let socket_path = config.ingest_socket_path()?;
    let ingest = IngestServer::bind(&socket_path).context("Failed to start ingest server")?;

    info!("XPS daemon ready");
    info!("  - Ingest: {}", socket_path.display());
    info!("  - Viewers: {}", config.broadcast_url);

    tokio::select! {
        result = ingest.run(events_tx) => {
            if let Err(e) = result {
                error!("Ingest server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down...");
    if let Err(e) = broadcaster.stop().await {
        warn!("Failed to stop broadcaster: {}", e);
    }
    dispatcher_task.abort();
    info!("XPS daemon stopped");

    Ok(())
}
