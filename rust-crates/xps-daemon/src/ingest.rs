//! Unix socket ingest of instrument run events
//!
//! Producers write newline-delimited JSON [`RunEvent`]s. Every parsed event is
//! forwarded, in arrival order, to the dispatcher's channel.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use xps_models::RunEvent;

/// Unix socket ingest server
pub struct IngestServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IngestServer {
    /// Bind `socket_path`, replacing a stale socket file.
    pub fn bind(socket_path: impl AsRef<Path>) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        // Remove existing socket if it exists
        let _ = std::fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind ingest socket {}", socket_path.display()))?;
        xps_paths::secure_socket_permissions(&socket_path)?;

        info!("Ingest server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept producers until the future is dropped. Each connection gets its
    /// own task feeding `events`.
    pub async fn run(self, events: mpsc::Sender<RunEvent>) -> Result<()> {
        loop {
            let (stream, _) = self
                .listener
                .accept()
                .await
                .context("Failed to accept ingest connection")?;
            debug!("Producer connected");

            let events = events.clone();
            tokio::spawn(async move {
                match handle_connection(stream, events).await {
                    Ok(count) => debug!("Producer disconnected after {} events", count),
                    Err(e) => error!("Ingest connection error: {}", e),
                }
            });
        }
    }
}

impl Drop for IngestServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Forward every event read from `stream`. Malformed lines are logged and
/// skipped. Returns the number of events forwarded.
pub async fn handle_connection(stream: UnixStream, events: mpsc::Sender<RunEvent>) -> Result<u64> {
    let mut lines = BufReader::new(stream).lines();
    let mut forwarded = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read from ingest socket")?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<RunEvent>(line) {
            Ok(event) => {
                debug!("Received {} event", event.kind());
                if events.send(event).await.is_err() {
                    warn!("Dispatcher gone, dropping producer connection");
                    break;
                }
                forwarded += 1;
            }
            Err(e) => {
                warn!("Skipping malformed event: {}", e);
            }
        }
    }

    Ok(forwarded)
}
