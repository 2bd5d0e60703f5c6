use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use xps_codec::{pack_frame_message, FrameHeader, HeaderMessage, StartHeader};
use xps_models::{Frame, RunSink, RunStart, RunStop};

use crate::client::{ViewerConnection, ViewerSet};
use crate::error::{BroadcasterError, Result};

/// Broadcast server settings
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcasterConfig {
    /// `ws://host:port/path` to serve
    pub url: String,
    /// Base URL of the run store, forwarded to viewers
    pub store_url: String,
    /// Send the current start header to viewers that connect mid-run
    pub replay_start_to_late_joiners: bool,
    /// Per-viewer limit for delivering one event
    pub send_timeout: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765/xps_operator".to_string(),
            store_url: "http://localhost:8000".to_string(),
            replay_start_to_late_joiners: false,
            send_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Endpoint {
    host: String,
    port: u16,
    path: String,
}

impl Endpoint {
    fn parse(url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| BroadcasterError::invalid_url(format!("{}: {}", url, e)))?;

        if uri.scheme_str() != Some("ws") {
            return Err(BroadcasterError::invalid_url(format!(
                "{}: scheme must be ws",
                url
            )));
        }
        let host = uri
            .host()
            .ok_or_else(|| BroadcasterError::invalid_url(format!("{}: missing host", url)))?;

        Ok(Self {
            host: host.to_string(),
            port: uri.port_u16().unwrap_or(80),
            path: uri.path().to_string(),
        })
    }
}

/// State shared between the accept loop and connection handlers
#[derive(Clone)]
struct AcceptContext {
    viewers: ViewerSet,
    path: Arc<str>,
    start_snapshot: Arc<RwLock<Option<StartHeader>>>,
    replay_start: bool,
    send_timeout: Duration,
}

/// Live frame broadcaster for viewers
pub struct FrameBroadcaster {
    config: BroadcasterConfig,
    endpoint: Endpoint,
    viewers: ViewerSet,
    start_snapshot: Arc<RwLock<Option<StartHeader>>>,
    local_addr: Arc<RwLock<Option<SocketAddr>>>,
    accept_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    running: Arc<RwLock<bool>>,
}

impl FrameBroadcaster {
    /// Create a broadcaster. Nothing is bound until [`start`](Self::start).
    pub fn new(config: BroadcasterConfig) -> Result<Self> {
        let endpoint = Endpoint::parse(&config.url)?;

        Ok(Self {
            config,
            endpoint,
            viewers: ViewerSet::new(),
            start_snapshot: Arc::new(RwLock::new(None)),
            local_addr: Arc::new(RwLock::new(None)),
            accept_task: Arc::new(Mutex::new(None)),
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Bind the configured address and start accepting viewers
    pub async fn start(&self) -> Result<()> {
        let is_running = *self.running.read().await;
        if is_running {
            return Err(BroadcasterError::AlreadyRunning);
        }

        let listener =
            TcpListener::bind((self.endpoint.host.as_str(), self.endpoint.port)).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.write().await = Some(addr);

        tracing::info!(
            "Frame broadcaster listening on ws://{}{}",
            addr,
            self.endpoint.path
        );

        *self.running.write().await = true;

        let ctx = AcceptContext {
            viewers: self.viewers.clone(),
            path: Arc::from(self.endpoint.path.as_str()),
            start_snapshot: Arc::clone(&self.start_snapshot),
            replay_start: self.config.replay_start_to_late_joiners,
            send_timeout: self.config.send_timeout,
        };

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_viewer(stream, peer, ctx.clone()));
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept viewer: {}", e);
                    }
                }
            }
        });

        *self.accept_task.lock().await = Some(task);

        Ok(())
    }

    /// Stop accepting viewers and disconnect the connected ones
    pub async fn stop(&self) -> Result<()> {
        let is_running = *self.running.read().await;
        if !is_running {
            return Err(BroadcasterError::NotStarted);
        }

        *self.running.write().await = false;

        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
        self.viewers.disconnect_all().await;
        *self.local_addr.write().await = None;

        tracing::info!("Frame broadcaster stopped");
        Ok(())
    }

    /// Bound address, once started. Useful when the configured port is 0.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().await
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.count().await
    }

    /// Start header of the run in progress, if any
    pub async fn start_snapshot(&self) -> Option<StartHeader> {
        self.start_snapshot.read().await.clone()
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }
}

impl Drop for FrameBroadcaster {
    fn drop(&mut self) {
        if let Ok(mut task) = self.accept_task.try_lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl RunSink for FrameBroadcaster {
    fn name(&self) -> &str {
        "broadcaster"
    }

    async fn on_start(&self, start: &RunStart) -> anyhow::Result<()> {
        let header = StartHeader {
            scan_name: start.scan_name.clone(),
            store_url: self.config.store_url.clone(),
        };
        let json = HeaderMessage::Start(header.clone()).to_json()?;

        // Viewers registering meanwhile wait, then get the replay instead
        let mut snapshot = self.start_snapshot.write().await;
        *snapshot = Some(header);
        let delivered = self
            .viewers
            .broadcast(&[Message::Text(json)], self.config.send_timeout)
            .await;
        drop(snapshot);

        tracing::info!(
            "Run start '{}' sent to {} viewers",
            start.scan_name,
            delivered
        );
        Ok(())
    }

    async fn on_frame(&self, frame: Arc<Frame>) -> anyhow::Result<()> {
        if self.viewers.count().await == 0 {
            tracing::debug!("No viewers for frame {}", frame.frame_number);
            return Ok(());
        }

        let scan_name = self
            .start_snapshot
            .read()
            .await
            .as_ref()
            .map(|start| start.scan_name.clone());
        let header = HeaderMessage::Frame(FrameHeader {
            frame_number: frame.frame_number,
            shot_num: frame.shot_num,
            store_url: Some(self.config.store_url.clone()),
            scan_name,
        })
        .to_json()?;

        let frame_number = frame.frame_number;
        let payload = tokio::task::spawn_blocking(move || {
            pack_frame_message(&frame, BTreeMap::new())
        })
        .await
        .context("Frame packing task failed")??;

        let delivered = self
            .viewers
            .broadcast(
                &[Message::Text(header), Message::Binary(payload)],
                self.config.send_timeout,
            )
            .await;

        tracing::debug!("Frame {} sent to {} viewers", frame_number, delivered);
        Ok(())
    }

    async fn on_stop(&self, _stop: &RunStop) -> anyhow::Result<()> {
        if let Some(start) = self.start_snapshot.write().await.take() {
            tracing::info!("Run '{}' ended", start.scan_name);
        }
        Ok(())
    }
}

/// Handshake, register, wait for closure, deregister.
async fn handle_viewer(stream: TcpStream, peer: SocketAddr, ctx: AcceptContext) {
    let expected = Arc::clone(&ctx.path);
    let check_path = move |req: &Request, resp: Response| {
        if req.uri().path() == &*expected {
            Ok(resp)
        } else {
            let mut err = ErrorResponse::new(Some(format!("No service at {}", req.uri().path())));
            *err.status_mut() = StatusCode::NOT_FOUND;
            Err(err)
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("Rejected connection from {}: {}", peer, e);
            return;
        }
    };

    let (sink, mut incoming) = ws.split();
    let viewer = Arc::new(ViewerConnection::new(ctx.viewers.next_id(), peer, sink));

    // Held until the viewer is registered: a concurrent run start either
    // precedes the replay or is broadcast to the new viewer, never both.
    let snapshot = if ctx.replay_start {
        Some(ctx.start_snapshot.read().await)
    } else {
        None
    };

    if let Some(start) = snapshot.as_deref().and_then(Option::as_ref) {
        let sent = match HeaderMessage::Start(start.clone()).to_json() {
            Ok(json) => viewer
                .send_all(&[Message::Text(json)], ctx.send_timeout)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = sent {
            tracing::warn!("Failed to replay run start to {}: {}", peer, e);
            drop(snapshot);
            viewer.close(ctx.send_timeout).await;
            return;
        }
    }

    ctx.viewers.add(Arc::clone(&viewer)).await;
    drop(snapshot);

    tokio::select! {
        _ = drain(&mut incoming) => {
            tracing::debug!("Viewer {} closed the connection", peer);
        }
        _ = viewer.closed() => {
            tracing::debug!("Disconnecting viewer {}", peer);
        }
    }

    ctx.viewers.remove(viewer.id()).await;
    viewer.close(ctx.send_timeout).await;
}

/// Read and discard until the peer closes or errors.
async fn drain(incoming: &mut SplitStream<WebSocketStream<TcpStream>>) {
    while let Some(message) = incoming.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}
