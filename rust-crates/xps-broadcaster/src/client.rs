use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::{BroadcasterError, Result};

pub type ViewerSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Write half of one viewer's WebSocket
pub struct ViewerConnection {
    id: u64,
    peer: SocketAddr,
    sink: Mutex<ViewerSink>,
    closed: Notify,
}

impl ViewerConnection {
    pub fn new(id: u64, peer: SocketAddr, sink: ViewerSink) -> Self {
        Self {
            id,
            peer,
            sink: Mutex::new(sink),
            closed: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send `messages` in order. The whole sequence must finish within
    /// `timeout`.
    pub async fn send_all(&self, messages: &[Message], timeout: Duration) -> Result<()> {
        let send = async {
            let mut sink = self.sink.lock().await;
            for message in messages {
                sink.send(message.clone()).await?;
            }
            Ok::<(), BroadcasterError>(())
        };

        match tokio::time::timeout(timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(BroadcasterError::SendTimeout(timeout)),
        }
    }

    /// Ask the connection handler to drop this viewer.
    pub fn disconnect(&self) {
        self.closed.notify_one();
    }

    /// Resolves once [`disconnect`](Self::disconnect) has been called.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }

    /// Send a close frame, giving up after `timeout`.
    pub async fn close(&self, timeout: Duration) {
        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        if let Ok(Err(e)) = tokio::time::timeout(timeout, close).await {
            tracing::debug!("Close handshake with viewer {} failed: {}", self.id, e);
        }
    }
}

/// Thread-safe set of live viewers
///
/// Only connection handlers add and remove entries. A failed broadcast
/// signals the viewer's handler, which then removes it.
#[derive(Clone, Default)]
pub struct ViewerSet {
    viewers: Arc<Mutex<HashMap<u64, Arc<ViewerConnection>>>>,
    next_id: Arc<AtomicU64>,
}

impl ViewerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a new connection
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn add(&self, viewer: Arc<ViewerConnection>) {
        let mut viewers = self.viewers.lock().await;
        let peer = viewer.peer();
        viewers.insert(viewer.id(), viewer);
        tracing::info!("Viewer {} connected. Total viewers: {}", peer, viewers.len());
    }

    pub async fn remove(&self, id: u64) {
        let mut viewers = self.viewers.lock().await;
        if let Some(viewer) = viewers.remove(&id) {
            tracing::info!(
                "Viewer {} disconnected. Remaining: {}",
                viewer.peer(),
                viewers.len()
            );
        }
    }

    pub async fn count(&self) -> usize {
        self.viewers.lock().await.len()
    }

    /// Send `messages` to every viewer concurrently and wait for all of them.
    /// Viewers that fail or time out are disconnected. Returns how many
    /// viewers received everything.
    pub async fn broadcast(&self, messages: &[Message], timeout: Duration) -> usize {
        let viewers: Vec<Arc<ViewerConnection>> =
            self.viewers.lock().await.values().cloned().collect();

        let sends = viewers.iter().map(|viewer| async move {
            match viewer.send_all(messages, timeout).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Failed to send to viewer {}: {}", viewer.peer(), e);
                    viewer.disconnect();
                    false
                }
            }
        });

        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }

    /// Signal every connection handler to close.
    pub async fn disconnect_all(&self) {
        for viewer in self.viewers.lock().await.values() {
            viewer.disconnect();
        }
    }
}
