use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use xps_codec::{unpack_frame_message, HeaderMessage};

use crate::error::{ListenerError, Result};
use crate::operator::{FrameEvent, FrameOperator};
use crate::session::ConsumerSession;

/// Reconnection delay after the channel closes
pub const RECONNECT_DELAY_SECS: u64 = 5;

/// Sample decoded from each payload unless configured otherwise
pub const DEFAULT_ENTITY: &str = "shot_mean";

/// Live-channel consumer that reconnects forever until stopped
pub struct ResilientListener {
    url: String,
    entity: String,
    reconnect_delay: Duration,
    operator: Arc<dyn FrameOperator>,
    session: Mutex<ConsumerSession>,
    stopped: AtomicBool,
    stop_signal: Notify,
}

impl ResilientListener {
    pub fn new(url: impl Into<String>, operator: Arc<dyn FrameOperator>) -> Self {
        Self {
            url: url.into(),
            entity: DEFAULT_ENTITY.to_string(),
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            operator,
            session: Mutex::new(ConsumerSession::new()),
            stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
        }
    }

    /// Decode `entity` instead of `shot_mean`
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = entity.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn session(&self) -> ConsumerSession {
        self.session.lock().await.clone()
    }

    /// Ask [`listen`](Self::listen) to return, interrupting a pending
    /// connect, receive or reconnect delay. A message already being handled
    /// is finished first.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_signal.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Connect, receive, and reconnect after a fixed delay, until stopped
    pub async fn listen(&self) {
        while !self.is_stopped() {
            match self.connect_and_process().await {
                Ok(()) => {
                    info!("Live channel closed");
                }
                Err(e) => {
                    error!("Live channel error: {}", e);
                }
            }

            if self.is_stopped() {
                break;
            }

            warn!(
                "Reconnecting to {} in {:?}...",
                self.url, self.reconnect_delay
            );
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = self.stop_signal.notified() => {}
            }
        }
        info!("Listener stopped");
    }

    /// One connection. A stop wakes a pending connect or receive; a message
    /// already being handled always runs to completion first.
    async fn connect_and_process(&self) -> Result<()> {
        let (mut ws, _) = tokio::select! {
            connected = connect_async(self.url.as_str()) => connected?,
            _ = self.stop_signal.notified() => return Ok(()),
        };
        info!("Connected to {}", self.url);

        loop {
            if self.is_stopped() {
                if let Err(e) = ws.close(None).await {
                    debug!("Close handshake failed: {}", e);
                }
                return Ok(());
            }

            let message = tokio::select! {
                message = ws.next() => message,
                _ = self.stop_signal.notified() => continue,
            };

            match message {
                None | Some(Ok(Message::Close(_))) => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(message)) => {
                    if let Err(e) = self.handle_message(message).await {
                        warn!("Discarding message: {}", e);
                    }
                }
            }
        }
    }

    /// Apply one message to the session; binary payloads go to the operator.
    ///
    /// Malformed messages return an error and leave the session untouched.
    /// Operator failures are logged here and count as handled.
    pub async fn handle_message(&self, message: Message) -> Result<()> {
        match message {
            Message::Text(text) => {
                match HeaderMessage::parse(&text)? {
                    HeaderMessage::Start(start) => {
                        info!("Run started: {} (store {})", start.scan_name, start.store_url);
                        self.session.lock().await.reset(&start);
                    }
                    HeaderMessage::Frame(header) => {
                        debug!("Frame header {}", header.frame_number);
                        self.session.lock().await.update(&header);
                    }
                }
                Ok(())
            }
            Message::Binary(bytes) => {
                let event = self.decode_frame(&bytes).await?;
                let frame_number = event.frame_number;
                if let Err(e) = self.operator.process(event).await {
                    let e = ListenerError::Operator(format!("{:#}", e));
                    error!("Frame {}: {}", frame_number, e);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn decode_frame(&self, bytes: &[u8]) -> Result<FrameEvent> {
        let message = unpack_frame_message(bytes)?;
        if message.width == 0 || message.height == 0 {
            return Err(ListenerError::protocol(format!(
                "empty frame shape {}x{}",
                message.width, message.height
            )));
        }
        let image = message.image(&self.entity)?.ok_or_else(|| {
            ListenerError::protocol(format!("payload has no '{}' sample", self.entity))
        })?;

        let mut session = self.session.lock().await;
        if !session.is_ready() {
            return Err(ListenerError::protocol(format!(
                "frame (shot {}) received before any run start",
                message.shot_num
            )));
        }
        let frame_number = session.next_frame();
        let locator = session
            .locator(&self.entity, frame_number, message.width, message.height)
            .ok_or_else(|| ListenerError::protocol("run context lost"))?;

        Ok(FrameEvent {
            image,
            frame_number,
            shot_num: message.shot_num,
            locator,
        })
    }
}
