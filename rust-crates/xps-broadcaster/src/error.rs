use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BroadcasterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] xps_codec::CodecError),

    #[error("Invalid broadcast URL: {0}")]
    InvalidUrl(String),

    #[error("Send timed out after {0:?}")]
    SendTimeout(Duration),

    #[error("Broadcaster not started")]
    NotStarted,

    #[error("Broadcaster already running")]
    AlreadyRunning,
}

impl BroadcasterError {
    pub fn invalid_url<S: Into<String>>(msg: S) -> Self {
        Self::InvalidUrl(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BroadcasterError>;
