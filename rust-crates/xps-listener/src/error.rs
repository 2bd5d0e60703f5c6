use thiserror::Error;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Codec error: {0}")]
    Codec(#[from] xps_codec::CodecError),

    #[error("Operator failed: {0}")]
    Operator(String),
}

impl ListenerError {
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ListenerError>;
