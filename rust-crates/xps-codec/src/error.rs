//! Error types for the live-channel codec

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Image '{name}' has {actual} bytes, expected {expected}")]
    ImageSize {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unrecognized header message: {0}")]
    UnknownHeader(String),

    #[error("MessagePack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    pub fn unknown_header<S: Into<String>>(msg: S) -> Self {
        Self::UnknownHeader(msg.into())
    }
}
