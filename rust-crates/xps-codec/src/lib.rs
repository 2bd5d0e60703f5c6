//! Live-channel codec for XPS frames
//!
//! Pure functions, no I/O:
//!
//! - [`encode_visual`]: 2-D sample → 8-bit log-stretched image bytes
//! - [`pack_frame_message`] / [`unpack_frame_message`]: MessagePack payload
//!   sent as the binary half of every frame broadcast
//! - [`HeaderMessage`]: JSON text headers (run start, per-frame metadata)

pub mod error;
pub mod header;
pub mod message;
pub mod visual;

pub use error::{CodecError, Result};
pub use header::{FrameHeader, HeaderMessage, StartHeader};
pub use message::{pack_frame_message, unpack_frame_message, FrameMessage, PACKED_IMAGES};
pub use visual::{encode_visual, EncodedImage};
