//! Live frame broadcaster for XPS viewers
//!
//! Serves a single WebSocket path (`/xps_operator` by default) and pushes
//! every run event to all connected viewers.
//!
//! # Protocol
//!
//! - Run start: one JSON text message
//!   `{"msg_type":"start","scan_name":..,"store_url":..}`
//! - Frame: a JSON text header `{frame_number, shot_num, store_url, scan_name}`
//!   followed by the MessagePack payload built by [`xps_codec::pack_frame_message`]
//! - Run stop: nothing is sent
//!
//! Upgrades on any other path are refused with HTTP 404. A viewer whose send
//! fails or takes longer than the configured timeout is disconnected; other
//! viewers are never held up by it.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use xps_broadcaster::{BroadcasterConfig, FrameBroadcaster};
//! use xps_models::{RunSink, RunStart};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broadcaster = Arc::new(FrameBroadcaster::new(BroadcasterConfig::default())?);
//!     broadcaster.start().await?;
//!
//!     broadcaster
//!         .on_start(&RunStart { scan_name: "scan-1".to_string() })
//!         .await?;
//!
//!     broadcaster.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod client;
pub mod error;

// Re-exports
pub use broadcaster::{BroadcasterConfig, FrameBroadcaster};
pub use client::{ViewerConnection, ViewerSet};
pub use error::{BroadcasterError, Result};
