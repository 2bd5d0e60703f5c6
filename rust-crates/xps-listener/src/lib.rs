//! Resilient consumer of the XPS live frame channel
//!
//! [`ResilientListener`] connects to the broadcast server, tracks the current
//! run from start and frame headers, decodes each binary payload and hands a
//! [`FrameEvent`] with a store locator to a [`FrameOperator`]. When the
//! connection drops it waits a fixed delay and reconnects, forever, until
//! [`ResilientListener::stop`] is called.
//!
//! Frames are counted by the consumer from the last start header; the count
//! selects the store slice in the locator:
//!
//! ```text
//! {store_url}/api/v1/array/full/runs/{scan}/{entity}?slice={n}:{n+1},0:{height},0:{width}
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod operator;
pub mod session;

pub use config::ListenerConfig;
pub use error::{ListenerError, Result};
pub use listener::{ResilientListener, DEFAULT_ENTITY, RECONNECT_DELAY_SECS};
pub use operator::{FrameEvent, FrameOperator, LoggingOperator};
pub use session::ConsumerSession;
