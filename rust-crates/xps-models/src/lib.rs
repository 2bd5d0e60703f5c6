//! Shared data model for the XPS frame distribution services
//!
//! - [`Frame`]: one instrument shot (named 2-D samples + detected peaks)
//! - [`Table`]: column-named rows used for peaks and function timings
//! - [`RunEvent`]: the closed Start / Result / Stop union
//! - [`RunSink`]: the seam every event consumer implements

pub mod events;
pub mod models;
pub mod sink;

pub use events::{RunEvent, RunStart, RunStop};
pub use models::{Frame, FrameImages, ModelError, PeakRow, Sample2D, Table, PEAK_COLUMNS};
pub use sink::RunSink;
