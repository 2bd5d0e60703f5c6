use std::sync::Arc;

use async_trait::async_trait;

use crate::events::{RunStart, RunStop};
use crate::models::Frame;

/// A consumer of run events.
///
/// The dispatcher calls a sink's hooks strictly in event order and never
/// starts the next event before the current hook has returned. Errors are
/// logged by the caller and never reach other sinks.
#[async_trait]
pub trait RunSink: Send + Sync {
    /// Name used in log lines
    fn name(&self) -> &str;

    async fn on_start(&self, start: &RunStart) -> anyhow::Result<()>;

    async fn on_frame(&self, frame: Arc<Frame>) -> anyhow::Result<()>;

    async fn on_stop(&self, stop: &RunStop) -> anyhow::Result<()>;
}
