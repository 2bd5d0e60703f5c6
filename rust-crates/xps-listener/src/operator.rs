//! Downstream frame processing

use async_trait::async_trait;
use tracing::info;
use xps_codec::EncodedImage;

/// One decoded frame handed to an operator.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEvent {
    pub image: EncodedImage,
    /// Position of the frame in the current run, counted by the consumer
    pub frame_number: u64,
    pub shot_num: i64,
    /// Store URL of the full-resolution slice
    pub locator: String,
}

/// Consumer-side processing step. Failures are logged by the listener and
/// never end the session.
#[async_trait]
pub trait FrameOperator: Send + Sync {
    async fn process(&self, event: FrameEvent) -> anyhow::Result<()>;
}

/// Logs every frame event.
#[derive(Debug, Default)]
pub struct LoggingOperator;

#[async_trait]
impl FrameOperator for LoggingOperator {
    async fn process(&self, event: FrameEvent) -> anyhow::Result<()> {
        info!(
            "Frame {} (shot {}): {}x{} -> {}",
            event.frame_number,
            event.shot_num,
            event.image.width,
            event.image.height,
            event.locator
        );
        Ok(())
    }
}
