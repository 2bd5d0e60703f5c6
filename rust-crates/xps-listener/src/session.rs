//! Per-connection consumer session

use xps_codec::{FrameHeader, StartHeader};

/// What the consumer knows about the run it is receiving.
///
/// Scan and store stay unset until a start header arrives, or until frame
/// headers have supplied both. Frames received before that are metadata only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerSession {
    scan_name: Option<String>,
    store_url: Option<String>,
    counter: u64,
}

impl ConsumerSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan_name(&self) -> Option<&str> {
        self.scan_name.as_deref()
    }

    pub fn store_url(&self) -> Option<&str> {
        self.store_url.as_deref()
    }

    /// Whether received frames can be located in the store
    pub fn is_ready(&self) -> bool {
        self.scan_name.is_some() && self.store_url.is_some()
    }

    /// Index the next received frame will get
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// A new run began: adopt its scan and store, restart counting.
    pub fn reset(&mut self, start: &StartHeader) {
        self.scan_name = Some(start.scan_name.clone());
        self.store_url = Some(start.store_url.clone());
        self.counter = 0;
    }

    /// Pick up scan and store changes carried by a frame header.
    pub fn update(&mut self, header: &FrameHeader) {
        if let Some(scan_name) = &header.scan_name {
            self.scan_name = Some(scan_name.clone());
        }
        if let Some(store_url) = &header.store_url {
            self.store_url = Some(store_url.clone());
        }
    }

    /// Claim the current index and advance the counter.
    pub fn next_frame(&mut self) -> u64 {
        let frame_number = self.counter;
        self.counter += 1;
        frame_number
    }

    /// Store URL of slice `frame_number` of `entity` in the current run, or
    /// `None` before the run is known.
    pub fn locator(
        &self,
        entity: &str,
        frame_number: u64,
        width: u64,
        height: u64,
    ) -> Option<String> {
        let (Some(store_url), Some(scan_name)) = (&self.store_url, &self.scan_name) else {
            return None;
        };
        Some(format!(
            "{}/api/v1/array/full/runs/{}/{}?slice={}:{},0:{},0:{}",
            store_url,
            scan_name,
            entity,
            frame_number,
            frame_number + 1,
            height,
            width
        ))
    }
}
