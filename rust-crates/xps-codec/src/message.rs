//! MessagePack frame payload
//!
//! Wire layout (a MessagePack map, keys in this order):
//!
//! | key           | type   | notes                                   |
//! |---------------|--------|-----------------------------------------|
//! | `width`       | int    | leading axis of `shot_mean`             |
//! | `height`      | int    |                                         |
//! | `fitted`      | string | JSON array of `{x, h, fwhm}`            |
//! | `shot_num`    | int    |                                         |
//! | `shot_recent` | bin    | 8-bit visual encoding                   |
//! | `shot_mean`   | bin    |                                         |
//! | `shot_std`    | bin    |                                         |
//! | `extras`      | map    | optional string header fields           |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use xps_models::{Frame, PeakRow};

use crate::error::{CodecError, Result};
use crate::visual::{encode_visual, EncodedImage};

/// Images carried in every payload, by wire key.
pub const PACKED_IMAGES: [&str; 3] = ["shot_recent", "shot_mean", "shot_std"];

/// Decoded frame payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    pub width: u64,
    pub height: u64,
    pub peaks: Vec<PeakRow>,
    pub shot_num: i64,
    /// 8-bit images keyed by name (see [`PACKED_IMAGES`])
    pub images: BTreeMap<String, Vec<u8>>,
    pub extras: BTreeMap<String, String>,
}

impl FrameMessage {
    /// Build the payload for `frame`, encoding each packed image to 8 bits.
    pub fn from_frame(frame: &Frame, extras: BTreeMap<String, String>) -> Self {
        let mean = &frame.images.shot_mean;
        let images = [
            ("shot_recent", &frame.images.shot_recent),
            ("shot_mean", &frame.images.shot_mean),
            ("shot_std", &frame.images.shot_std),
        ]
        .into_iter()
        .map(|(name, sample)| (name.to_string(), encode_visual(sample)))
        .collect();

        Self {
            width: mean.width() as u64,
            height: mean.height() as u64,
            peaks: frame.detected_peaks.clone(),
            shot_num: frame.shot_num,
            images,
            extras,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let image = |name: &str| self.images.get(name).cloned().map(ByteBuf::from);
        let wire = WireFrame {
            width: Some(self.width),
            height: Some(self.height),
            fitted: Some(serde_json::to_string(&self.peaks)?),
            shot_num: Some(self.shot_num),
            shot_recent: image("shot_recent"),
            shot_mean: image("shot_mean"),
            shot_std: image("shot_std"),
            extras: self.extras.clone(),
        };
        Ok(rmp_serde::to_vec_named(&wire)?)
    }

    /// Parse MessagePack bytes. `width` and `height` are required.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let wire: WireFrame = rmp_serde::from_slice(bytes)?;

        let width = wire.width.ok_or(CodecError::MissingField("width"))?;
        let height = wire.height.ok_or(CodecError::MissingField("height"))?;
        let peaks = match wire.fitted.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };

        let mut images = BTreeMap::new();
        for (name, blob) in [
            ("shot_recent", wire.shot_recent),
            ("shot_mean", wire.shot_mean),
            ("shot_std", wire.shot_std),
        ] {
            if let Some(blob) = blob {
                images.insert(name.to_string(), blob.into_vec());
            }
        }

        Ok(Self {
            width,
            height,
            peaks,
            shot_num: wire.shot_num.unwrap_or(0),
            images,
            extras: wire.extras,
        })
    }

    /// Reshape the named image. `Ok(None)` when the image is absent; an
    /// error when its byte count does not match `width * height`.
    pub fn image(&self, name: &str) -> Result<Option<EncodedImage>> {
        let Some(pixels) = self.images.get(name) else {
            return Ok(None);
        };
        let expected = (self.width * self.height) as usize;
        if pixels.len() != expected {
            return Err(CodecError::ImageSize {
                name: name.to_string(),
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Some(EncodedImage {
            width: self.width as usize,
            height: self.height as usize,
            pixels: pixels.clone(),
        }))
    }
}

/// On-the-wire shape. Every field is optional so missing keys surface as
/// [`CodecError::MissingField`] instead of a generic decode error.
#[derive(Serialize, Deserialize)]
struct WireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fitted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shot_num: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shot_recent: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shot_mean: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shot_std: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extras: BTreeMap<String, String>,
}

/// Pack `frame` and `extras` into one binary message.
pub fn pack_frame_message(frame: &Frame, extras: BTreeMap<String, String>) -> Result<Vec<u8>> {
    FrameMessage::from_frame(frame, extras).to_bytes()
}

/// Inverse of [`pack_frame_message`].
pub fn unpack_frame_message(bytes: &[u8]) -> Result<FrameMessage> {
    FrameMessage::from_bytes(bytes)
}
