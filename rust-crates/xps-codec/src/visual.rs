//! 8-bit visual encoding of detector samples

use xps_models::Sample2D;

/// Values within this distance of zero count as zero (numpy `allclose` atol).
const ZERO_TOLERANCE: f64 = 1e-8;

/// An 8-bit image in the same `width`-major layout as [`Sample2D`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

/// Encode a sample as log-stretched 8-bit bytes.
///
/// Raw detector range is dominated by a few bright regions, so values are
/// min-max normalized, stretched with `ln(1 + x)`, normalized again and scaled
/// to `0..=255`. An all-zero sample is cast as-is. A constant sample has no
/// range to normalize and encodes to zeros.
pub fn encode_visual(sample: &Sample2D) -> Vec<u8> {
    let data = sample.data();

    if data.iter().all(|v| v.abs() <= ZERO_TOLERANCE) {
        return data.iter().map(|&v| v as u8).collect();
    }

    let Some(normalized) = normalize(data.iter().copied()) else {
        return vec![0; data.len()];
    };
    let stretched: Vec<f64> = normalized.into_iter().map(f64::ln_1p).collect();
    let Some(normalized) = normalize(stretched.into_iter()) else {
        return vec![0; data.len()];
    };

    normalized.into_iter().map(|v| (v * 255.0) as u8).collect()
}

/// Min-max normalize to `[0, 1]`. `None` when the range is zero or not finite.
fn normalize(values: impl Iterator<Item = f64> + Clone) -> Option<Vec<f64>> {
    let (min, max) = values
        .clone()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return None;
    }
    Some(values.map(|v| (v - min) / range).collect())
}
