//! Data models for instrument results

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Column names of the detected-peaks table, in order.
pub const PEAK_COLUMNS: [&str; 3] = ["x", "h", "fwhm"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Sample of shape {width}x{height} needs {expected} values, got {actual}")]
    SampleLength {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Table row {row} has {actual} cells, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// A dense 2-D numeric sample.
///
/// `width` is the leading axis: value `(x, y)` lives at `data[x * height + y]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSample")]
pub struct Sample2D {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

#[derive(Deserialize)]
struct RawSample {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl TryFrom<RawSample> for Sample2D {
    type Error = ModelError;

    fn try_from(raw: RawSample) -> Result<Self, Self::Error> {
        Sample2D::new(raw.width, raw.height, raw.data)
    }
}

impl Sample2D {
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Result<Self, ModelError> {
        let expected = width * height;
        if data.len() != expected {
            return Err(ModelError::SampleLength {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Build a sample by evaluating `f(x, y)` for every cell.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for x in 0..width {
            for y in 0..height {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.width, self.height]
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One detected peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakRow {
    pub x: f64,
    pub h: f64,
    pub fwhm: f64,
}

/// Column-named rows. Cells are JSON values so timing tables can carry
/// function names next to durations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, rejecting it if its width does not match the columns.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), ModelError> {
        if row.len() != self.columns.len() {
            return Err(ModelError::RowWidth {
                row: self.rows.len(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Check every row against the column count.
    pub fn validate(&self) -> Result<(), ModelError> {
        for (idx, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(ModelError::RowWidth {
                    row: idx,
                    expected: self.columns.len(),
                    actual: row.len(),
                });
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The fixed set of images produced for every shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameImages {
    /// Detector image integrated over its height
    pub integrated_frames: Sample2D,
    /// Forward transform
    pub vfft: Sample2D,
    /// Inverse transform
    pub ifft: Sample2D,
    /// Most recent shot
    pub shot_recent: Sample2D,
    /// Running mean over the run
    pub shot_mean: Sample2D,
    /// Running standard deviation over the run
    pub shot_std: Sample2D,
}

impl FrameImages {
    /// Every image with its entity name, in a stable order.
    pub fn named(&self) -> [(&'static str, &Sample2D); 6] {
        [
            ("integrated_frames", &self.integrated_frames),
            ("vfft", &self.vfft),
            ("ifft", &self.ifft),
            ("shot_recent", &self.shot_recent),
            ("shot_mean", &self.shot_mean),
            ("shot_std", &self.shot_std),
        ]
    }

    /// The same sample repeated in every slot. Handy for tests and simulators.
    pub fn uniform(sample: Sample2D) -> Self {
        Self {
            integrated_frames: sample.clone(),
            vfft: sample.clone(),
            ifft: sample.clone(),
            shot_recent: sample.clone(),
            shot_mean: sample.clone(),
            shot_std: sample,
        }
    }
}

/// One instrument shot's worth of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub frame_number: u64,
    pub shot_num: i64,
    pub images: FrameImages,
    #[serde(default)]
    pub detected_peaks: Vec<PeakRow>,
}

impl Frame {
    /// Detected peaks as an `x, h, fwhm` table.
    pub fn peaks_table(&self) -> Table {
        Table {
            columns: PEAK_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: self
                .detected_peaks
                .iter()
                .map(|p| vec![Value::from(p.x), Value::from(p.h), Value::from(p.fwhm)])
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_length_checked() {
        let err = Sample2D::new(2, 3, vec![0.0; 5]).unwrap_err();
        assert_eq!(
            err,
            ModelError::SampleLength {
                width: 2,
                height: 3,
                expected: 6,
                actual: 5
            }
        );
    }

    #[test]
    fn test_sample_layout() {
        let sample = Sample2D::from_fn(2, 3, |x, y| (x * 10 + y) as f64);
        assert_eq!(sample.shape(), [2, 3]);
        assert_eq!(sample.data(), &[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_sample_deserialization_validates() {
        let ok: Sample2D = serde_json::from_str(r#"{"width":1,"height":2,"data":[1.0,2.0]}"#).unwrap();
        assert_eq!(ok.len(), 2);

        let bad = serde_json::from_str::<Sample2D>(r#"{"width":2,"height":2,"data":[1.0]}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_peaks_table() {
        let frame = Frame {
            frame_number: 0,
            shot_num: 3,
            images: FrameImages::uniform(Sample2D::zeros(1, 1)),
            detected_peaks: vec![PeakRow {
                x: 235.0,
                h: 433.3,
                fwhm: 4.5,
            }],
        };
        let table = frame.peaks_table();
        assert_eq!(table.columns, vec!["x", "h", "fwhm"]);
        assert_eq!(table.rows[0][1], Value::from(433.3));
    }

    #[test]
    fn test_table_row_width() {
        let mut table = Table::new(vec!["function".into(), "seconds".into()]);
        table.push_row(vec!["fft".into(), 0.25.into()]).unwrap();
        assert!(table.push_row(vec!["only-one".into()]).is_err());
        assert_eq!(table.len(), 1);
        assert!(table.validate().is_ok());
    }
}
