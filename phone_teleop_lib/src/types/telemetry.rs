use std::collections::BTreeMap;

/// Prefix of a pre-encoded data URL image
pub const DATA_IMAGE_PREFIX: &str = "data:image";

/// Row-major numeric buffer with an explicit shape (e.g. `[height, width, channels]`).
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl NdArray {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Self {
        Self { shape, data }
    }

    /// 1-D buffer, e.g. a robot state vector
    pub fn vector(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            data: values,
        }
    }

    /// Packed RGB8 camera frame as a `[height, width, 3]` buffer
    pub fn from_rgb8(width: u32, height: u32, pixels: &[u8]) -> Self {
        Self {
            shape: vec![height as usize, width as usize, 3],
            data: pixels.iter().map(|&p| f64::from(p)).collect(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Whether `data` holds exactly the number of elements `shape` describes
    pub fn is_consistent(&self) -> bool {
        element_count(&self.shape) == Some(self.data.len())
    }
}

/// Number of elements `shape` describes, `None` if it does not fit in `usize`
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// One named feedback value handed to `send_feedback`.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    Array(NdArray),
    Scalar(f64),
    Text(String),
}

impl TelemetryValue {
    pub fn is_data_image(&self) -> bool {
        matches!(self, Self::Text(s) if s.starts_with(DATA_IMAGE_PREFIX))
    }
}

impl From<NdArray> for TelemetryValue {
    fn from(value: NdArray) -> Self {
        Self::Array(value)
    }
}

impl From<f64> for TelemetryValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<&str> for TelemetryValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TelemetryValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Named feedback values, owned by the caller until handed to the bridge.
pub type TelemetryPayload = BTreeMap<String, TelemetryValue>;
