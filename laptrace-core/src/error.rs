//! Error types for lap loading, rendering and seeking

use thiserror::Error;

/// Errors that can occur when building a lap from its source data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LapError {
    /// Source could not be fetched or parsed
    #[error("Lap data unavailable: {0}")]
    DataUnavailable(String),

    /// The sample table would have zero rows
    #[error("Lap contains no samples")]
    EmptySamples,

    /// Index-aligned columns disagree on length
    #[error("Column '{column}' has {actual} samples, expected {expected}")]
    LengthMismatch {
        column: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl From<serde_json::Error> for LapError {
    fn from(e: serde_json::Error) -> Self {
        LapError::DataUnavailable(e.to_string())
    }
}

/// Errors produced by the frame renderer
#[derive(Error, Debug)]
pub enum RenderError {
    /// Caller passed an index outside `0..len`
    #[error("Sample index {index} out of range (lap has {len} samples)")]
    IndexOutOfRange { index: usize, len: usize },

    /// PNG encoding failed
    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// A seek request that could not be interpreted as an integer index
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeekError {
    #[error("Invalid seek position: {0}")]
    Invalid(String),
}
