//! Error types for vocmark.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for vocmark operations.
pub type Result<T> = std::result::Result<T, VocmarkError>;

/// Main error type shared by the data, model and training layers.
#[derive(Error, Debug)]
pub enum VocmarkError {
    /// Missing or malformed configuration. Fatal before training starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A paired file expected next to a distorted file does not exist.
    #[error("Pairing error: {} has no counterpart at {}", .missing.display(), .counterpart.display())]
    Pairing {
        /// The file that was enumerated.
        missing: PathBuf,
        /// The counterpart path that could not be read.
        counterpart: PathBuf,
    },

    /// A tensor could not be normalized to the expected shape.
    #[error("Shape error: expected {expected:?}, got {actual:?}")]
    Shape {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// Compute memory or device exhaustion.
    #[error("Resource exhausted: {0}")]
    ResourceExhaustion(String),

    /// Audio decoding errors.
    #[error("Audio error: {0}")]
    Audio(String),

    /// A data worker produced nothing within the loader timeout.
    #[error("Data source stalled for {seconds}s waiting for batch {batch}")]
    DataStall {
        /// Batch index that was being waited for.
        batch: usize,
        /// Timeout in seconds.
        seconds: u64,
    },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_yaml::Error> for VocmarkError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}
