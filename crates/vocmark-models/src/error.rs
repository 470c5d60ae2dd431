//! Error types for the models crate.

use mlx_rs::error::Exception;
use thiserror::Error;

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Error type for model operations.
#[derive(Error, Debug)]
pub enum ModelError {
    /// MLX operation error.
    #[error("MLX error: {0}")]
    Mlx(#[from] Exception),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shape mismatch error.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape (`-1` for any size).
        expected: Vec<i32>,
        /// Actual shape.
        actual: Vec<i32>,
    },
}

/// Lets model calls use `?` inside `value_and_grad` closures.
impl From<ModelError> for Exception {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Mlx(e) => e,
            other => Exception::custom(other.to_string()),
        }
    }
}
