//! Error types for multiframe accumulation

use thiserror::Error;

/// Result type for multiframe operations
pub type MultiframeResult<T> = Result<T, MultiframeError>;

/// Errors reported by the host rendering device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Device lost")]
    Lost,

    #[error("Texture size mismatch: expected {expected:?}, got {actual:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Invalid texture dimensions {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors that can occur while planning samples or accumulating frames
#[derive(Error, Debug)]
pub enum MultiframeError {
    #[error("Sample grid size must be at least 1")]
    InvalidGridSize,

    #[error("Invalid sampling configuration: {0}")]
    InvalidConfig(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
