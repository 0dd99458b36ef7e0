//! Error types for splat projection and rasterization

use thiserror::Error;

/// Result type for raster operations
pub type RasterResult<T> = Result<T, RasterError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RasterError {
    #[error("Rotation components {x}, {y}, {z} are not part of a unit quaternion")]
    InvalidRotation { x: f32, y: f32, z: f32 },

    #[error("Invalid image dimensions {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("Invalid viewport {0}x{1}")]
    InvalidViewport(f32, f32),

    #[error("Splat index {index} out of range for {count} splats")]
    IndexOutOfRange { index: usize, count: usize },
}
