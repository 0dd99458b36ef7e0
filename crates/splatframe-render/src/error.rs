//! Error types for the wgpu backend

use splatframe_multiframe::{DeviceError, MultiframeError};
use splatframe_raster::RasterError;
use thiserror::Error;

/// Result type for GPU rendering operations
pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Accumulation error: {0}")]
    Multiframe(#[from] MultiframeError),

    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    #[error("Buffer mapping failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("Readback channel closed")]
    ReadbackClosed,

    #[error("Nothing has been presented yet")]
    NoDisplay,
}
