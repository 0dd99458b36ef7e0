//! Multiframe supersampling
//!
//! Anti-aliases a static view by rendering it several times with sub-pixel
//! projection offsets and accumulating the results.
//!
//! # Flow
//!
//! 1. [`SampleSet`] plans `n x n` weighted sub-pixel offsets, closest first
//! 2. [`Multiframe::sub_frame`] yields the jittered projection and mip bias
//!    for the next render
//! 3. [`Multiframe::update`] blends the render into a float accumulator in
//!    linear light and presents the first and the final sample
//!
//! The host device is abstracted behind [`RenderDevice`]; [`CpuDevice`] is a
//! software implementation used for offline rendering and tests.

pub mod config;
pub mod cpu;
pub mod device;
pub mod engine;
pub mod error;
pub mod jitter;
pub mod samples;

#[cfg(test)]
mod tests;

pub use config::{AccumulationWeighting, MultiframeConfig, DEFAULT_GAMMA};
pub use cpu::{CpuDevice, CpuTexture};
pub use device::{
    choose_pixel_format, BlendComponent, BlendFactor, BlendState, ColorBuffer, DeviceCaps,
    DrawTarget, PixelFormat, QuadPass, RenderDevice,
};
pub use engine::{AccumulationState, Multiframe};
pub use error::{DeviceError, MultiframeError, MultiframeResult};
pub use jitter::{jitter_projection, JitterGuard, SubFrame};
pub use samples::{Sample, SampleConfig, SampleSet};
