//! wgpu backend for splat rendering and multiframe accumulation
//!
//! - [`WgpuDevice`] implements the accumulator's [`RenderDevice`] with
//!   full-screen quad passes and fixed-function constant-alpha blending
//! - [`SplatPipeline`] draws packed splats as instanced quads or debug
//!   ellipsoids
//! - [`HeadlessRenderer`] ties both together offscreen and reads the
//!   converged image back
//!
//! [`RenderDevice`]: splatframe_multiframe::RenderDevice

pub mod capture;
pub mod context;
pub mod device;
pub mod error;
pub mod headless;
pub mod splat_pipeline;

pub use capture::{read_texture, CapturedFrame};
pub use context::{texture_format, GpuContext};
pub use device::{GpuTexture, WgpuDevice};
pub use error::{RenderError, RenderResult};
pub use headless::{HeadlessConfig, HeadlessRenderer};
pub use splat_pipeline::{GpuSplatScene, SplatPipeline};
