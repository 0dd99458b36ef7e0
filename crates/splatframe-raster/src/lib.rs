//! Gaussian splat projection and rasterization
//!
//! Each splat is an anisotropic 3D Gaussian (center, per-axis scale,
//! rotation, color with opacity). Rendering one takes four steps:
//! 1. **Project**: linearize the perspective transform at the splat center
//!    and map its 3D covariance to a 2D screen covariance
//! 2. **Extract axes**: eigen-decompose the 2D covariance into the half-axes
//!    of a screen-space quad
//! 3. **Order**: sort splats farthest first
//! 4. **Blend**: shade each quad with `exp(-|t|²)` falloff and alpha-blend it
//!    over the target
//!
//! The same math backs the WGSL shaders in [`shaders`] and the CPU
//! [`SoftwareRasterizer`].

pub mod covariance;
pub mod error;
pub mod gpu_types;
pub mod mesh;
pub mod order;
pub mod software;


pub mod shaders {
    /// Splat quads (`vs_splat` / `fs_splat`) and debug ellipsoids
    /// (`vs_debug` / `fs_debug`)
    pub const SPLAT: &str = include_str!("shaders/splat.wgsl");
}

pub use covariance::*;
pub use error::{RasterError, RasterResult};
pub use gpu_types::*;
pub use mesh::{Mesh, SphereOptions};
pub use order::back_to_front;
pub use software::{blend_over, RasterImage, RenderMode, SoftwareRasterizer};
