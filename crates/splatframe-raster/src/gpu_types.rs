//! Splat storage layout shared by the CPU and GPU paths
//!
//! Splat attributes live in four square `Rgba32Float` textures (center, scale,
//! rotation, color) addressed by a linear splat id. The same packing backs
//! the software rasterizer, so both paths read identical data.

use bytemuck::{Pod, Zeroable};
use glam::{Quat, UVec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::covariance::{reconstruct_rotation, SplatCamera};
use crate::error::{RasterError, RasterResult};

/// Slack allowed on `|xyz|² <= 1` for rotations read back from float storage
const ROTATION_EPSILON: f32 = 1e-5;

/// One anisotropic 3D Gaussian
///
/// The rotation is stored as the `xyz` part of a unit quaternion; `w` is
/// reconstructed as `sqrt(1 - |xyz|²)`, so `w >= 0` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSplatPoint")]
pub struct SplatPoint {
    pub center: Vec3,
    pub scale: Vec3,
    rotation: Vec3,
    /// Linear RGB and opacity
    pub color: Vec4,
}

#[derive(Deserialize)]
struct RawSplatPoint {
    center: Vec3,
    scale: Vec3,
    rotation: Vec3,
    color: Vec4,
}

impl TryFrom<RawSplatPoint> for SplatPoint {
    type Error = RasterError;

    fn try_from(raw: RawSplatPoint) -> RasterResult<Self> {
        SplatPoint::from_rotation_xyz(raw.center, raw.scale, raw.rotation, raw.color)
    }
}

impl SplatPoint {
    /// Build a splat from a full quaternion.
    ///
    /// `q` and `-q` are the same rotation, so a negative `w` is flipped to
    /// keep the three stored components sufficient.
    pub fn new(center: Vec3, scale: Vec3, rotation: Quat, color: Vec4) -> Self {
        let q = rotation.normalize();
        let q = if q.w < 0.0 { -q } else { q };
        Self {
            center,
            scale,
            rotation: Vec3::new(q.x, q.y, q.z),
            color,
        }
    }

    /// Build a splat from stored rotation components
    pub fn from_rotation_xyz(
        center: Vec3,
        scale: Vec3,
        rotation: Vec3,
        color: Vec4,
    ) -> RasterResult<Self> {
        let norm_sq = rotation.length_squared();
        if norm_sq.is_nan() || norm_sq > 1.0 + ROTATION_EPSILON {
            return Err(RasterError::InvalidRotation {
                x: rotation.x,
                y: rotation.y,
                z: rotation.z,
            });
        }
        Ok(Self {
            center,
            scale,
            rotation,
            color,
        })
    }

    /// The stored `xyz` quaternion components
    pub fn rotation_xyz(&self) -> Vec3 {
        self.rotation
    }

    pub fn rotation(&self) -> Quat {
        reconstruct_rotation(self.rotation)
    }
}

/// Side of the square texture holding `count` splats
pub fn texture_side(count: usize) -> u32 {
    let mut side = (count as f64).sqrt().ceil() as u32;
    while (side as usize) * (side as usize) < count {
        side += 1;
    }
    side.max(1)
}

/// Texel holding splat `id` in a texture of the given side
#[inline]
pub fn texel_coords(id: u32, side: u32) -> UVec2 {
    UVec2::new(id % side, id / side)
}

/// Inverse of [`texel_coords`]
#[inline]
pub fn linear_id(texel: UVec2, side: u32) -> u32 {
    texel.y * side + texel.x
}

/// `(side, side, 1/side, 1/side)`, as the shaders expect it
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TextureParams {
    pub size: [f32; 2],
    pub inv_size: [f32; 2],
}

impl TextureParams {
    pub fn new(side: u32) -> Self {
        let side = side.max(1) as f32;
        Self {
            size: [side, side],
            inv_size: [1.0 / side, 1.0 / side],
        }
    }
}

/// Splat attributes packed into four square RGBA texel arrays
#[derive(Clone, Debug, PartialEq)]
pub struct SplatTextures {
    side: u32,
    count: usize,
    pub center: Vec<[f32; 4]>,
    pub scale: Vec<[f32; 4]>,
    pub rotation: Vec<[f32; 4]>,
    pub color: Vec<[f32; 4]>,
}

impl SplatTextures {
    pub fn pack(points: &[SplatPoint]) -> Self {
        let side = texture_side(points.len());
        let texels = (side as usize) * (side as usize);

        let mut center = vec![[0.0; 4]; texels];
        let mut scale = vec![[0.0; 4]; texels];
        let mut rotation = vec![[0.0; 4]; texels];
        let mut color = vec![[0.0; 4]; texels];

        for (i, point) in points.iter().enumerate() {
            center[i] = point.center.extend(1.0).to_array();
            scale[i] = point.scale.extend(0.0).to_array();
            rotation[i] = point.rotation.extend(0.0).to_array();
            color[i] = point.color.to_array();
        }

        tracing::debug!(
            "Packed {} splats into {}x{} textures",
            points.len(),
            side,
            side
        );

        Self {
            side,
            count: points.len(),
            center,
            scale,
            rotation,
            color,
        }
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn params(&self) -> TextureParams {
        TextureParams::new(self.side)
    }

    /// Read splat `id` back out of the texel arrays
    pub fn fetch(&self, id: usize) -> RasterResult<SplatPoint> {
        if id >= self.count {
            return Err(RasterError::IndexOutOfRange {
                index: id,
                count: self.count,
            });
        }
        let texel = texel_coords(id as u32, self.side);
        let i = linear_id(texel, self.side) as usize;

        SplatPoint::from_rotation_xyz(
            Vec4::from_array(self.center[i]).truncate(),
            Vec4::from_array(self.scale[i]).truncate(),
            Vec4::from_array(self.rotation[i]).truncate(),
            Vec4::from_array(self.color[i]),
        )
    }
}

/// Uniform block shared by the splat and debug shaders
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SplatUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    pub viewport: [f32; 2],
    pub _pad: [f32; 2],
    pub tex_params: TextureParams,
}

impl SplatUniforms {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(camera: &SplatCamera, tex_params: TextureParams) -> Self {
        Self {
            model: camera.model.to_cols_array_2d(),
            view: camera.view.to_cols_array_2d(),
            projection: camera.projection.to_cols_array_2d(),
            view_projection: camera.view_projection().to_cols_array_2d(),
            viewport: camera.viewport.to_array(),
            _pad: [0.0; 2],
            tex_params,
        }
    }
}

/// Vertex of the splat quad or the debug ellipsoid mesh
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
}

impl MeshVertex {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Splat quad corners, two CCW triangles via [`QUAD_INDICES`]
pub const QUAD_VERTICES: [MeshVertex; 4] = [
    MeshVertex {
        position: [-1.0, -1.0, 0.0],
    },
    MeshVertex {
        position: [1.0, -1.0, 0.0],
    },
    MeshVertex {
        position: [1.0, 1.0, 0.0],
    },
    MeshVertex {
        position: [-1.0, 1.0, 0.0],
    },
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];
