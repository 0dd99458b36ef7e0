//! 3D Gaussian to 2D screen-space projection mathematics
//!
//! Each splat is linearized around its center: the 3D covariance is pushed
//! through the view rotation and the Jacobian of the perspective divide,
//! giving a 2D covariance whose eigenvectors orient a screen-space quad.

use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use serde::Serialize;

use crate::error::{RasterError, RasterResult};
use crate::gpu_types::SplatPoint;

/// Variance added to both screen axes so every splat covers about a pixel
pub const LOW_PASS_VARIANCE: f32 = 0.3;

/// Floor on the minor eigenvalue of the screen covariance
pub const MIN_MINOR_EIGENVALUE: f32 = 0.1;

/// Cap on each quad half-axis, in pixels
pub const MAX_AXIS_LENGTH: f32 = 1024.0;

/// Vertex position for culled splats; `z / w = 2` lies outside every clip volume
pub const CULLED_POSITION: Vec4 = Vec4::new(0.0, 0.0, 2.0, 1.0);

/// Quad corners in splat-local units
pub const QUAD_CORNERS: [Vec2; 4] = [
    Vec2::new(-1.0, -1.0),
    Vec2::new(1.0, -1.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(-1.0, 1.0),
];

/// Fragments with `|tex_coord|²` beyond this are discarded
pub const FRAGMENT_CUTOFF: f32 = 4.0;

/// Debug ellipsoid fragments below this opacity are discarded
pub const DEBUG_ALPHA_CUTOFF: f32 = 0.2;

/// Rebuild a unit quaternion from its stored `xyz` part, taking `w >= 0`
#[inline]
pub fn reconstruct_rotation(xyz: Vec3) -> Quat {
    let w = (1.0 - xyz.length_squared()).max(0.0).sqrt();
    Quat::from_xyzw(xyz.x, xyz.y, xyz.z, w)
}

/// Build a 3D covariance matrix from scale and rotation
///
/// Σ = Mᵀ M with M = S Rᵀ, i.e. R S² Rᵀ. `rotation` may carry the model
/// transform's linear part in addition to the splat's own rotation.
///
/// # Arguments
/// * `scale` - The (sx, sy, sz) axis scales of the Gaussian
/// * `rotation` - Rotation matrix, optionally premultiplied by the model's linear part
///
/// # Returns
/// A symmetric 3x3 covariance matrix
pub fn build_covariance_3d(scale: Vec3, rotation: Mat3) -> Mat3 {
    // S is diagonal, so R*S is just scaling the columns of R
    let rs = Mat3::from_cols(
        rotation.x_axis * scale.x,
        rotation.y_axis * scale.y,
        rotation.z_axis * scale.z,
    );

    rs * rs.transpose()
}

/// Project a world-space 3D covariance to a 2D screen covariance
///
/// `camera_pos` is the splat center in camera space (looking down -z) and
/// `focal` the focal length in pixels.
///
/// # Arguments
/// * `cov_3d` - The 3D covariance matrix in world space
/// * `view_rotation` - Upper 3x3 of the view matrix
/// * `camera_pos` - Splat center in camera space (z negative in front of the camera)
/// * `focal` - Focal length in pixels (height / (2 * tan(fov_y/2)))
///
/// # Returns
/// A symmetric 2x2 covariance matrix in screen pixel coordinates
pub fn project_covariance(
    cov_3d: Mat3,
    view_rotation: Mat3,
    camera_pos: Vec3,
    focal: f32,
) -> [[f32; 2]; 2] {
    // flip z so depth is positive, then rotate into that frame
    let w = Mat3::from_diagonal(Vec3::new(1.0, 1.0, -1.0)) * view_rotation;
    let cov = w * cov_3d * w.transpose();

    let depth = -camera_pos.z;
    let depth2 = depth * depth;

    // J = | f/d   0    -f*x/d^2 |
    //     |  0   f/d   -f*y/d^2 |
    let j00 = focal / depth;
    let j02 = -focal * camera_pos.x / depth2;
    let j11 = focal / depth;
    let j12 = -focal * camera_pos.y / depth2;

    let s00 = cov.x_axis.x;
    let s01 = cov.y_axis.x;
    let s02 = cov.z_axis.x;
    let s11 = cov.y_axis.y;
    let s12 = cov.z_axis.y;
    let s22 = cov.z_axis.z;

    // J * Σ, first row and the last two entries of the second
    let t00 = j00 * s00 + j02 * s02;
    let t01 = j00 * s01 + j02 * s12;
    let t02 = j00 * s02 + j02 * s22;
    let t11 = j11 * s11 + j12 * s12;
    let t12 = j11 * s12 + j12 * s22;

    let cov_2d_00 = t00 * j00 + t02 * j02;
    let cov_2d_01 = t01 * j11 + t02 * j12;
    let cov_2d_11 = t11 * j11 + t12 * j12;

    [[cov_2d_00, cov_2d_01], [cov_2d_01, cov_2d_11]]
}

/// Add a low-pass filter to the covariance to prevent aliasing
///
/// # Arguments
/// * `cov` - 2x2 screen covariance
/// * `variance` - Added to both diagonal entries, usually [`LOW_PASS_VARIANCE`]
///
/// # Returns
/// The dilated covariance; the off-diagonal term is unchanged
pub fn apply_low_pass_filter(cov: [[f32; 2]; 2], variance: f32) -> [[f32; 2]; 2] {
    [
        [cov[0][0] + variance, cov[0][1]],
        [cov[1][0], cov[1][1] + variance],
    ]
}

/// Principal axes of a screen-space ellipse
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EllipseAxes {
    pub lambda1: f32,
    pub lambda2: f32,
    /// Half-axis along the major eigenvector, in pixels
    pub major: Vec2,
    /// Half-axis along the minor eigenvector, in pixels
    pub minor: Vec2,
}

/// Eigen-decompose a symmetric 2x2 covariance into quad half-axes.
///
/// The minor eigenvalue is floored at [`MIN_MINOR_EIGENVALUE`] and both axis
/// lengths `sqrt(2λ)` are capped at [`MAX_AXIS_LENGTH`]. A circular footprint
/// has no preferred direction and uses the x axis.
///
/// # Arguments
/// * `cov` - Symmetric 2x2 screen covariance, low-pass filtered
///
/// # Returns
/// Both eigenvalues and the scaled major and minor half-axes
pub fn ellipse_axes(cov: [[f32; 2]; 2]) -> EllipseAxes {
    let d1 = cov[0][0];
    let off = cov[0][1];
    let d2 = cov[1][1];

    let mid = 0.5 * (d1 + d2);
    let radius = Vec2::new((d1 - d2) * 0.5, off).length();
    let lambda2 = (mid - radius).max(MIN_MINOR_EIGENVALUE);
    let lambda1 = (mid + radius).max(lambda2);

    // both forms are eigenvectors of λ1; (off, λ1 - d1) cancels to zero
    // when x is already the major axis, so take the larger one
    let direction = if d1 >= d2 {
        Vec2::new(lambda1 - d2, off)
    } else {
        Vec2::new(off, lambda1 - d1)
    };
    let direction = direction.try_normalize().unwrap_or(Vec2::X);

    EllipseAxes {
        lambda1,
        lambda2,
        major: (2.0 * lambda1).sqrt().min(MAX_AXIS_LENGTH) * direction,
        minor: (2.0 * lambda2).sqrt().min(MAX_AXIS_LENGTH) * Vec2::new(direction.y, -direction.x),
    }
}

/// Splat fragment opacity
///
/// # Arguments
/// * `tex_coord` - Quad-local coordinate, `±2` at the corners
/// * `alpha` - The splat's opacity
///
/// # Returns
/// * `Some(alpha * exp(-|tex_coord|²))` - Inside the cutoff
/// * `None` - If `|tex_coord|²` exceeds [`FRAGMENT_CUTOFF`]
#[inline]
pub fn fragment_alpha(tex_coord: Vec2, alpha: f32) -> Option<f32> {
    let a = -tex_coord.length_squared();
    if a < -FRAGMENT_CUTOFF {
        None
    } else {
        Some(a.exp() * alpha)
    }
}

/// Debug ellipsoid fragment color, or `None` when discarded
#[inline]
pub fn debug_fragment(color: Vec4) -> Option<Vec4> {
    (color.w >= DEBUG_ALPHA_CUTOFF).then_some(color)
}

/// Transforms and viewport used to project splats
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SplatCamera {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    /// Render target size in pixels
    pub viewport: Vec2,
}

impl SplatCamera {
    pub fn new(view: Mat4, projection: Mat4, viewport: Vec2) -> Self {
        Self {
            model: Mat4::IDENTITY,
            view,
            projection,
            viewport,
        }
    }

    pub fn with_model(mut self, model: Mat4) -> Self {
        self.model = model;
        self
    }

    pub fn with_projection(mut self, projection: Mat4) -> Self {
        self.projection = projection;
        self
    }

    pub fn validate(&self) -> RasterResult<()> {
        let Vec2 { x, y } = self.viewport;
        if !(x >= 1.0 && y >= 1.0 && x.is_finite() && y.is_finite()) {
            return Err(RasterError::InvalidViewport(x, y));
        }
        Ok(())
    }

    /// Focal length in pixels, `viewport.x * projection[0][0]`
    pub fn focal(&self) -> f32 {
        self.viewport.x * self.projection.x_axis.x
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Splat center in camera space
    pub fn camera_position(&self, center: Vec3) -> Vec3 {
        (self.view * self.model).transform_point3(center)
    }

    /// Clip-space position of a splat center, and whether it is culled
    fn clip_position(&self, center: Vec3) -> (Vec3, Vec4, bool) {
        let camera = self.camera_position(center);
        let clip = self.projection * camera.extend(1.0);
        (camera, clip, clip.z < -clip.w)
    }

    pub fn is_culled(&self, point: &SplatPoint) -> bool {
        self.clip_position(point.center).2
    }

    /// Run the projection pipeline for one splat
    pub fn project(&self, point: &SplatPoint) -> Projection {
        let (camera, clip, culled) = self.clip_position(point.center);
        if culled {
            return Projection::Culled;
        }

        let rotation = Mat3::from_mat4(self.model) * Mat3::from_quat(point.rotation());
        let cov_3d = build_covariance_3d(point.scale, rotation);
        let cov_2d = project_covariance(cov_3d, Mat3::from_mat4(self.view), camera, self.focal());
        let covariance = apply_low_pass_filter(cov_2d, LOW_PASS_VARIANCE);

        Projection::Visible(ProjectedSplat {
            clip,
            camera,
            covariance,
            axes: ellipse_axes(covariance),
            color: point.color,
            viewport: self.viewport,
        })
    }

    /// Debug-mode vertex: the unit mesh scaled by `2 * scale`, rotated and
    /// moved to the splat center
    pub fn debug_vertex(&self, point: &SplatPoint, vertex: Vec3) -> Vec4 {
        if self.is_culled(point) {
            return CULLED_POSITION;
        }
        let local = point.rotation() * (vertex * point.scale * 2.0) + point.center;
        self.view_projection() * self.model * local.extend(1.0)
    }
}

/// Outcome of projecting one splat
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    /// Behind the near plane: every corner collapses to [`CULLED_POSITION`]
    Culled,
    Visible(ProjectedSplat),
}

impl Projection {
    pub fn is_culled(&self) -> bool {
        matches!(self, Projection::Culled)
    }

    pub fn visible(&self) -> Option<&ProjectedSplat> {
        match self {
            Projection::Culled => None,
            Projection::Visible(splat) => Some(splat),
        }
    }

    pub fn corner_position(&self, corner: Vec2) -> Vec4 {
        match self {
            Projection::Culled => CULLED_POSITION,
            Projection::Visible(splat) => splat.corner_position(corner),
        }
    }
}

/// A splat reduced to a screen-space ellipse
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ProjectedSplat {
    /// Clip-space center
    pub clip: Vec4,
    /// Camera-space center
    pub camera: Vec3,
    /// Filtered 2D covariance
    pub covariance: [[f32; 2]; 2],
    pub axes: EllipseAxes,
    pub color: Vec4,
    pub viewport: Vec2,
}

impl ProjectedSplat {
    /// Clip-space position of a quad corner
    pub fn corner_position(&self, corner: Vec2) -> Vec4 {
        let offset = (corner.x * self.axes.major + corner.y * self.axes.minor) / self.viewport * 2.0;
        self.clip + Vec4::new(offset.x, offset.y, 0.0, 0.0) * self.clip.w
    }

    /// Interpolated texture coordinate at a quad corner
    #[inline]
    pub fn tex_coord(corner: Vec2) -> Vec2 {
        corner * 2.0
    }

    pub fn ndc(&self) -> Vec3 {
        self.clip.truncate() / self.clip.w
    }

    /// Center in pixel coordinates, y down
    pub fn screen_center(&self) -> Vec2 {
        let ndc = self.ndc();
        Vec2::new(
            (ndc.x * 0.5 + 0.5) * self.viewport.x,
            (0.5 - ndc.y * 0.5) * self.viewport.y,
        )
    }

    /// Half extent of the quad's screen bounding box, in pixels
    pub fn screen_extent(&self) -> Vec2 {
        self.axes.major.abs() + self.axes.minor.abs()
    }

    /// Distance from the camera, used for ordering
    pub fn distance(&self) -> f32 {
        self.camera.length()
    }

    /// Whether the quad lies inside the depth range at all
    pub fn in_depth_range(&self) -> bool {
        self.clip.w > 0.0 && self.clip.z <= self.clip.w
    }

    /// Splat-local quad coordinate of a pixel position, y down
    pub fn local_coord(&self, pixel: Vec2) -> Vec2 {
        let delta = pixel - self.screen_center();
        // back to the y-up frame the axes live in
        let delta = Vec2::new(delta.x, -delta.y);
        Vec2::new(
            delta.dot(self.axes.major) / self.axes.major.length_squared(),
            delta.dot(self.axes.minor) / self.axes.minor.length_squared(),
        )
    }

    /// Opacity this splat contributes at a pixel position, if any
    pub fn coverage_at(&self, pixel: Vec2) -> Option<f32> {
        let local = self.local_coord(pixel);
        if local.x.abs() > 1.0 || local.y.abs() > 1.0 {
            return None;
        }
        fragment_alpha(Self::tex_coord(local), self.color.w)
    }
}
