//! Sub-pixel projection jitter
//!
//! The projection used for a sub-frame is a pure function of the base
//! projection and the current sample. Hosts that keep a mutable projection on
//! their camera can use [`JitterGuard`], which restores the original entries
//! when dropped, including on early return or unwind.

use glam::{Mat4, Vec2};
use std::ops::Deref;

/// Offset a projection by `offset / (width, height)`.
///
/// For a perspective projection the offset goes into the z column, so it is
/// scaled by the clip-space w and becomes a constant shift in NDC. For an
/// orthographic projection it goes into the translation column.
pub fn jitter_projection(base: Mat4, offset: Vec2, width: u32, height: u32) -> Mat4 {
    let dx = offset.x / width.max(1) as f32;
    let dy = offset.y / height.max(1) as f32;

    let mut projection = base;
    if is_perspective(&base) {
        projection.z_axis.x += dx;
        projection.z_axis.y += dy;
    } else {
        projection.w_axis.x += dx;
        projection.w_axis.y += dy;
    }
    projection
}

#[inline]
fn is_perspective(projection: &Mat4) -> bool {
    projection.z_axis.w != 0.0
}

/// Projection and sampler bias for one sub-frame render
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubFrame {
    pub projection: Mat4,
    /// Mip bias for scene texture lookups
    pub texture_bias: f32,
    /// Index of the sample being rendered, if any
    pub sample_index: Option<usize>,
}

impl SubFrame {
    /// A sub-frame that renders with the base projection untouched
    pub fn unjittered(base: Mat4) -> Self {
        Self {
            projection: base,
            texture_bias: 0.0,
            sample_index: None,
        }
    }

    pub fn view_projection(&self, view: Mat4) -> Mat4 {
        self.projection * view
    }
}

/// Applies a jitter to a borrowed projection and undoes it on drop
pub struct JitterGuard<'a> {
    projection: &'a mut Mat4,
    saved: Mat4,
    texture_bias: f32,
}

impl<'a> JitterGuard<'a> {
    pub fn new(projection: &'a mut Mat4, sub_frame: &SubFrame) -> Self {
        let saved = *projection;
        *projection = sub_frame.projection;
        Self {
            projection,
            saved,
            texture_bias: sub_frame.texture_bias,
        }
    }

    pub fn texture_bias(&self) -> f32 {
        self.texture_bias
    }
}

impl Deref for JitterGuard<'_> {
    type Target = Mat4;

    fn deref(&self) -> &Mat4 {
        &*self.projection
    }
}

impl Drop for JitterGuard<'_> {
    fn drop(&mut self) {
        *self.projection = self.saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    fn perspective() -> Mat4 {
        Mat4::perspective_rh(60f32.to_radians(), 1.5, 0.1, 100.0)
    }

    #[test]
    fn test_zero_offset_is_identity() {
        let base = perspective();
        assert_eq!(jitter_projection(base, Vec2::ZERO, 640, 480), base);
    }

    #[test]
    fn test_perspective_shift_is_depth_independent() {
        let base = perspective();
        let jittered = jitter_projection(base, Vec2::new(1.0, -0.5), 200, 100);

        for z in [-1.0, -5.0, -40.0] {
            let p = Vec4::new(0.3, -0.2, z, 1.0);
            let a = base * p;
            let b = jittered * p;
            let shift_x = b.x / b.w - a.x / a.w;
            let shift_y = b.y / b.w - a.y / a.w;
            // w = -z, so the NDC shift is the negated matrix offset
            assert_relative_eq!(shift_x, -1.0 / 200.0, epsilon = 1e-5);
            assert_relative_eq!(shift_y, 0.5 / 100.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_orthographic_shift() {
        let base = Mat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, 0.1, 10.0);
        let jittered = jitter_projection(base, Vec2::new(2.0, 4.0), 100, 100);
        let p = Vec4::new(0.0, 0.0, -1.0, 1.0);
        let shift = jittered * p - base * p;
        assert_relative_eq!(shift.x, 0.02, epsilon = 1e-6);
        assert_relative_eq!(shift.y, 0.04, epsilon = 1e-6);
    }

    #[test]
    fn test_guard_restores_on_drop() {
        let base = perspective();
        let mut camera_projection = base;
        let sub_frame = SubFrame {
            projection: jitter_projection(base, Vec2::new(0.5, 0.5), 64, 64),
            texture_bias: -2.0,
            sample_index: Some(3),
        };

        {
            let guard = JitterGuard::new(&mut camera_projection, &sub_frame);
            assert_eq!(*guard, sub_frame.projection);
            assert_eq!(guard.texture_bias(), -2.0);
        }
        assert_eq!(camera_projection, base);
    }

    #[test]
    fn test_guard_restores_on_failed_render() {
        fn render(projection: &mut Mat4, sub_frame: &SubFrame) -> Result<(), &'static str> {
            let _guard = JitterGuard::new(projection, sub_frame);
            Err("render failed")
        }

        let base = perspective();
        let mut camera_projection = base;
        let sub_frame = SubFrame {
            projection: jitter_projection(base, Vec2::new(-1.0, 1.0), 32, 32),
            texture_bias: 0.0,
            sample_index: Some(1),
        };

        assert!(render(&mut camera_projection, &sub_frame).is_err());
        assert_eq!(camera_projection, base);
    }
}
