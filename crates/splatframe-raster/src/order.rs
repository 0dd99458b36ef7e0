//! Draw ordering for alpha-blended splats

use rayon::prelude::*;

use crate::covariance::SplatCamera;
use crate::gpu_types::SplatPoint;

/// Splat ids sorted farthest first by camera-space distance.
///
/// Splats blend with `src * a + dst * (1 - a)` and write no depth, so this
/// order is what makes the composite correct. Ties keep their input order.
pub fn back_to_front(camera: &SplatCamera, points: &[SplatPoint]) -> Vec<u32> {
    let distances: Vec<f32> = points
        .par_iter()
        .map(|point| camera.camera_position(point.center).length())
        .collect();

    let mut order: Vec<u32> = (0..points.len() as u32).collect();
    order.par_sort_by(|&a, &b| distances[b as usize].total_cmp(&distances[a as usize]));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

    fn at(z: f32) -> SplatPoint {
        SplatPoint::new(Vec3::new(0.0, 0.0, z), Vec3::ONE, Quat::IDENTITY, Vec4::ONE)
    }

    #[test]
    fn test_order_is_monotone_in_distance() {
        let camera = SplatCamera::new(
            Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y),
            Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0),
            Vec2::new(64.0, 64.0),
        );
        let points: Vec<SplatPoint> = [3.0, -5.0, 9.0, 0.0, -20.0, 4.5]
            .into_iter()
            .map(at)
            .collect();

        let order = back_to_front(&camera, &points);
        assert_eq!(order, vec![4, 1, 3, 0, 5, 2]);

        let distances: Vec<f32> = order
            .iter()
            .map(|&i| camera.camera_position(points[i as usize].center).length())
            .collect();
        assert!(distances.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_ties_keep_input_order() {
        let camera = SplatCamera::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec2::ONE);
        let points = vec![at(1.0), at(-1.0), at(2.0), at(1.0)];
        assert_eq!(back_to_front(&camera, &points), vec![2, 0, 1, 3]);
    }

    #[test]
    fn test_empty() {
        let camera = SplatCamera::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec2::ONE);
        assert!(back_to_front(&camera, &[]).is_empty());
    }
}
