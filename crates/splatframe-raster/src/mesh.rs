//! Unit ellipsoid mesh for the debug render mode

use glam::Vec3;

use crate::gpu_types::MeshVertex;

#[derive(Clone, Copy, Debug)]
pub struct SphereOptions {
    pub stacks: u32,
    pub slices: u32,
}

impl Default for SphereOptions {
    fn default() -> Self {
        Self {
            stacks: 8,
            slices: 16,
        }
    }
}

/// Indexed triangle list, CCW when seen from outside
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Unit UV sphere; splats scale it per axis into an ellipsoid
    pub fn uv_sphere(opts: SphereOptions) -> Self {
        let stacks = opts.stacks.max(2);
        let slices = opts.slices.max(3);

        let mut positions = Vec::with_capacity(((stacks + 1) * (slices + 1)) as usize);
        for stack in 0..=stacks {
            let phi = stack as f32 / stacks as f32 * std::f32::consts::PI;
            let (sin_phi, cos_phi) = phi.sin_cos();

            for slice in 0..=slices {
                let theta = slice as f32 / slices as f32 * std::f32::consts::TAU;
                let (sin_theta, cos_theta) = theta.sin_cos();
                positions.push(Vec3::new(sin_phi * cos_theta, cos_phi, sin_phi * sin_theta));
            }
        }

        let ring = slices + 1;
        let mut indices = Vec::with_capacity((stacks * slices * 6) as usize);
        for stack in 0..stacks {
            for slice in 0..slices {
                let i0 = stack * ring + slice;
                let i1 = i0 + 1;
                let i2 = (stack + 1) * ring + slice;
                let i3 = i2 + 1;

                // the pole rows collapse one triangle of each quad
                if stack != 0 {
                    indices.extend_from_slice(&[i0, i1, i2]);
                }
                if stack != stacks - 1 {
                    indices.extend_from_slice(&[i1, i3, i2]);
                }
            }
        }

        Self { positions, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| {
            [
                self.positions[t[0] as usize],
                self.positions[t[1] as usize],
                self.positions[t[2] as usize],
            ]
        })
    }

    pub fn vertices(&self) -> Vec<MeshVertex> {
        self.positions
            .iter()
            .map(|p| MeshVertex {
                position: p.to_array(),
            })
            .collect()
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::uv_sphere(SphereOptions::default())
    }
}
