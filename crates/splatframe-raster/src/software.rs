//! CPU reference rasterizer
//!
//! Draws splats exactly as the GPU pipeline does: project, order back to
//! front, cover each pixel center inside a splat's quad and blend it over the
//! target. Rows are shaded in parallel; splat order within a row is kept.

use glam::{UVec2, Vec2, Vec3, Vec4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::covariance::{debug_fragment, ProjectedSplat, SplatCamera};
use crate::error::RasterResult;
use crate::gpu_types::SplatPoint;
use crate::mesh::Mesh;
use crate::order::back_to_front;

/// How splats are drawn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Gaussian footprints on screen-aligned quads
    #[default]
    Splat,
    /// Opaque-ish ellipsoid meshes at twice the splat scale
    Debug,
}

/// Row-major RGBA image with linear float channels
#[derive(Clone, Debug, PartialEq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    pixels: Vec<Vec4>,
}

impl RasterImage {
    pub fn new(width: u32, height: u32, fill: Vec4) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill; (width as usize) * (height as usize)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[(y as usize) * (self.width as usize) + (x as usize)]
    }

    pub fn pixels(&self) -> &[Vec4] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<Vec4> {
        self.pixels
    }
}

/// `src * a + dst * (1 - a)` on color, `a + dst * (1 - a)` on alpha
#[inline]
pub fn blend_over(dst: Vec4, rgb: Vec3, alpha: f32) -> Vec4 {
    let keep = 1.0 - alpha;
    (rgb * alpha + dst.truncate() * keep).extend(alpha + dst.w * keep)
}

#[inline]
fn to_screen(clip: Vec4, viewport: Vec2) -> Vec2 {
    let ndc = clip.truncate().truncate() / clip.w;
    Vec2::new(
        (ndc.x * 0.5 + 0.5) * viewport.x,
        (0.5 - ndc.y * 0.5) * viewport.y,
    )
}

/// Pixel bounds `[min, max)` of a screen rectangle, clamped to the viewport
fn pixel_bounds(min: Vec2, max: Vec2, viewport: Vec2) -> Option<(UVec2, UVec2)> {
    let min = min.floor().max(Vec2::ZERO);
    let max = max.ceil().min(viewport);
    if min.x >= max.x || min.y >= max.y {
        return None;
    }
    Some((min.as_uvec2(), max.as_uvec2()))
}

/// Signed doubled area of `(a, b, p)`
#[inline]
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

struct Footprint {
    splat: ProjectedSplat,
    min: UVec2,
    max: UVec2,
}

struct ScreenTriangle {
    vertices: [Vec2; 3],
    color: Vec4,
    min: UVec2,
    max: UVec2,
}

impl ScreenTriangle {
    fn covers(&self, p: Vec2) -> bool {
        let [a, b, c] = self.vertices;
        edge(b, c, p) >= 0.0 && edge(c, a, p) >= 0.0 && edge(a, b, p) >= 0.0
    }
}

/// Software splat renderer
#[derive(Clone, Debug)]
pub struct SoftwareRasterizer {
    mode: RenderMode,
    background: Vec4,
    mesh: Mesh,
}

impl Default for SoftwareRasterizer {
    fn default() -> Self {
        Self::new(RenderMode::default())
    }
}

impl SoftwareRasterizer {
    pub fn new(mode: RenderMode) -> Self {
        Self {
            mode,
            background: Vec4::new(0.0, 0.0, 0.0, 1.0),
            mesh: Mesh::default(),
        }
    }

    pub fn with_background(mut self, background: Vec4) -> Self {
        self.background = background;
        self
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Render `points` into an image the size of the camera viewport
    pub fn render(&self, camera: &SplatCamera, points: &[SplatPoint]) -> RasterResult<RasterImage> {
        camera.validate()?;
        let width = camera.viewport.x as u32;
        let height = camera.viewport.y as u32;
        let mut image = RasterImage::new(width, height, self.background);
        if points.is_empty() {
            return Ok(image);
        }

        let order = back_to_front(camera, points);
        match self.mode {
            RenderMode::Splat => {
                let footprints = self.footprints(camera, points, &order);
                tracing::debug!(
                    "Rasterizing {} of {} splats at {}x{}",
                    footprints.len(),
                    points.len(),
                    width,
                    height
                );
                image.pixels.par_chunks_mut(width as usize).enumerate().for_each(|(y, row)| {
                    let y = y as u32;
                    for footprint in &footprints {
                        if y < footprint.min.y || y >= footprint.max.y {
                            continue;
                        }
                        let rgb = footprint.splat.color.truncate();
                        for x in footprint.min.x..footprint.max.x {
                            let pixel = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                            if let Some(alpha) = footprint.splat.coverage_at(pixel) {
                                let dst = &mut row[x as usize];
                                *dst = blend_over(*dst, rgb, alpha);
                            }
                        }
                    }
                });
            }
            RenderMode::Debug => {
                let triangles: Vec<ScreenTriangle> = order
                    .par_iter()
                    .map(|&i| self.debug_triangles(camera, &points[i as usize]))
                    .collect::<Vec<_>>()
                    .into_iter()
                    .flatten()
                    .collect();
                tracing::debug!(
                    "Rasterizing {} debug triangles at {}x{}",
                    triangles.len(),
                    width,
                    height
                );
                image.pixels.par_chunks_mut(width as usize).enumerate().for_each(|(y, row)| {
                    let y = y as u32;
                    for triangle in &triangles {
                        if y < triangle.min.y || y >= triangle.max.y {
                            continue;
                        }
                        for x in triangle.min.x..triangle.max.x {
                            let pixel = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                            if triangle.covers(pixel) {
                                let dst = &mut row[x as usize];
                                *dst = blend_over(*dst, triangle.color.truncate(), triangle.color.w);
                            }
                        }
                    }
                });
            }
        }

        Ok(image)
    }

    /// Screen footprints of the visible splats, in draw order
    fn footprints(
        &self,
        camera: &SplatCamera,
        points: &[SplatPoint],
        order: &[u32],
    ) -> Vec<Footprint> {
        order
            .par_iter()
            .filter_map(|&i| {
                let splat = *camera.project(&points[i as usize]).visible()?;
                if !splat.in_depth_range() {
                    return None;
                }
                let center = splat.screen_center();
                let extent = splat.screen_extent();
                let (min, max) = pixel_bounds(center - extent, center + extent, camera.viewport)?;
                Some(Footprint { splat, min, max })
            })
            .collect()
    }

    /// Front-facing ellipsoid triangles of one splat in pixel space
    fn debug_triangles(&self, camera: &SplatCamera, point: &SplatPoint) -> Vec<ScreenTriangle> {
        let Some(color) = debug_fragment(point.color) else {
            return Vec::new();
        };
        if camera.is_culled(point) {
            return Vec::new();
        }

        self.mesh
            .triangles()
            .filter_map(|triangle| {
                let clip = triangle.map(|v| camera.debug_vertex(point, v));
                if clip.iter().any(|c| c.w <= 0.0 || c.z > c.w) {
                    return None;
                }
                let [a, b, c] = clip.map(|c| to_screen(c, camera.viewport));

                // y flips on the way to pixels, so front faces come out negative
                if edge(a, b, c) >= 0.0 {
                    return None;
                }
                let min = a.min(b).min(c);
                let max = a.max(b).max(c);
                let (min, max) = pixel_bounds(min, max, camera.viewport)?;
                Some(ScreenTriangle {
                    vertices: [a, c, b],
                    color,
                    min,
                    max,
                })
            })
            .collect()
    }
}
