//! Software rendering device
//!
//! Implements [`RenderDevice`] with explicit read-modify-write blending into
//! in-memory textures. Texel writes are quantized to the texture's format, so
//! an 8-bit accumulator bands the same way a GPU one would.

use glam::{Vec3, Vec4};
use half::f16;

use crate::device::{
    BlendState, ColorBuffer, DeviceCaps, DrawTarget, PixelFormat, QuadPass, RenderDevice,
};
use crate::error::DeviceError;

/// An RGBA texture held in host memory
#[derive(Clone, Debug, PartialEq)]
pub struct CpuTexture {
    width: u32,
    height: u32,
    format: PixelFormat,
    texels: Vec<Vec4>,
}

impl CpuTexture {
    /// Allocate a texture cleared to transparent black
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            texels: vec![Vec4::ZERO; (width as usize) * (height as usize)],
        }
    }

    /// Build a texture from a per-pixel function
    pub fn from_fn(
        width: u32,
        height: u32,
        format: PixelFormat,
        mut f: impl FnMut(u32, u32) -> Vec4,
    ) -> Self {
        let mut texels = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                texels.push(quantize(f(x, y), format));
            }
        }
        Self {
            width,
            height,
            format,
            texels,
        }
    }

    /// Wrap row-major pixels, quantizing them to `format`
    pub fn from_pixels(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<Vec4>,
    ) -> Result<Self, DeviceError> {
        if pixels.len() != (width as usize) * (height as usize) {
            return Err(DeviceError::InvalidDimensions(width, height));
        }
        let texels = pixels.into_iter().map(|p| quantize(p, format)).collect();
        Ok(Self {
            width,
            height,
            format,
            texels,
        })
    }

    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.texels[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: Vec4) {
        let index = self.index(x, y);
        self.texels[index] = quantize(value, self.format);
    }

    pub fn pixels(&self) -> &[Vec4] {
        &self.texels
    }

    /// Pack to 8-bit RGBA, row-major
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.texels
            .iter()
            .flat_map(|t| {
                let c = (t.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
                [c.x as u8, c.y as u8, c.z as u8, c.w as u8]
            })
            .collect()
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }
}

impl ColorBuffer for CpuTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        self.format
    }
}

/// Round a value to what the storage format can represent
pub fn quantize(value: Vec4, format: PixelFormat) -> Vec4 {
    match format {
        PixelFormat::Rgba32Float => value,
        PixelFormat::Rgba16Float => Vec4::new(
            f16::from_f32(value.x).to_f32(),
            f16::from_f32(value.y).to_f32(),
            f16::from_f32(value.z).to_f32(),
            f16::from_f32(value.w).to_f32(),
        ),
        PixelFormat::Rgba8Unorm => (value.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round() / 255.0,
    }
}

/// Software device with an 8-bit display target
#[derive(Debug)]
pub struct CpuDevice {
    caps: DeviceCaps,
    display: Option<CpuTexture>,
    lost: bool,
    draw_calls: usize,
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new(DeviceCaps::ALL)
    }
}

impl CpuDevice {
    pub fn new(caps: DeviceCaps) -> Self {
        Self {
            caps,
            display: None,
            lost: false,
            draw_calls: 0,
        }
    }

    /// The last image presented to the display, if any
    pub fn display(&self) -> Option<&CpuTexture> {
        self.display.as_ref()
    }

    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    /// Simulate a lost context: all calls fail until [`CpuDevice::restore`]
    pub fn lose(&mut self) {
        tracing::warn!("Software device lost");
        self.lost = true;
        self.display = None;
    }

    pub fn restore(&mut self) {
        self.lost = false;
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }
}

impl RenderDevice for CpuDevice {
    type Texture = CpuTexture;

    fn capabilities(&self) -> DeviceCaps {
        self.caps
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<CpuTexture, DeviceError> {
        if self.lost {
            return Err(DeviceError::Lost);
        }
        if width == 0 || height == 0 {
            return Err(DeviceError::InvalidDimensions(width, height));
        }
        Ok(CpuTexture::new(width, height, format))
    }

    fn draw_quad(
        &mut self,
        target: DrawTarget<'_, CpuTexture>,
        source: &CpuTexture,
        pass: &QuadPass,
    ) -> Result<(), DeviceError> {
        if self.lost {
            return Err(DeviceError::Lost);
        }

        let target = match target {
            DrawTarget::Texture(texture) => texture,
            DrawTarget::Display => {
                let display = match &mut self.display {
                    Some(display) if display.size() == source.size() => display,
                    slot => slot.insert(CpuTexture::new(
                        source.width,
                        source.height,
                        PixelFormat::Rgba8Unorm,
                    )),
                };
                display
            }
        };

        if target.size() != source.size() {
            return Err(DeviceError::SizeMismatch {
                expected: target.size(),
                actual: source.size(),
            });
        }

        let format = target.format;
        for (dst, src) in target.texels.iter_mut().zip(&source.texels) {
            *dst = quantize(shade(*src, *dst, pass.power, &pass.blend), format);
        }

        self.draw_calls += 1;
        Ok(())
    }
}

/// The quad's fragment stage followed by the blend unit
fn shade(src: Vec4, dst: Vec4, power: f32, blend: &BlendState) -> Vec4 {
    let rgb = src.truncate().max(Vec3::ZERO).powf(power);
    let a = blend.constant_alpha;
    Vec4::new(
        blend.color.apply(rgb.x, dst.x, a),
        blend.color.apply(rgb.y, dst.y, a),
        blend.color.apply(rgb.z, dst.z, a),
        blend.alpha.apply(1.0, dst.w, a),
    )
}
