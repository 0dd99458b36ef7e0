//! Host rendering device abstraction
//!
//! The accumulator only needs a handful of services from the host: texture
//! allocation with a capability query, and a full-screen quad draw that samples
//! one texture through a `pow(rgb, power)` pass into a target with a given
//! blend state. Everything else about the host renderer stays opaque.

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Color buffer storage formats, in order of preference for accumulation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba16Float,
    Rgba32Float,
    Rgba8Unorm,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba16Float => 8,
            PixelFormat::Rgba32Float => 16,
            PixelFormat::Rgba8Unorm => 4,
        }
    }

    pub fn is_float(self) -> bool {
        !matches!(self, PixelFormat::Rgba8Unorm)
    }
}

/// Render-target capabilities reported by the device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceCaps {
    /// Half-float textures can be rendered to and blended
    pub half_float_renderable: bool,
    /// Full-float textures can be rendered to and blended
    pub float_renderable: bool,
}

impl DeviceCaps {
    pub const ALL: Self = Self {
        half_float_renderable: true,
        float_renderable: true,
    };

    pub const NONE: Self = Self {
        half_float_renderable: false,
        float_renderable: false,
    };
}

/// Pick the accumulator format: 16-bit float, else 32-bit float, else 8-bit.
///
/// An 8-bit accumulator bands visibly after many samples; that is accepted as
/// a degraded mode rather than an error.
pub fn choose_pixel_format(caps: DeviceCaps) -> PixelFormat {
    if caps.half_float_renderable {
        PixelFormat::Rgba16Float
    } else if caps.float_renderable {
        PixelFormat::Rgba32Float
    } else {
        tracing::warn!("No renderable float format, accumulating in 8-bit");
        PixelFormat::Rgba8Unorm
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    ConstantAlpha,
    OneMinusConstantAlpha,
}

impl BlendFactor {
    /// Scalar value of the factor for a given constant alpha
    pub fn resolve(self, constant_alpha: f32) -> f32 {
        match self {
            BlendFactor::Zero => 0.0,
            BlendFactor::One => 1.0,
            BlendFactor::ConstantAlpha => constant_alpha,
            BlendFactor::OneMinusConstantAlpha => 1.0 - constant_alpha,
        }
    }
}

/// `src * src_factor + dst * dst_factor`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

impl BlendComponent {
    pub const REPLACE: Self = Self {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::Zero,
    };

    pub fn apply(&self, src: f32, dst: f32, constant_alpha: f32) -> f32 {
        src * self.src_factor.resolve(constant_alpha) + dst * self.dst_factor.resolve(constant_alpha)
    }
}

/// Separate color / alpha blending with a constant blend alpha
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
    pub constant_alpha: f32,
}

impl BlendState {
    /// Overwrite the target: `src * 1 + dst * 0`
    pub const REPLACE: Self = Self {
        color: BlendComponent::REPLACE,
        alpha: BlendComponent::REPLACE,
        constant_alpha: 1.0,
    };

    /// `src * alpha + dst * (1 - alpha)` on color, replace on alpha
    pub fn constant_alpha(alpha: f32) -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::ConstantAlpha,
                dst_factor: BlendFactor::OneMinusConstantAlpha,
            },
            alpha: BlendComponent::REPLACE,
            constant_alpha: alpha,
        }
    }
}

/// One full-screen quad pass: `out = blend(pow(source.rgb, power), target)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadPass {
    pub power: f32,
    pub blend: BlendState,
}

/// Where a quad pass writes
pub enum DrawTarget<'a, T> {
    /// An off-screen texture owned by the caller
    Texture(&'a mut T),
    /// The device's display target (back buffer)
    Display,
}

/// A color buffer with known dimensions and format
pub trait ColorBuffer {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> PixelFormat;

    fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
}

/// The rendering services the accumulator consumes from its host
pub trait RenderDevice {
    type Texture: ColorBuffer;

    /// Which float formats can be rendered to
    fn capabilities(&self) -> DeviceCaps;

    /// Allocate a color texture without mipmaps or depth
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self::Texture, DeviceError>;

    /// Draw a full-screen quad sampling `source` into `target`
    fn draw_quad(
        &mut self,
        target: DrawTarget<'_, Self::Texture>,
        source: &Self::Texture,
        pass: &QuadPass,
    ) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_preference() {
        assert_eq!(choose_pixel_format(DeviceCaps::ALL), PixelFormat::Rgba16Float);
        assert_eq!(
            choose_pixel_format(DeviceCaps {
                half_float_renderable: false,
                float_renderable: true,
            }),
            PixelFormat::Rgba32Float
        );
        assert_eq!(choose_pixel_format(DeviceCaps::NONE), PixelFormat::Rgba8Unorm);
    }

    #[test]
    fn test_constant_alpha_blend() {
        let blend = BlendState::constant_alpha(0.25);
        assert_eq!(blend.color.apply(1.0, 0.0, blend.constant_alpha), 0.25);
        assert_eq!(blend.color.apply(0.0, 1.0, blend.constant_alpha), 0.75);
        assert_eq!(blend.alpha.apply(1.0, 0.5, blend.constant_alpha), 1.0);

        let replace = BlendState::REPLACE;
        assert_eq!(replace.color.apply(0.3, 0.9, replace.constant_alpha), 0.3);
    }
}
