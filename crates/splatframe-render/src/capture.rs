//! Texture readback to host memory

use glam::Vec4;
use half::f16;
use splatframe_multiframe::{ColorBuffer, PixelFormat};

use crate::context::GpuContext;
use crate::device::GpuTexture;
use crate::error::{RenderError, RenderResult};

/// Decoded RGBA pixels, rows top to bottom
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec4>,
}

impl CapturedFrame {
    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Clamp and quantize to 8 bits per channel
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|p| p.to_array())
            .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect()
    }
}

/// Row pitch for a texture-to-buffer copy, padded to 256 bytes
pub fn padded_bytes_per_row(width: u32, format: PixelFormat) -> u32 {
    let unpadded = width * format.bytes_per_pixel();
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn decode_pixel(bytes: &[u8], format: PixelFormat) -> Vec4 {
    match format {
        PixelFormat::Rgba8Unorm => {
            Vec4::new(bytes[0] as f32, bytes[1] as f32, bytes[2] as f32, bytes[3] as f32) / 255.0
        }
        PixelFormat::Rgba16Float => {
            let bits: [u16; 4] = bytemuck::pod_read_unaligned(bytes);
            Vec4::from_array(bits.map(|b| f16::from_bits(b).to_f32()))
        }
        PixelFormat::Rgba32Float => Vec4::from_array(bytemuck::pod_read_unaligned(bytes)),
    }
}

/// Strip row padding and decode a mapped readback buffer
pub fn decode_rows(
    data: &[u8],
    width: u32,
    height: u32,
    bytes_per_row: u32,
    format: PixelFormat,
) -> Vec<Vec4> {
    let pixel_size = format.bytes_per_pixel() as usize;
    let row_size = width as usize * pixel_size;

    let mut pixels = Vec::with_capacity((width * height) as usize);
    for row in 0..height as usize {
        let start = row * bytes_per_row as usize;
        pixels.extend(
            data[start..start + row_size]
                .chunks_exact(pixel_size)
                .map(|px| decode_pixel(px, format)),
        );
    }
    pixels
}

/// Copy a texture into a staging buffer and block until it is readable
pub fn read_texture(context: &GpuContext, texture: &GpuTexture) -> RenderResult<CapturedFrame> {
    let (width, height) = texture.size();
    let format = texture.format();
    let bytes_per_row = padded_bytes_per_row(width, format);

    let staging_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Capture Staging Buffer"),
        size: (bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Capture Encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture: texture.texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging_buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    context.queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = staging_buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    context.device.poll(wgpu::Maintain::Wait);
    rx.recv().map_err(|_| RenderError::ReadbackClosed)??;

    let pixels = {
        let data = buffer_slice.get_mapped_range();
        decode_rows(&data, width, height, bytes_per_row, format)
    };
    staging_buffer.unmap();

    tracing::debug!("Captured {}x{} {:?} frame", width, height, format);

    Ok(CapturedFrame {
        width,
        height,
        pixels,
    })
}
