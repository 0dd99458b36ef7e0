//! [`RenderDevice`] on wgpu
//!
//! Quad passes run a full-screen triangle through `multiframe.wgsl` with
//! fixed-function blending. One pipeline is built per target format and blend
//! equation; the constant alpha is set per pass as the blend constant.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use splatframe_multiframe::{
    BlendComponent, BlendFactor, ColorBuffer, DeviceCaps, DeviceError, DrawTarget, PixelFormat,
    QuadPass, RenderDevice,
};

use crate::capture::{read_texture, CapturedFrame};
use crate::context::{texture_format, GpuContext};
use crate::error::{RenderError, RenderResult};

const QUAD_SHADER: &str = include_str!("shaders/multiframe.wgsl");

/// A 2D color texture usable as render target, shader input and copy source
pub struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl GpuTexture {
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: PixelFormat,
        label: &str,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&Default::default());

        Self {
            texture,
            view,
            width,
            height,
            format,
        }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

impl ColorBuffer for GpuTexture {
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

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct QuadUniforms {
    power: f32,
    _pad: [f32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    format: PixelFormat,
    color: BlendComponent,
    alpha: BlendComponent,
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::ConstantAlpha => wgpu::BlendFactor::Constant,
        BlendFactor::OneMinusConstantAlpha => wgpu::BlendFactor::OneMinusConstant,
    }
}

fn blend_component(component: BlendComponent) -> wgpu::BlendComponent {
    wgpu::BlendComponent {
        src_factor: blend_factor(component.src_factor),
        dst_factor: blend_factor(component.dst_factor),
        operation: wgpu::BlendOperation::Add,
    }
}

/// Blend constant carrying the pass's constant alpha on every channel
fn blend_constant(constant_alpha: f32) -> wgpu::Color {
    let a = constant_alpha as f64;
    wgpu::Color { r: a, g: a, b: a, a }
}

/// Render device backed by a headless wgpu context with an offscreen display
pub struct WgpuDevice {
    context: GpuContext,
    caps: DeviceCaps,
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    uniform_buffer: wgpu::Buffer,
    display: Option<GpuTexture>,
}

impl WgpuDevice {
    pub fn new(context: GpuContext) -> Self {
        let device = &context.device;
        let caps = context.capabilities();
        tracing::info!(
            "Render targets: half float {}, float {}",
            caps.half_float_renderable,
            caps.float_renderable
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Multiframe Quad Shader"),
            source: wgpu::ShaderSource::Wgsl(QUAD_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Multiframe Quad Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Multiframe Quad Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Multiframe Quad Uniforms"),
            size: std::mem::size_of::<QuadUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            context,
            caps,
            shader,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            uniform_buffer,
            display: None,
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// The offscreen display target, once something has been presented
    pub fn display(&self) -> Option<&GpuTexture> {
        self.display.as_ref()
    }

    /// Copy the display back to host memory
    pub fn read_display(&self) -> RenderResult<CapturedFrame> {
        let display = self.display.as_ref().ok_or(RenderError::NoDisplay)?;
        read_texture(&self.context, display)
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.context.is_lost() {
            return Err(DeviceError::Lost);
        }
        Ok(())
    }
}

fn create_quad_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    key: PipelineKey,
) -> wgpu::RenderPipeline {
    tracing::debug!("Creating quad pipeline for {:?}", key);
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Multiframe Quad Pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: texture_format(key.format),
                blend: Some(wgpu::BlendState {
                    color: blend_component(key.color),
                    alpha: blend_component(key.alpha),
                }),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

impl RenderDevice for WgpuDevice {
    type Texture = GpuTexture;

    fn capabilities(&self) -> DeviceCaps {
        self.caps
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<GpuTexture, DeviceError> {
        self.check_lost()?;
        if width == 0 || height == 0 {
            return Err(DeviceError::InvalidDimensions(width, height));
        }

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = GpuTexture::new(device, width, height, format, "Multiframe Texture");
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(DeviceError::Backend(error.to_string()));
        }
        Ok(texture)
    }

    fn draw_quad(
        &mut self,
        target: DrawTarget<'_, GpuTexture>,
        source: &GpuTexture,
        pass: &QuadPass,
    ) -> Result<(), DeviceError> {
        self.check_lost()?;

        if matches!(target, DrawTarget::Display)
            && self.display.as_ref().map(|d| d.size()) != Some(source.size())
        {
            self.display = Some(GpuTexture::new(
                &self.context.device,
                source.width(),
                source.height(),
                PixelFormat::Rgba8Unorm,
                "Display",
            ));
        }

        let target: &GpuTexture = match target {
            DrawTarget::Texture(texture) => &*texture,
            DrawTarget::Display => self
                .display
                .as_ref()
                .ok_or_else(|| DeviceError::Backend("display target missing".into()))?,
        };
        if target.size() != source.size() {
            return Err(DeviceError::SizeMismatch {
                expected: target.size(),
                actual: source.size(),
            });
        }

        let key = PipelineKey {
            format: target.format,
            color: pass.blend.color,
            alpha: pass.blend.alpha,
        };
        let device = &self.context.device;
        let pipeline = self.pipelines.entry(key).or_insert_with(|| {
            create_quad_pipeline(device, &self.shader, &self.pipeline_layout, key)
        });

        self.context.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&QuadUniforms {
                power: pass.power,
                _pad: [0.0; 3],
            }),
        );

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Multiframe Quad Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Multiframe Quad Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Multiframe Quad Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.set_blend_constant(blend_constant(pass.blend.constant_alpha));
            render_pass.draw(0..3, 0..1);
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));

        Ok(())
    }
}
