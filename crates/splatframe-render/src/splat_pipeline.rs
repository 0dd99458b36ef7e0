//! GPU splat rendering
//!
//! Splat attributes are uploaded once as four square `Rgba32Float` textures.
//! Each frame writes the camera uniforms and the back-to-front order, then
//! draws one instance per splat: a screen-space quad in [`RenderMode::Splat`]
//! or a scaled unit sphere in [`RenderMode::Debug`].

use glam::Vec4;
use splatframe_raster::{
    shaders, Mesh, MeshVertex, RenderMode, SplatCamera, SplatTextures, SplatUniforms,
    TextureParams, QUAD_INDICES, QUAD_VERTICES,
};
use wgpu::util::DeviceExt;

use crate::context::GpuContext;
use crate::device::GpuTexture;

/// Splat attribute textures and the per-frame order buffer
pub struct GpuSplatScene {
    textures: [wgpu::Texture; 4],
    views: [wgpu::TextureView; 4],
    order_buffer: wgpu::Buffer,
    tex_params: TextureParams,
    count: u32,
}

impl GpuSplatScene {
    pub fn upload(context: &GpuContext, packed: &SplatTextures) -> Self {
        let side = packed.side();
        let size = wgpu::Extent3d {
            width: side,
            height: side,
            depth_or_array_layers: 1,
        };

        let upload = |label: &str, texels: &[[f32; 4]]| {
            let texture = context.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            context.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytemuck::cast_slice(texels),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(side * 16),
                    rows_per_image: Some(side),
                },
                size,
            );
            texture
        };

        let textures = [
            upload("Splat Centers", &packed.center),
            upload("Splat Scales", &packed.scale),
            upload("Splat Rotations", &packed.rotation),
            upload("Splat Colors", &packed.color),
        ];
        let views = [
            textures[0].create_view(&Default::default()),
            textures[1].create_view(&Default::default()),
            textures[2].create_view(&Default::default()),
            textures[3].create_view(&Default::default()),
        ];

        let order_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Splat Order"),
            size: (packed.len().max(1) * std::mem::size_of::<u32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        tracing::info!("Uploaded {} splats ({}x{} textures)", packed.len(), side, side);

        Self {
            textures,
            views,
            order_buffer,
            tex_params: packed.params(),
            count: packed.len() as u32,
        }
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn texture_side(&self) -> u32 {
        self.textures[0].width()
    }
}

struct GeometryBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_format: wgpu::IndexFormat,
    index_count: u32,
}

/// Pipelines for both render modes, targeting one color format
pub struct SplatPipeline {
    bind_group_layout: wgpu::BindGroupLayout,
    splat_pipeline: wgpu::RenderPipeline,
    debug_pipeline: wgpu::RenderPipeline,
    quad: GeometryBuffers,
    sphere: GeometryBuffers,
    uniform_buffer: wgpu::Buffer,
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

/// Straight-alpha "over": `src * a + dst * (1 - a)`, alpha `a + dst.a * (1 - a)`
const OVER: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

impl SplatPipeline {
    pub fn new(context: &GpuContext, target_format: wgpu::TextureFormat) -> Self {
        let device = &context.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Splat Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::SPLAT.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Splat Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                texture_entry(4),
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Splat Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: MeshVertex::SIZE as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            }],
        };

        let create = |label: &str, vs: &str, fs: &str, cull_mode: Option<wgpu::Face>| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some(vs),
                    buffers: &[vertex_layout.clone()],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(fs),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: target_format,
                        blend: Some(OVER),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let splat_pipeline = create("Splat Pipeline", "vs_splat", "fs_splat", None);
        let debug_pipeline = create(
            "Splat Debug Pipeline",
            "vs_debug",
            "fs_debug",
            Some(wgpu::Face::Back),
        );

        let quad = GeometryBuffers {
            vertices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Splat Quad Vertices"),
                contents: bytemuck::cast_slice(&QUAD_VERTICES),
                usage: wgpu::BufferUsages::VERTEX,
            }),
            indices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Splat Quad Indices"),
                contents: bytemuck::cast_slice(&QUAD_INDICES),
                usage: wgpu::BufferUsages::INDEX,
            }),
            index_format: wgpu::IndexFormat::Uint16,
            index_count: QUAD_INDICES.len() as u32,
        };

        let mesh = Mesh::default();
        let sphere = GeometryBuffers {
            vertices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Splat Sphere Vertices"),
                contents: bytemuck::cast_slice(&mesh.vertices()),
                usage: wgpu::BufferUsages::VERTEX,
            }),
            indices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Splat Sphere Indices"),
                contents: bytemuck::cast_slice(&mesh.indices),
                usage: wgpu::BufferUsages::INDEX,
            }),
            index_format: wgpu::IndexFormat::Uint32,
            index_count: mesh.indices.len() as u32,
        };

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Splat Uniforms"),
            size: SplatUniforms::SIZE as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            bind_group_layout,
            splat_pipeline,
            debug_pipeline,
            quad,
            sphere,
            uniform_buffer,
        }
    }

    /// Clear `target` and draw every splat in `order` (back to front)
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        context: &GpuContext,
        target: &GpuTexture,
        scene: &GpuSplatScene,
        camera: &SplatCamera,
        order: &[u32],
        mode: RenderMode,
        clear: Vec4,
    ) {
        let uniforms = SplatUniforms::new(camera, scene.tex_params);
        context
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        if !order.is_empty() {
            context
                .queue
                .write_buffer(&scene.order_buffer, 0, bytemuck::cast_slice(order));
        }

        let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Splat Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&scene.views[0]),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&scene.views[1]),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&scene.views[2]),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&scene.views[3]),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: scene.order_buffer.as_entire_binding(),
                },
            ],
        });

        let (pipeline, geometry) = match mode {
            RenderMode::Splat => (&self.splat_pipeline, &self.quad),
            RenderMode::Debug => (&self.debug_pipeline, &self.sphere),
        };
        let instances = order.len().min(scene.count as usize) as u32;

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Splat Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Splat Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear.x as f64,
                            g: clear.y as f64,
                            b: clear.z as f64,
                            a: clear.w as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if instances > 0 {
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, &bind_group, &[]);
                render_pass.set_vertex_buffer(0, geometry.vertices.slice(..));
                render_pass.set_index_buffer(geometry.indices.slice(..), geometry.index_format);
                render_pass.draw_indexed(0..geometry.index_count, 0, 0..instances);
            }
        }
        context.queue.submit(std::iter::once(encoder.finish()));
    }
}
