//! Offscreen splat renderer with multiframe supersampling

use glam::{Vec2, Vec4};
use splatframe_multiframe::{
    AccumulationState, DeviceError, Multiframe, MultiframeConfig, MultiframeError, PixelFormat,
};
use splatframe_raster::{back_to_front, RenderMode, SplatCamera, SplatPoint, SplatTextures};

use crate::capture::CapturedFrame;
use crate::context::{texture_format, GpuContext};
use crate::device::{GpuTexture, WgpuDevice};
use crate::error::{RenderError, RenderResult};
use crate::splat_pipeline::{GpuSplatScene, SplatPipeline};

/// Scene targets are display-encoded 8-bit, like a swapchain image
const SCENE_FORMAT: PixelFormat = PixelFormat::Rgba8Unorm;

/// wgpu rejects zero-sized textures through its uncaptured error handler
fn check_target_size(width: u32, height: u32) -> RenderResult<()> {
    if width == 0 || height == 0 {
        return Err(DeviceError::InvalidDimensions(width, height).into());
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub width: u32,
    pub height: u32,
    pub mode: RenderMode,
    pub background: Vec4,
    pub multiframe: MultiframeConfig,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            mode: RenderMode::Splat,
            background: Vec4::new(0.0, 0.0, 0.0, 1.0),
            multiframe: MultiframeConfig::default(),
        }
    }
}

/// Renders a fixed splat scene into an offscreen target, one sample per frame
pub struct HeadlessRenderer {
    device: WgpuDevice,
    pipeline: SplatPipeline,
    scene: GpuSplatScene,
    points: Vec<SplatPoint>,
    target: GpuTexture,
    multiframe: Multiframe<WgpuDevice>,
    config: HeadlessConfig,
}

impl HeadlessRenderer {
    pub fn new(
        context: GpuContext,
        config: HeadlessConfig,
        points: Vec<SplatPoint>,
    ) -> RenderResult<Self> {
        check_target_size(config.width, config.height)?;
        let scene = GpuSplatScene::upload(&context, &SplatTextures::pack(&points));
        let pipeline = SplatPipeline::new(&context, texture_format(SCENE_FORMAT));
        let target = GpuTexture::new(
            &context.device,
            config.width,
            config.height,
            SCENE_FORMAT,
            "Scene Target",
        );

        let device = WgpuDevice::new(context);
        let multiframe = Multiframe::new(&device, config.multiframe.clone())?;

        tracing::info!(
            "Headless renderer: {}x{}, {} splats, {} samples",
            config.width,
            config.height,
            points.len(),
            multiframe.sample_count()
        );

        Ok(Self {
            device,
            pipeline,
            scene,
            points,
            target,
            multiframe,
            config,
        })
    }

    pub fn multiframe(&self) -> &Multiframe<WgpuDevice> {
        &self.multiframe
    }

    pub fn state(&self) -> AccumulationState {
        self.multiframe.state()
    }

    /// Camera or scene changed: restart accumulation
    pub fn moved(&mut self) {
        self.multiframe.moved();
    }

    /// Reallocate the scene target and restart accumulation
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        check_target_size(width, height)?;
        if (width, height) == (self.config.width, self.config.height) {
            return Ok(());
        }
        self.config.width = width;
        self.config.height = height;
        self.target = GpuTexture::new(
            &self.device.context().device,
            width,
            height,
            SCENE_FORMAT,
            "Scene Target",
        );
        self.multiframe.moved();
        Ok(())
    }

    /// Render and accumulate one sample. Returns whether more samples remain.
    pub fn render_frame(&mut self, camera: &SplatCamera) -> RenderResult<bool> {
        if self.multiframe.is_converged() {
            return Ok(false);
        }

        let sub_frame = self.multiframe.sub_frame(camera.projection);
        let mut camera = camera.with_projection(sub_frame.projection);
        camera.viewport = Vec2::new(self.config.width as f32, self.config.height as f32);
        camera.validate()?;

        let order = back_to_front(&camera, &self.points);
        self.pipeline.render(
            self.device.context(),
            &self.target,
            &self.scene,
            &camera,
            &order,
            self.config.mode,
            self.config.background,
        );

        match self.multiframe.update(&mut self.device, &self.target) {
            Err(MultiframeError::Device(DeviceError::Lost)) => {
                tracing::warn!("Device lost during accumulation");
                self.multiframe.teardown();
                Err(DeviceError::Lost.into())
            }
            result => Ok(result?),
        }
    }

    /// Render every remaining sample and read back the converged display
    pub fn render_converged(&mut self, camera: &SplatCamera) -> RenderResult<CapturedFrame> {
        for _ in 0..self.multiframe.sample_count() {
            if !self.render_frame(camera)? {
                break;
            }
        }
        self.read_display()
    }

    pub fn read_display(&self) -> RenderResult<CapturedFrame> {
        if self.device.display().is_none() {
            return Err(RenderError::NoDisplay);
        }
        self.device.read_display()
    }
}
