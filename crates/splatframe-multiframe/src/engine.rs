//! Progressive multiframe accumulation
//!
//! Each displayed frame the host renders the scene once with the projection
//! from [`Multiframe::sub_frame`], then calls [`Multiframe::update`] with the
//! rendered color buffer. The first sample is shown immediately; the rest are
//! blended in linear light into an off-screen accumulator, which replaces the
//! display once the last sample lands.

use glam::Mat4;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{AccumulationWeighting, MultiframeConfig};
use crate::device::{
    choose_pixel_format, BlendState, ColorBuffer, DrawTarget, PixelFormat, QuadPass, RenderDevice,
};
use crate::error::MultiframeResult;
use crate::jitter::{jitter_projection, JitterGuard, SubFrame};
use crate::samples::{SampleConfig, SampleSet};

/// Progress of the current accumulation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccumulationState {
    /// Nothing accumulated since the last reset
    Idle,
    /// Some but not all samples blended
    Accumulating,
    /// Every sample blended and presented
    Converged,
}

/// Multiframe supersampling accumulator for one camera
pub struct Multiframe<D: RenderDevice> {
    samples: SampleSet,
    sample_index: usize,
    /// Sum of the weights blended so far
    blended_weight: f32,
    accumulator: Option<D::Texture>,
    pixel_format: PixelFormat,
    gamma: f32,
    weighting: AccumulationWeighting,
    rng: StdRng,
}

impl<D: RenderDevice> Multiframe<D> {
    pub fn new(device: &D, config: MultiframeConfig) -> MultiframeResult<Self> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let samples = SampleSet::generate(config.samples, &mut rng)?;
        let pixel_format = choose_pixel_format(device.capabilities());

        tracing::debug!(
            "Multiframe: {} samples, accumulator format {:?}",
            samples.len(),
            pixel_format
        );

        Ok(Self {
            samples,
            sample_index: 0,
            blended_weight: 0.0,
            accumulator: None,
            pixel_format,
            gamma: config.gamma,
            weighting: config.weighting,
            rng,
        })
    }

    /// Replace the sample set and restart accumulation
    pub fn set_samples(&mut self, config: SampleConfig) -> MultiframeResult<()> {
        self.samples = SampleSet::generate(config, &mut self.rng)?;
        self.moved();
        Ok(())
    }

    pub fn samples(&self) -> &SampleSet {
        &self.samples
    }

    pub fn sample_index(&self) -> usize {
        self.sample_index
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    pub fn accumulator(&self) -> Option<&D::Texture> {
        self.accumulator.as_ref()
    }

    pub fn state(&self) -> AccumulationState {
        if self.sample_index == 0 {
            AccumulationState::Idle
        } else if self.sample_index < self.samples.len() {
            AccumulationState::Accumulating
        } else {
            AccumulationState::Converged
        }
    }

    pub fn is_converged(&self) -> bool {
        self.state() == AccumulationState::Converged
    }

    /// Projection and texture bias for the next scene render.
    ///
    /// The first sample always renders with the base projection and zero bias,
    /// so the preview after a fresh start and after [`Multiframe::moved`] is
    /// the same image. Later samples are jittered by their offset in
    /// accumulator pixels.
    pub fn sub_frame(&self, base: Mat4) -> SubFrame {
        let Some(sample) = self.samples.get(self.sample_index) else {
            return SubFrame::unjittered(base);
        };
        if self.sample_index == 0 {
            return SubFrame {
                sample_index: Some(0),
                ..SubFrame::unjittered(base)
            };
        }
        let Some(accumulator) = &self.accumulator else {
            return SubFrame::unjittered(base);
        };

        SubFrame {
            projection: jitter_projection(
                base,
                sample.offset,
                accumulator.width(),
                accumulator.height(),
            ),
            texture_bias: self.samples.texture_bias(),
            sample_index: Some(self.sample_index),
        }
    }

    /// Jitter a camera-owned projection in place until the guard drops
    pub fn apply_jitter<'a>(&self, projection: &'a mut Mat4) -> JitterGuard<'a> {
        let sub_frame = self.sub_frame(*projection);
        JitterGuard::new(projection, &sub_frame)
    }

    /// The scene moved: restart from the first sample
    pub fn moved(&mut self) {
        self.sample_index = 0;
        self.blended_weight = 0.0;
    }

    /// Release the accumulator, e.g. after the device was lost.
    ///
    /// The next [`Multiframe::update`] allocates a new one and starts over.
    pub fn teardown(&mut self) {
        if self.accumulator.take().is_some() {
            tracing::debug!("Multiframe accumulator released");
        }
        self.moved();
    }

    /// Blend the freshly rendered `source` into the accumulator and update the
    /// display on the first and last sample.
    ///
    /// Returns whether more samples remain.
    pub fn update(&mut self, device: &mut D, source: &D::Texture) -> MultiframeResult<bool> {
        let (width, height) = source.size();

        if let Some(accumulator) = &self.accumulator {
            if accumulator.size() != (width, height) {
                tracing::debug!(
                    "Source resized {:?} -> {:?}, restarting accumulation",
                    accumulator.size(),
                    (width, height)
                );
                self.teardown();
            }
        }

        let accumulator = match &mut self.accumulator {
            Some(accumulator) => accumulator,
            slot => {
                let texture = device.create_texture(width, height, self.pixel_format)?;
                tracing::debug!("Allocated {}x{} {:?} accumulator", width, height, self.pixel_format);
                slot.insert(texture)
            }
        };

        let sample_count = self.samples.len();
        let Some(sample) = self.samples.get(self.sample_index) else {
            return Ok(false);
        };
        let index = self.sample_index;

        // state is only committed once the accumulate draw succeeds, so a
        // failed update can be retried with the same sample
        let (blend, blended_weight) = if index == 0 {
            (BlendState::REPLACE, sample.weight)
        } else {
            let total = self.blended_weight + sample.weight;
            let alpha = match self.weighting {
                AccumulationWeighting::RunningAverage if total > 0.0 => sample.weight / total,
                AccumulationWeighting::RunningAverage => {
                    tracing::warn!("Sample weights underflowed, blending uniformly");
                    1.0 / (index + 1) as f32
                }
                AccumulationWeighting::ConstantAlpha => sample.weight,
            };
            (BlendState::constant_alpha(alpha), total)
        };

        device.draw_quad(
            DrawTarget::Texture(&mut *accumulator),
            source,
            &QuadPass {
                power: self.gamma,
                blend,
            },
        )?;
        self.blended_weight = blended_weight;
        self.sample_index = index + 1;

        // the display only changes on the first and last sample
        if index == 0 {
            device.draw_quad(
                DrawTarget::Display,
                source,
                &QuadPass {
                    power: 1.0,
                    blend: BlendState::REPLACE,
                },
            )?;
        } else if index + 1 == sample_count {
            device.draw_quad(
                DrawTarget::Display,
                accumulator,
                &QuadPass {
                    power: 1.0 / self.gamma,
                    blend: BlendState::REPLACE,
                },
            )?;
            tracing::debug!("Multiframe converged after {} samples", sample_count);
        }

        Ok(self.sample_index < sample_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_GAMMA;
    use crate::cpu::{CpuDevice, CpuTexture};
    use crate::device::DeviceCaps;
    use crate::error::DeviceError;
    use approx::assert_relative_eq;
    use glam::Vec4;

    fn engine(device: &CpuDevice, grid_size: u32) -> Multiframe<CpuDevice> {
        let config = MultiframeConfig::new(SampleConfig::new(grid_size)).with_seed(3);
        Multiframe::new(device, config).unwrap()
    }

    fn flat(width: u32, height: u32, value: f32) -> CpuTexture {
        CpuTexture::from_fn(width, height, PixelFormat::Rgba8Unorm, |_, _| {
            Vec4::new(value, value, value, 1.0)
        })
    }

    #[test]
    fn test_state_transitions() {
        let mut device = CpuDevice::default();
        let mut multiframe = engine(&device, 2);
        let source = flat(4, 4, 0.5);

        assert_eq!(multiframe.state(), AccumulationState::Idle);
        assert!(multiframe.update(&mut device, &source).unwrap());
        assert_eq!(multiframe.state(), AccumulationState::Accumulating);
        assert!(multiframe.update(&mut device, &source).unwrap());
        assert!(multiframe.update(&mut device, &source).unwrap());
        assert!(!multiframe.update(&mut device, &source).unwrap());
        assert_eq!(multiframe.state(), AccumulationState::Converged);
        assert_eq!(multiframe.sample_index(), multiframe.sample_count());
    }

    #[test]
    fn test_converged_updates_are_noops() {
        let mut device = CpuDevice::default();
        let mut multiframe = engine(&device, 2);
        let source = flat(4, 4, 0.5);

        while multiframe.update(&mut device, &source).unwrap() {}
        let draws = device.draw_calls();
        let display = device.display().cloned();

        let other = flat(4, 4, 0.9);
        assert!(!multiframe.update(&mut device, &other).unwrap());
        assert_eq!(device.draw_calls(), draws);
        assert_eq!(device.display().cloned(), display);
        assert_eq!(multiframe.sample_index(), 4);

        multiframe.moved();
        assert!(multiframe.update(&mut device, &other).unwrap());
        assert_eq!(multiframe.sample_index(), 1);
    }

    #[test]
    fn test_display_only_on_first_and_last_sample() {
        let mut device = CpuDevice::default();
        let mut multiframe = engine(&device, 2);

        multiframe.update(&mut device, &flat(2, 2, 0.2)).unwrap();
        let preview = device.display().unwrap().get(0, 0);
        assert_relative_eq!(preview.x, 51.0 / 255.0);

        multiframe.update(&mut device, &flat(2, 2, 0.8)).unwrap();
        multiframe.update(&mut device, &flat(2, 2, 0.8)).unwrap();
        assert_eq!(device.display().unwrap().get(0, 0), preview);

        multiframe.update(&mut device, &flat(2, 2, 0.8)).unwrap();
        assert_ne!(device.display().unwrap().get(0, 0), preview);
    }

    #[test]
    fn test_running_average_is_weighted_mean() {
        let mut device = CpuDevice::new(DeviceCaps {
            half_float_renderable: false,
            float_renderable: true,
        });
        let mut multiframe = engine(&device, 2);
        assert_eq!(multiframe.pixel_format(), PixelFormat::Rgba32Float);

        let values = [0.1f32, 0.4, 0.7, 1.0];
        for v in values {
            multiframe.update(&mut device, &flat(1, 1, v)).unwrap();
        }

        let gamma = multiframe.gamma();
        let mean: f32 = values
            .iter()
            .map(|v| (v * 255.0).round() / 255.0)
            .map(|v| v.powf(gamma))
            .sum::<f32>()
            / values.len() as f32;
        let accumulated = multiframe.accumulator().unwrap().get(0, 0).x;
        assert_relative_eq!(accumulated, mean, epsilon = 1e-5);

        let shown = device.display().unwrap().get(0, 0).x;
        assert_relative_eq!(shown, (accumulated.powf(1.0 / gamma) * 255.0).round() / 255.0);
    }

    #[test]
    fn test_constant_alpha_weighting() {
        let mut device = CpuDevice::new(DeviceCaps {
            half_float_renderable: false,
            float_renderable: true,
        });
        let config = MultiframeConfig::new(SampleConfig::new(2))
            .with_weighting(AccumulationWeighting::ConstantAlpha);
        let mut multiframe = Multiframe::new(&device, config).unwrap();

        multiframe.update(&mut device, &flat(1, 1, 0.0)).unwrap();
        multiframe.update(&mut device, &flat(1, 1, 1.0)).unwrap();

        // weights are 1/4 each: 0 * 0.75 + 1 * 0.25
        assert_relative_eq!(multiframe.accumulator().unwrap().get(0, 0).x, 0.25);
    }

    #[test]
    fn test_moved_reproduces_first_sample() {
        let mut fresh_device = CpuDevice::default();
        let mut fresh = engine(&fresh_device, 3);
        let first = flat(3, 3, 0.6);
        fresh.update(&mut fresh_device, &first).unwrap();

        let mut device = CpuDevice::default();
        let mut multiframe = engine(&device, 3);
        for v in [0.6, 0.1, 0.9, 0.3] {
            multiframe.update(&mut device, &flat(3, 3, v)).unwrap();
        }
        multiframe.moved();
        assert_eq!(multiframe.state(), AccumulationState::Idle);
        multiframe.update(&mut device, &first).unwrap();

        assert_eq!(device.display(), fresh_device.display());
        assert_eq!(multiframe.accumulator(), fresh.accumulator());
        assert_eq!(multiframe.sample_index(), 1);
    }

    #[test]
    fn test_resize_restarts_accumulation() {
        let mut device = CpuDevice::default();
        let mut multiframe = engine(&device, 3);

        multiframe.update(&mut device, &flat(4, 4, 0.5)).unwrap();
        multiframe.update(&mut device, &flat(4, 4, 0.5)).unwrap();
        assert_eq!(multiframe.sample_index(), 2);

        multiframe.update(&mut device, &flat(8, 6, 0.5)).unwrap();
        assert_eq!(multiframe.sample_index(), 1);
        assert_eq!(multiframe.accumulator().unwrap().size(), (8, 6));
        assert_eq!(device.display().unwrap().size(), (8, 6));
    }

    #[test]
    fn test_device_loss_and_recovery() {
        let mut device = CpuDevice::default();
        let mut multiframe = engine(&device, 2);
        let source = flat(2, 2, 0.5);

        multiframe.update(&mut device, &source).unwrap();
        multiframe.update(&mut device, &source).unwrap();

        device.lose();
        multiframe.teardown();
        assert!(multiframe.accumulator().is_none());
        assert!(multiframe.update(&mut device, &source).is_err());
        assert_eq!(multiframe.sample_index(), 0);

        device.restore();
        assert!(multiframe.update(&mut device, &source).unwrap());
        assert!(multiframe.accumulator().is_some());
        assert_eq!(multiframe.sample_index(), 1);
    }

    #[test]
    fn test_sub_frame_jitter_and_bias() {
        let mut device = CpuDevice::default();
        let mut multiframe = engine(&device, 2);
        let base = Mat4::perspective_rh(1.0, 1.0, 0.1, 10.0);

        let fresh = multiframe.sub_frame(base);
        assert_eq!(fresh.projection, base);
        assert_eq!(fresh.texture_bias, 0.0);
        assert_eq!(fresh.sample_index, Some(0));

        let source = flat(8, 8, 0.5);
        multiframe.update(&mut device, &source).unwrap();
        let second = multiframe.sub_frame(base);
        let offset = multiframe.samples().samples()[1].offset;
        assert_eq!(second.projection, jitter_projection(base, offset, 8, 8));
        assert_eq!(second.texture_bias, multiframe.samples().texture_bias());
        assert_eq!(second.sample_index, Some(1));

        // the first sample stays unjittered once an accumulator exists
        multiframe.moved();
        assert_eq!(multiframe.sub_frame(base), fresh);
    }

    #[test]
    fn test_moved_preview_matches_fresh_render() {
        // pixel values follow the projection, so any jitter shows up in the image
        fn render(projection: Mat4) -> CpuTexture {
            let shift = projection.z_axis.x + projection.z_axis.y;
            flat(4, 4, (0.5 + shift * 4.0).clamp(0.0, 1.0))
        }

        let base = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);

        let mut fresh_device = CpuDevice::default();
        let mut fresh = engine(&fresh_device, 4);
        let fresh_frame = fresh.sub_frame(base);
        fresh
            .update(&mut fresh_device, &render(fresh_frame.projection))
            .unwrap();

        let mut device = CpuDevice::default();
        let mut multiframe = engine(&device, 4);
        loop {
            let sub_frame = multiframe.sub_frame(base);
            if !multiframe
                .update(&mut device, &render(sub_frame.projection))
                .unwrap()
            {
                break;
            }
        }
        multiframe.moved();
        let moved_frame = multiframe.sub_frame(base);
        multiframe
            .update(&mut device, &render(moved_frame.projection))
            .unwrap();

        assert_eq!(moved_frame, fresh_frame);
        assert_eq!(device.display(), fresh_device.display());
        assert_eq!(multiframe.accumulator(), fresh.accumulator());
    }

    /// Fails a single draw call, counted from 1
    struct FailingDevice {
        inner: CpuDevice,
        fail_at: usize,
        draws: usize,
    }

    impl RenderDevice for FailingDevice {
        type Texture = CpuTexture;

        fn capabilities(&self) -> DeviceCaps {
            self.inner.capabilities()
        }

        fn create_texture(
            &mut self,
            width: u32,
            height: u32,
            format: PixelFormat,
        ) -> Result<CpuTexture, DeviceError> {
            self.inner.create_texture(width, height, format)
        }

        fn draw_quad(
            &mut self,
            target: DrawTarget<'_, CpuTexture>,
            source: &CpuTexture,
            pass: &QuadPass,
        ) -> Result<(), DeviceError> {
            self.draws += 1;
            if self.draws == self.fail_at {
                return Err(DeviceError::Backend("draw rejected".into()));
            }
            self.inner.draw_quad(target, source, pass)
        }
    }

    fn linear_mean(sources: &[CpuTexture]) -> f32 {
        sources
            .iter()
            .map(|s| s.get(0, 0).x.powf(DEFAULT_GAMMA))
            .sum::<f32>()
            / sources.len() as f32
    }

    #[test]
    fn test_failed_accumulate_is_retried_once() {
        // draws: accumulate 0, present 0, accumulate 1, accumulate 2 (fails)
        let mut device = FailingDevice {
            inner: CpuDevice::default(),
            fail_at: 4,
            draws: 0,
        };
        let config = MultiframeConfig::new(SampleConfig::new(2)).with_seed(3);
        let mut multiframe = Multiframe::new(&device, config).unwrap();
        let sources: Vec<_> = [0.2, 0.4, 0.9, 0.1].map(|v| flat(1, 1, v)).into();

        multiframe.update(&mut device, &sources[0]).unwrap();
        multiframe.update(&mut device, &sources[1]).unwrap();
        assert!(multiframe.update(&mut device, &sources[2]).is_err());
        assert_eq!(multiframe.sample_index(), 2);

        assert!(multiframe.update(&mut device, &sources[2]).unwrap());
        assert!(!multiframe.update(&mut device, &sources[3]).unwrap());

        let accumulated = multiframe.accumulator().unwrap().get(0, 0).x;
        assert_relative_eq!(accumulated, linear_mean(&sources), epsilon = 2e-3);
    }

    #[test]
    fn test_failed_present_does_not_blend_twice() {
        // the second draw presents the preview of sample 0
        let mut device = FailingDevice {
            inner: CpuDevice::default(),
            fail_at: 2,
            draws: 0,
        };
        let config = MultiframeConfig::new(SampleConfig::new(2)).with_seed(3);
        let mut multiframe = Multiframe::new(&device, config).unwrap();
        let sources: Vec<_> = [0.3, 0.7, 0.5, 0.6].map(|v| flat(1, 1, v)).into();

        assert!(multiframe.update(&mut device, &sources[0]).is_err());
        assert_eq!(multiframe.sample_index(), 1);

        for source in &sources[1..] {
            multiframe.update(&mut device, source).unwrap();
        }
        assert!(multiframe.is_converged());

        let accumulated = multiframe.accumulator().unwrap().get(0, 0).x;
        assert_relative_eq!(accumulated, linear_mean(&sources), epsilon = 2e-3);
    }

    #[test]
    fn test_apply_jitter_restores_camera() {
        let mut device = CpuDevice::default();
        let mut multiframe = engine(&device, 2);
        multiframe.update(&mut device, &flat(8, 8, 0.5)).unwrap();

        let base = Mat4::perspective_rh(1.0, 1.0, 0.1, 10.0);
        let mut camera = base;
        {
            let jittered = multiframe.apply_jitter(&mut camera);
            assert_ne!(*jittered, base);
        }
        assert_eq!(camera, base);
    }

    #[test]
    fn test_set_samples_resets() {
        let mut device = CpuDevice::default();
        let mut multiframe = engine(&device, 2);
        multiframe.update(&mut device, &flat(2, 2, 0.5)).unwrap();

        multiframe
            .set_samples(SampleConfig::new(4).with_sigma(1.0))
            .unwrap();
        assert_eq!(multiframe.sample_index(), 0);
        assert_eq!(multiframe.sample_count(), 16);
        assert_relative_eq!(multiframe.samples().texture_bias(), -2.0);
    }

    #[test]
    fn test_eight_bit_fallback() {
        let device = CpuDevice::new(DeviceCaps::NONE);
        let multiframe = engine(&device, 2);
        assert_eq!(multiframe.pixel_format(), PixelFormat::Rgba8Unorm);
    }
}
