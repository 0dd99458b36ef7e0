//! Sub-pixel sample planning
//!
//! A sample set is a `grid_size x grid_size` grid of offsets over the filter
//! footprint, each with a normalized filter weight. Sets are ordered
//! closest-first so that index 0 is always the least displaced sample; the
//! accumulator relies on that for its preview frame.

use glam::Vec2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::error::{MultiframeError, MultiframeResult};

/// One sub-pixel offset and its share of the final image
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Offset in pixels, within `[-filter_size / 2, filter_size / 2]` per axis
    pub offset: Vec2,
    /// Normalized weight; weights of a full set sum to 1
    pub weight: f32,
}

impl Sample {
    /// Distance of the offset from the pixel center
    pub fn distance(&self) -> f32 {
        self.offset.length()
    }
}

/// Sampling configuration
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    /// Square root of the number of samples: 5 gives 25 samples
    pub grid_size: u32,
    /// Randomize each sample within its grid cell
    pub jitter: bool,
    /// Size of the filter footprint, in pixels
    pub filter_size: f32,
    /// Gaussian sigma, or 0 for a box filter
    pub sigma: f32,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            grid_size: 5,
            jitter: false,
            filter_size: 2.0,
            sigma: 0.0,
        }
    }
}

impl SampleConfig {
    pub fn new(grid_size: u32) -> Self {
        Self {
            grid_size,
            ..Default::default()
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_filter_size(mut self, filter_size: f32) -> Self {
        self.filter_size = filter_size;
        self
    }

    pub fn with_sigma(mut self, sigma: f32) -> Self {
        self.sigma = sigma;
        self
    }

    /// Reject configurations that cannot produce a usable set
    pub fn validate(&self) -> MultiframeResult<()> {
        if self.grid_size == 0 {
            return Err(MultiframeError::InvalidGridSize);
        }
        if !self.filter_size.is_finite() || self.filter_size < 0.0 {
            return Err(MultiframeError::InvalidConfig(format!(
                "filter size must be finite and non-negative, got {}",
                self.filter_size
            )));
        }
        if !self.sigma.is_finite() {
            return Err(MultiframeError::InvalidConfig(format!(
                "sigma must be finite, got {}",
                self.sigma
            )));
        }
        Ok(())
    }

    /// Total number of samples the configuration produces
    pub fn sample_count(&self) -> usize {
        (self.grid_size as usize) * (self.grid_size as usize)
    }
}

/// An ordered, weighted set of sub-pixel samples
#[derive(Clone, Debug, PartialEq)]
pub struct SampleSet {
    samples: Vec<Sample>,
    texture_bias: f32,
    config: SampleConfig,
}

impl SampleSet {
    /// Generate the sample set for `config`, drawing jitter from `rng`
    pub fn generate<R: Rng + ?Sized>(config: SampleConfig, rng: &mut R) -> MultiframeResult<Self> {
        config.validate()?;

        let n = config.grid_size;
        let half_size = config.filter_size * 0.5;
        let kernel_size = (3.0 * config.sigma).ceil() + 1.0;
        let mut samples = Vec::with_capacity(config.sample_count());

        // jittered grid; a poisson pattern would cluster less
        for x in 0..n {
            for y in 0..n {
                let (sx, sy) = if config.jitter {
                    (
                        grid_coord(x as f32 + rng.gen::<f32>(), n as f32),
                        grid_coord(y as f32 + rng.gen::<f32>(), n as f32),
                    )
                } else if n == 1 {
                    (0.0, 0.0)
                } else {
                    (
                        grid_coord(x as f32, (n - 1) as f32),
                        grid_coord(y as f32, (n - 1) as f32),
                    )
                };

                let weight = if config.sigma <= 0.0 {
                    1.0
                } else {
                    gauss(sx * kernel_size, config.sigma) * gauss(sy * kernel_size, config.sigma)
                };

                samples.push(Sample {
                    offset: Vec2::new(sx * half_size, sy * half_size),
                    weight,
                });
            }
        }

        normalize_weights(&mut samples);

        // closest sample first; stable so ties keep grid order
        samples.sort_by(|a, b| a.distance().total_cmp(&b.distance()));

        let texture_bias = texture_bias(n);
        tracing::debug!(
            "Generated {} samples (jitter={}, filter={}, sigma={}, bias={:.3})",
            samples.len(),
            config.jitter,
            config.filter_size,
            config.sigma,
            texture_bias
        );

        Ok(Self {
            samples,
            texture_bias,
            config,
        })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mip bias to apply to texture lookups while jittering
    pub fn texture_bias(&self) -> f32 {
        self.texture_bias
    }

    pub fn config(&self) -> &SampleConfig {
        &self.config
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }
}

impl<'a> IntoIterator for &'a SampleSet {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Map a grid coordinate in `[0, extent]` to `[-1, 1]`
#[inline]
fn grid_coord(v: f32, extent: f32) -> f32 {
    v / extent * 2.0 - 1.0
}

/// 1D Gaussian density
pub fn gauss(x: f32, sigma: f32) -> f32 {
    (1.0 / ((2.0 * PI).sqrt() * sigma)) * (-(x * x) / (2.0 * sigma * sigma)).exp()
}

/// Mip bias for a grid of `grid_size x grid_size` samples
pub fn texture_bias(grid_size: u32) -> f32 {
    -(grid_size as f32).log2()
}

fn normalize_weights(samples: &mut [Sample]) {
    let total: f32 = samples.iter().map(|s| s.weight).sum();

    if total > 0.0 && total.is_finite() {
        for sample in samples.iter_mut() {
            sample.weight /= total;
        }
    } else {
        tracing::warn!("Sample weights vanished (total={}), using a box filter", total);
        let uniform = 1.0 / samples.len() as f32;
        for sample in samples.iter_mut() {
            sample.weight = uniform;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn generate(config: SampleConfig) -> SampleSet {
        let mut rng = StdRng::seed_from_u64(7);
        SampleSet::generate(config, &mut rng).unwrap()
    }

    #[test]
    fn test_weights_sum_to_one() {
        for grid_size in 1..=8 {
            for sigma in [0.0, 0.25, 0.5, 1.0, 2.5] {
                for jitter in [false, true] {
                    let config = SampleConfig::new(grid_size)
                        .with_sigma(sigma)
                        .with_jitter(jitter);
                    let set = generate(config);
                    let total: f32 = set.iter().map(|s| s.weight).sum();
                    assert_relative_eq!(total, 1.0, epsilon = 1e-5);
                    assert_eq!(set.len(), (grid_size * grid_size) as usize);
                }
            }
        }
    }

    #[test]
    fn test_closest_first_ordering() {
        for jitter in [false, true] {
            let set = generate(SampleConfig::new(6).with_jitter(jitter).with_sigma(0.8));
            for pair in set.samples().windows(2) {
                assert!(pair[0].distance() <= pair[1].distance());
            }
        }
    }

    #[test]
    fn test_box_filter_uniform_weights() {
        let set = generate(SampleConfig::new(4));
        for sample in &set {
            assert_relative_eq!(sample.weight, 1.0 / 16.0, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_odd_grid_starts_at_center() {
        let set = generate(SampleConfig::new(5));
        assert_eq!(set.samples()[0].offset, Vec2::ZERO);
    }

    #[test]
    fn test_single_sample_is_centered() {
        let set = generate(SampleConfig::new(1).with_sigma(1.0));
        assert_eq!(set.len(), 1);
        assert_eq!(set.samples()[0].offset, Vec2::ZERO);
        assert_relative_eq!(set.samples()[0].weight, 1.0);
        assert_relative_eq!(set.texture_bias(), 0.0);
    }

    #[test]
    fn test_offsets_within_half_filter_size() {
        let config = SampleConfig::new(5).with_filter_size(3.0).with_jitter(true);
        let set = generate(config);
        for sample in &set {
            assert!(sample.offset.x.abs() <= 1.5 + 1e-6);
            assert!(sample.offset.y.abs() <= 1.5 + 1e-6);
        }

        // non-jittered corners land exactly on the footprint edge
        let set = generate(config.with_jitter(false));
        let last = set.samples().last().unwrap();
        assert_relative_eq!(last.offset.x.abs(), 1.5, epsilon = 1e-6);
        assert_relative_eq!(last.offset.y.abs(), 1.5, epsilon = 1e-6);
    }

    #[test]
    fn test_gaussian_favours_center() {
        let set = generate(SampleConfig::new(5).with_sigma(1.0));
        let first = set.samples()[0].weight;
        let last = set.samples().last().unwrap().weight;
        assert!(first > last);
    }

    #[test]
    fn test_texture_bias() {
        assert_relative_eq!(texture_bias(4), -2.0);
        assert_relative_eq!(generate(SampleConfig::new(8)).texture_bias(), -3.0);
    }

    #[test]
    fn test_jitter_is_seeded() {
        let config = SampleConfig::new(3).with_jitter(true);
        let a = SampleSet::generate(config, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = SampleSet::generate(config, &mut StdRng::seed_from_u64(1)).unwrap();
        let c = SampleSet::generate(config, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_underflowing_weights_fall_back_to_box() {
        // every sample sits far outside a tiny kernel
        let set = generate(SampleConfig::new(2).with_sigma(0.01));
        for sample in &set {
            assert_relative_eq!(sample.weight, 0.25, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_invalid_configs() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            SampleSet::generate(SampleConfig::new(0), &mut rng),
            Err(MultiframeError::InvalidGridSize)
        ));
        assert!(matches!(
            SampleSet::generate(SampleConfig::new(2).with_filter_size(f32::NAN), &mut rng),
            Err(MultiframeError::InvalidConfig(_))
        ));
        assert!(matches!(
            SampleSet::generate(SampleConfig::new(2).with_sigma(f32::INFINITY), &mut rng),
            Err(MultiframeError::InvalidConfig(_))
        ));
    }
}
