//! Accumulator configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::MultiframeResult;
use crate::samples::SampleConfig;

/// Display gamma; accumulation happens in linear light
pub const DEFAULT_GAMMA: f32 = 2.2;

/// How the blend factor for each new sample is derived from its weight
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationWeighting {
    /// `alpha = w_i / (w_0 + .. + w_i)`: the accumulator always holds the
    /// normalized weighted mean of the samples seen so far
    #[default]
    RunningAverage,
    /// `alpha = w_i`: the raw normalized weight, as a fixed-function
    /// constant-alpha blend would apply it
    ConstantAlpha,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiframeConfig {
    pub samples: SampleConfig,
    pub gamma: f32,
    pub weighting: AccumulationWeighting,
    /// Seed for jittered sample sets; `None` draws from entropy
    pub seed: Option<u64>,
}

impl Default for MultiframeConfig {
    fn default() -> Self {
        Self {
            samples: SampleConfig::default(),
            gamma: DEFAULT_GAMMA,
            weighting: AccumulationWeighting::default(),
            seed: None,
        }
    }
}

impl MultiframeConfig {
    pub fn new(samples: SampleConfig) -> Self {
        Self {
            samples,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_weighting(mut self, weighting: AccumulationWeighting) -> Self {
        self.weighting = weighting;
        self
    }

    /// Load a configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> MultiframeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.samples.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MultiframeConfig =
            serde_json::from_str(r#"{ "samples": { "grid_size": 3, "jitter": true } }"#).unwrap();
        assert_eq!(config.samples.grid_size, 3);
        assert!(config.samples.jitter);
        assert_eq!(config.samples.filter_size, 2.0);
        assert_eq!(config.gamma, DEFAULT_GAMMA);
        assert_eq!(config.weighting, AccumulationWeighting::RunningAverage);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_weighting_names() {
        let config: MultiframeConfig =
            serde_json::from_str(r#"{ "weighting": "constant_alpha", "seed": 9 }"#).unwrap();
        assert_eq!(config.weighting, AccumulationWeighting::ConstantAlpha);
        assert_eq!(config.seed, Some(9));
    }
}
