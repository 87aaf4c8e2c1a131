// Threshold - strong/weak detection levels derived from the noise scale
//
// Thresholds live on the polarity-adjusted axis (larger = more spike-like),
// so the same comparison works for negative, positive and bipolar spikes.

use serde::{Deserialize, Serialize};

use super::stats::robust_scale;
use crate::config::{DetektConfig, ThresholdScope};
use crate::error::ConfigError;
use crate::source::Samples;

/// Per-channel detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Seed level: a component needs one pixel above it
    pub strong: Vec<f32>,
    /// Growth level: pixels above it join components
    pub weak: Vec<f32>,
    /// Noise scale each pair was derived from
    pub scale: Vec<f32>,
}

impl Threshold {
    /// Same thresholds on every channel
    pub fn uniform(n_channels: usize, strong: f32, weak: f32) -> Self {
        Self {
            strong: vec![strong; n_channels],
            weak: vec![weak; n_channels],
            scale: vec![1.0; n_channels],
        }
    }

    pub fn n_channels(&self) -> usize {
        self.strong.len()
    }

    #[inline]
    pub fn strong(&self, channel: usize) -> f32 {
        self.strong[channel]
    }

    #[inline]
    pub fn weak(&self, channel: usize) -> f32 {
        self.weak[channel]
    }
}

/// Derives thresholds from filtered excerpts
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdEstimator {
    pub strong_multiplier: f64,
    pub weak_multiplier: f64,
    pub min_scale: f64,
    pub scope: ThresholdScope,
}

impl ThresholdEstimator {
    /// Per-channel estimator with the given multipliers
    ///
    /// # Returns
    /// * `Err(ConfigError::InvalidThreshold)` - If `weak_multiplier > strong_multiplier`
    pub fn new(strong_multiplier: f64, weak_multiplier: f64) -> Result<Self, ConfigError> {
        if weak_multiplier > strong_multiplier {
            return Err(ConfigError::InvalidThreshold {
                strong: strong_multiplier,
                weak: weak_multiplier,
            });
        }
        Ok(Self {
            strong_multiplier,
            weak_multiplier,
            min_scale: 1e-6,
            scope: ThresholdScope::PerChannel,
        })
    }

    pub fn from_config(config: &DetektConfig) -> Result<Self, ConfigError> {
        let mut estimator = Self::new(
            config.threshold_strong_multiplier,
            config.threshold_weak_multiplier,
        )?;
        estimator.min_scale = config.threshold_min_scale;
        estimator.scope = config.threshold_scope;
        Ok(estimator)
    }

    /// Estimate thresholds from the concatenation of filtered excerpts
    ///
    /// # Arguments
    /// * `excerpts` - Filtered excerpts, all with the same channel count
    ///
    /// # Returns
    /// * `Ok(Threshold)` - One strong/weak pair per channel
    /// * `Err(ConfigError)` - Inverted multipliers or no excerpt data
    pub fn estimate(&self, excerpts: &[Samples]) -> Result<Threshold, ConfigError> {
        if self.weak_multiplier > self.strong_multiplier {
            return Err(ConfigError::InvalidThreshold {
                strong: self.strong_multiplier,
                weak: self.weak_multiplier,
            });
        }

        let n_channels = excerpts.first().map(|e| e.n_channels()).unwrap_or(0);
        let total: usize = excerpts.iter().map(|e| e.n_samples()).sum();
        if n_channels == 0 || total == 0 {
            return Err(ConfigError::parameter(
                "nexcerpts",
                "no excerpt samples available for threshold calibration",
            ));
        }

        let scales: Vec<f64> = match self.scope {
            ThresholdScope::PerChannel => (0..n_channels)
                .map(|c| {
                    let trace: Vec<f32> = excerpts.iter().flat_map(|e| e.channel(c)).collect();
                    self.floor_scale(robust_scale(&trace), Some(c))
                })
                .collect(),
            ThresholdScope::Global => {
                let pooled: Vec<f32> = excerpts
                    .iter()
                    .flat_map(|e| e.as_interleaved().iter().copied())
                    .collect();
                vec![self.floor_scale(robust_scale(&pooled), None); n_channels]
            }
        };

        let threshold = Threshold {
            strong: scales
                .iter()
                .map(|s| (s * self.strong_multiplier) as f32)
                .collect(),
            weak: scales
                .iter()
                .map(|s| (s * self.weak_multiplier) as f32)
                .collect(),
            scale: scales.iter().map(|&s| s as f32).collect(),
        };

        tracing::info!(
            "[Calibration] Thresholds from {} excerpts ({} samples): strong={:?} weak={:?}",
            excerpts.len(),
            total,
            threshold.strong,
            threshold.weak
        );
        Ok(threshold)
    }

    /// Silent channels fall back to `min_scale`
    fn floor_scale(&self, scale: Option<f64>, channel: Option<usize>) -> f64 {
        match scale {
            Some(s) if s > self.min_scale && s.is_finite() => s,
            _ => {
                tracing::debug!(
                    "[Calibration] Noise scale {:?} on channel {:?} below minimum, using {}",
                    scale,
                    channel,
                    self.min_scale
                );
                self.min_scale
            }
        }
    }
}

/// Estimate per-channel thresholds from filtered excerpts
pub fn estimate(
    excerpts: &[Samples],
    strong_multiplier: f64,
    weak_multiplier: f64,
) -> Result<Threshold, ConfigError> {
    ThresholdEstimator::new(strong_multiplier, weak_multiplier)?.estimate(excerpts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_excerpt(n: usize, amplitude: f32) -> Samples {
        let trace: Vec<f32> = (0..n).map(|i| ((i % 5) as f32 - 2.0) * amplitude).collect();
        Samples::from_channels(&[trace.clone(), vec![0.0; n], trace])
    }

    #[test]
    fn test_scale_and_multipliers() {
        let threshold = estimate(&[ramp_excerpt(1000, 1.0)], 4.5, 2.0).unwrap();
        // |x - 0| takes values {0, 1, 2}; median 1
        let expected = 1.0 / 0.6745;
        assert!((threshold.scale[0] as f64 - expected).abs() < 1e-4);
        assert!((threshold.strong(0) as f64 - 4.5 * expected).abs() < 1e-3);
        assert!((threshold.weak(0) as f64 - 2.0 * expected).abs() < 1e-3);
        assert!(threshold.weak(2) <= threshold.strong(2));
    }

    #[test]
    fn test_silent_channel_uses_min_scale() {
        let mut estimator = ThresholdEstimator::new(4.5, 2.0).unwrap();
        estimator.min_scale = 0.25;
        let threshold = estimator.estimate(&[ramp_excerpt(500, 1.0)]).unwrap();
        assert_eq!(threshold.scale[1], 0.25);
        assert!(threshold.strong(1).is_finite());
        assert!(threshold.strong(1) > 0.0);
    }

    #[test]
    fn test_inverted_multipliers_rejected() {
        assert!(matches!(
            estimate(&[ramp_excerpt(10, 1.0)], 2.0, 3.0),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_global_scope_pools_channels() {
        let mut estimator = ThresholdEstimator::new(4.0, 2.0).unwrap();
        estimator.scope = ThresholdScope::Global;
        let threshold = estimator.estimate(&[ramp_excerpt(1000, 1.0)]).unwrap();
        assert_eq!(threshold.scale[0], threshold.scale[1]);
        assert_eq!(threshold.strong[0], threshold.strong[2]);
    }

    #[test]
    fn test_excerpts_are_concatenated() {
        let quiet = ramp_excerpt(1000, 1.0);
        let loud = ramp_excerpt(1000, 3.0);
        let both = estimate(&[quiet.clone(), loud], 4.0, 2.0).unwrap();
        let alone = estimate(&[quiet], 4.0, 2.0).unwrap();
        assert!(both.scale[0] > alone.scale[0]);
    }

    #[test]
    fn test_empty_excerpts_rejected() {
        assert!(estimate(&[], 4.0, 2.0).is_err());
    }
}
