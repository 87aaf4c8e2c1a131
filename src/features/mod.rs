// Features module - principal-component projection of spike waveforms
//
// Two-phase protocol, modelled as an explicit state machine:
//
//   Uninitialized --begin_fit--> Fitting --finish_fit--> Ready
//
// While fitting, extracted spikes are offered to a bounded sampler that
// keeps an evenly time-spaced subset. `finish_fit` computes the top-K
// principal directions of the per-channel waveform covariance. The basis is
// shared by all channels and never changes afterwards; a spike's feature
// vector is channels x K values, channel-major.

pub mod linalg;
mod sampler;

pub use sampler::WaveformSampler;

use serde::Serialize;

use crate::config::DetektConfig;
use crate::error::DetectionError;
use crate::extraction::Spike;
use crate::source::Samples;

/// Waveform retained for fitting
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformSample {
    pub waveform: Samples,
    pub mask: Vec<f32>,
}

impl From<&Spike> for WaveformSample {
    fn from(spike: &Spike) -> Self {
        Self {
            waveform: spike.waveform.clone(),
            mask: spike.mask.clone(),
        }
    }
}

/// Fixed orthonormal projection directions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureBasis {
    /// K unit vectors of length `window`
    pub directions: Vec<Vec<f64>>,
    /// Covariance eigenvalue of each direction
    pub eigenvalues: Vec<f64>,
    /// Multiply each channel's features by its mask weight
    pub masked: bool,
}

impl FeatureBasis {
    pub fn dimensionality(&self) -> usize {
        self.directions.len()
    }

    pub fn window(&self) -> usize {
        self.directions.first().map(|d| d.len()).unwrap_or(0)
    }

    /// Project a waveform onto the basis
    ///
    /// # Arguments
    /// * `waveform` - `window` rows x channels
    /// * `mask` - Channel weights, applied only when the basis is masked
    ///
    /// # Returns
    /// Feature vector of channels x K values, channel-major. Values are raw
    /// dot products; nothing is centred or renormalised.
    pub fn project(&self, waveform: &Samples, mask: &[f32]) -> Vec<f32> {
        let n_channels = waveform.n_channels();
        let rows = waveform.n_samples().min(self.window());
        let mut features = Vec::with_capacity(n_channels * self.dimensionality());
        for c in 0..n_channels {
            let weight = if self.masked {
                mask.get(c).copied().unwrap_or(0.0) as f64
            } else {
                1.0
            };
            for direction in &self.directions {
                let dot: f64 = (0..rows)
                    .map(|i| waveform.get(i, c) as f64 * direction[i])
                    .sum();
                features.push((dot * weight) as f32);
            }
        }
        features
    }
}

/// Fit a basis of `dimensionality` directions from sampled waveforms
///
/// Only channels with a positive mask weight contribute to the covariance,
/// so noise channels do not dilute the spike shape.
///
/// # Returns
/// * `Err(DetectionError::InsufficientWaveforms)` - Empty sample
/// * `Err(DetectionError::ConvergenceFailed)` - Eigen-decomposition failed
pub fn fit(
    samples: &[WaveformSample],
    dimensionality: usize,
    masked: bool,
) -> Result<FeatureBasis, DetectionError> {
    let Some(first) = samples.first() else {
        return Err(DetectionError::InsufficientWaveforms {
            required: 1,
            collected: 0,
        });
    };
    let window = first.waveform.n_samples();

    let mut columns: Vec<Vec<f64>> = Vec::new();
    for sample in samples {
        for c in 0..sample.waveform.n_channels() {
            if sample.mask.get(c).copied().unwrap_or(0.0) > 0.0 {
                columns.push(sample.waveform.channel(c).iter().map(|&v| v as f64).collect());
            }
        }
    }
    if columns.is_empty() {
        // no channel carried signal; fall back to every channel
        for sample in samples {
            for c in 0..sample.waveform.n_channels() {
                columns.push(sample.waveform.channel(c).iter().map(|&v| v as f64).collect());
            }
        }
    }

    let m = columns.len() as f64;
    let mut mean = vec![0.0; window];
    for column in &columns {
        for (acc, v) in mean.iter_mut().zip(column) {
            *acc += v / m;
        }
    }

    let mut covariance = vec![0.0; window * window];
    for column in &columns {
        for i in 0..window {
            let di = column[i] - mean[i];
            for j in i..window {
                covariance[i * window + j] += di * (column[j] - mean[j]);
            }
        }
    }
    let denominator = (m - 1.0).max(1.0);
    for i in 0..window {
        for j in i..window {
            let value = covariance[i * window + j] / denominator;
            covariance[i * window + j] = value;
            covariance[j * window + i] = value;
        }
    }

    let eig = linalg::eigen_symmetric(&covariance, window)?;
    let k = dimensionality.min(window);
    let mut directions: Vec<Vec<f64>> = eig.eigenvectors.into_iter().take(k).collect();
    linalg::orthonormalize(&mut directions);

    tracing::info!(
        "[Features] Fit {} directions from {} waveforms ({} channel traces), eigenvalues {:?}",
        k,
        samples.len(),
        columns.len(),
        &eig.eigenvalues[..k]
    );

    Ok(FeatureBasis {
        directions,
        eigenvalues: eig.eigenvalues[..k].to_vec(),
        masked,
    })
}

/// Project a waveform with `basis`
pub fn project(basis: &FeatureBasis, waveform: &Samples, mask: &[f32]) -> Vec<f32> {
    basis.project(waveform, mask)
}

#[derive(Debug)]
enum Phase {
    Uninitialized,
    Fitting(WaveformSampler<WaveformSample>),
    Ready(FeatureBasis),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Fitting(_) => "fitting",
            Phase::Ready(_) => "ready",
        }
    }
}

/// Fit-then-project protocol around `FeatureBasis`
#[derive(Debug)]
pub struct FeatureExtractor {
    phase: Phase,
    dimensionality: usize,
    sample_count: usize,
    masked: bool,
}

impl FeatureExtractor {
    pub fn new(dimensionality: usize, sample_count: usize, masked: bool) -> Self {
        Self {
            phase: Phase::Uninitialized,
            dimensionality,
            sample_count,
            masked,
        }
    }

    pub fn from_config(config: &DetektConfig) -> Self {
        Self::new(
            config.feature_dimensionality,
            config.waveform_sample_count,
            config.mask_features,
        )
    }

    /// Extractor that is already `Ready` with a previously fit basis
    pub fn with_basis(basis: FeatureBasis) -> Self {
        Self {
            dimensionality: basis.dimensionality(),
            sample_count: 0,
            masked: basis.masked,
            phase: Phase::Ready(basis),
        }
    }

    pub fn phase_name(&self) -> &'static str {
        self.phase.name()
    }

    pub fn basis(&self) -> Option<&FeatureBasis> {
        match &self.phase {
            Phase::Ready(basis) => Some(basis),
            _ => None,
        }
    }

    /// Start collecting waveforms
    pub fn begin_fit(&mut self) -> Result<(), DetectionError> {
        match self.phase {
            Phase::Uninitialized => {
                self.phase = Phase::Fitting(WaveformSampler::new(self.sample_count));
                Ok(())
            }
            ref other => Err(DetectionError::InvalidPhase {
                operation: "begin_fit",
                phase: other.name(),
            }),
        }
    }

    /// Offer one extracted spike to the fitting sample
    pub fn offer(&mut self, spike: &Spike) -> Result<(), DetectionError> {
        match &mut self.phase {
            Phase::Fitting(sampler) => {
                sampler.offer(WaveformSample::from(spike));
                Ok(())
            }
            other => Err(DetectionError::InvalidPhase {
                operation: "offer",
                phase: other.name(),
            }),
        }
    }

    /// Fit the basis from the collected sample and move to `Ready`
    ///
    /// On failure the extractor returns to `Uninitialized`.
    pub fn finish_fit(&mut self) -> Result<&FeatureBasis, DetectionError> {
        let sampler = match std::mem::replace(&mut self.phase, Phase::Uninitialized) {
            Phase::Fitting(sampler) => sampler,
            other => {
                let phase = other.name();
                self.phase = other;
                return Err(DetectionError::InvalidPhase {
                    operation: "finish_fit",
                    phase,
                });
            }
        };

        let offered = sampler.offered();
        let sample = sampler.finish();
        tracing::debug!(
            "[Features] Fitting on {} of {} offered waveforms",
            sample.len(),
            offered
        );
        let basis = fit(&sample, self.dimensionality, self.masked)?;
        self.phase = Phase::Ready(basis);
        match &self.phase {
            Phase::Ready(basis) => Ok(basis),
            _ => Err(DetectionError::BasisNotFit),
        }
    }

    /// Feature vector of one spike
    ///
    /// # Returns
    /// * `Err(DetectionError::BasisNotFit)` - Called before `finish_fit` succeeded
    pub fn project(&self, spike: &Spike) -> Result<Vec<f32>, DetectionError> {
        match &self.phase {
            Phase::Ready(basis) => Ok(basis.project(&spike.waveform, &spike.mask)),
            _ => Err(DetectionError::BasisNotFit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn assert_orthonormal(basis: &FeatureBasis) {
        for (i, a) in basis.directions.iter().enumerate() {
            for (j, b) in basis.directions.iter().enumerate() {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-9, "<{}, {}> = {}", i, j, dot);
            }
        }
    }

    fn random_samples(seed: u64, count: usize, window: usize, channels: usize) -> Vec<WaveformSample> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let data = (0..window * channels).map(|_| rng.gen_range(-1.0..1.0)).collect();
                WaveformSample {
                    waveform: Samples::from_interleaved(channels, data),
                    mask: vec![1.0; channels],
                }
            })
            .collect()
    }

    fn spike_with(waveform: Samples, mask: Vec<f32>) -> Spike {
        let n_channels = waveform.n_channels();
        Spike {
            start: 0,
            end: 0,
            peak_time: 0.0,
            peak_channel: 0,
            channel_peak_times: vec![None; n_channels],
            waveform,
            mask,
            peak_values: vec![0.0; n_channels],
        }
    }

    #[test]
    fn test_basis_orthonormal_random() {
        for seed in 0..5 {
            let basis = fit(&random_samples(seed, 200, 16, 3), 4, false).unwrap();
            assert_eq!(basis.dimensionality(), 4);
            assert_eq!(basis.window(), 16);
            assert_orthonormal(&basis);
            assert!(basis.eigenvalues.windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn test_basis_orthonormal_degenerate() {
        // identical waveforms: zero covariance
        let waveform = Samples::from_interleaved(1, (0..8).map(|i| i as f32).collect());
        let samples = vec![
            WaveformSample {
                waveform,
                mask: vec![1.0],
            };
            10
        ];
        let basis = fit(&samples, 3, false).unwrap();
        assert_orthonormal(&basis);

        // single waveform
        let basis = fit(&random_samples(9, 1, 8, 2), 3, false).unwrap();
        assert_orthonormal(&basis);
    }

    #[test]
    fn test_first_direction_follows_dominant_shape() {
        let mut rng = StdRng::seed_from_u64(3);
        let shape: Vec<f32> = (0..10).map(|i| if i == 5 { 1.0 } else { 0.0 }).collect();
        let samples: Vec<WaveformSample> = (0..300)
            .map(|_| {
                let a: f32 = rng.gen_range(-10.0..10.0);
                let data = shape
                    .iter()
                    .map(|s| a * s + rng.gen_range(-0.1..0.1))
                    .collect();
                WaveformSample {
                    waveform: Samples::from_interleaved(1, data),
                    mask: vec![1.0],
                }
            })
            .collect();
        let basis = fit(&samples, 2, false).unwrap();
        assert!(basis.directions[0][5].abs() > 0.99);
    }

    #[test]
    fn test_projection_is_raw_dot_product() {
        let basis = FeatureBasis {
            directions: vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            eigenvalues: vec![2.0, 1.0],
            masked: false,
        };
        let waveform = Samples::from_channels(&[vec![3.0, 4.0, 5.0], vec![-1.0, -2.0, -3.0]]);
        assert_eq!(basis.project(&waveform, &[0.5, 0.0]), vec![3.0, 4.0, -1.0, -2.0]);

        let masked = FeatureBasis {
            masked: true,
            ..basis
        };
        assert_eq!(project(&masked, &waveform, &[0.5, 0.0]), vec![1.5, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_project_before_fit() {
        let extractor = FeatureExtractor::new(3, 100, false);
        let spike = spike_with(Samples::zeros(8, 2), vec![1.0, 0.0]);
        assert_eq!(extractor.project(&spike), Err(DetectionError::BasisNotFit));
    }

    #[test]
    fn test_state_machine() {
        let mut extractor = FeatureExtractor::new(2, 100, false);
        assert_eq!(extractor.phase_name(), "uninitialized");
        let spike = spike_with(Samples::zeros(8, 2), vec![1.0, 0.0]);
        assert!(matches!(
            extractor.offer(&spike),
            Err(DetectionError::InvalidPhase { .. })
        ));
        assert!(matches!(
            extractor.finish_fit(),
            Err(DetectionError::InvalidPhase { .. })
        ));

        extractor.begin_fit().unwrap();
        assert!(extractor.begin_fit().is_err());
        for sample in random_samples(1, 50, 8, 2) {
            extractor.offer(&spike_with(sample.waveform, sample.mask)).unwrap();
        }
        extractor.finish_fit().unwrap();
        assert_eq!(extractor.phase_name(), "ready");

        let features = extractor.project(&spike).unwrap();
        assert_eq!(features.len(), 2 * 2);
        assert!(extractor.offer(&spike).is_err());
    }

    #[test]
    fn test_finish_fit_without_waveforms() {
        let mut extractor = FeatureExtractor::new(2, 100, false);
        extractor.begin_fit().unwrap();
        assert_eq!(
            extractor.finish_fit().err(),
            Some(DetectionError::InsufficientWaveforms {
                required: 1,
                collected: 0
            })
        );
        assert_eq!(extractor.phase_name(), "uninitialized");
    }
}
