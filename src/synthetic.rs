//! Deterministic synthetic recordings
//!
//! Gaussian background noise from a seeded `StdRng`, negative Gaussian
//! spike waveforms at known times, optional oscillating artifacts and
//! corrupt (NaN) spans. Used by the tests and by `spikedetekt_cli synth`.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::source::{ArraySource, Samples};

/// Default RNG seed
pub const DEFAULT_SEED: u64 = 0x5D_E7E4;

/// One injected spike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectedSpike {
    /// Peak time in samples
    pub time: f64,
    /// Peak depth per channel (positive numbers, the waveform is negative)
    pub amplitudes: Vec<f32>,
}

/// Sustained artifact spanning many samples
///
/// A quarter-sample-rate oscillation; neighbouring channels run in
/// antiphase so the negative half-cycles of one channel bridge the gaps of
/// the next and the whole burst forms a single connected region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseBurst {
    pub start: u64,
    pub len: u64,
    pub amplitude: f32,
    pub channels: Vec<usize>,
}

/// Everything injected into a synthetic recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub sample_rate: f64,
    pub n_channels: usize,
    pub n_samples: u64,
    pub noise_std: f32,
    pub spike_width: f64,
    pub spikes: Vec<InjectedSpike>,
    pub bursts: Vec<NoiseBurst>,
    /// `(start, len)` ranges filled with NaN
    pub corrupt: Vec<(u64, u64)>,
}

/// Built recording plus its ground truth
#[derive(Debug, Clone)]
pub struct Synthetic {
    pub source: ArraySource,
    pub truth: GroundTruth,
}

/// Builder for synthetic recordings
#[derive(Debug, Clone)]
pub struct SyntheticRecording {
    truth: GroundTruth,
    seed: u64,
}

impl SyntheticRecording {
    pub fn new(n_channels: usize, n_samples: u64, sample_rate: f64) -> Self {
        Self {
            truth: GroundTruth {
                sample_rate,
                n_channels,
                n_samples,
                noise_std: 1.0,
                spike_width: 2.0,
                spikes: Vec::new(),
                bursts: Vec::new(),
                corrupt: Vec::new(),
            },
            seed: DEFAULT_SEED,
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Standard deviation of the background noise
    pub fn noise_std(mut self, noise_std: f32) -> Self {
        self.truth.noise_std = noise_std;
        self
    }

    /// Gaussian sigma of the spike waveform in samples
    pub fn spike_width(mut self, sigma: f64) -> Self {
        self.truth.spike_width = sigma;
        self
    }

    /// Inject a spike peaking at `time` with per-channel depth `amplitudes`
    pub fn spike(mut self, time: u64, amplitudes: Vec<f32>) -> Self {
        self.truth.spikes.push(InjectedSpike {
            time: time as f64,
            amplitudes,
        });
        self
    }

    pub fn noise_burst(mut self, start: u64, len: u64, amplitude: f32, channels: Vec<usize>) -> Self {
        self.truth.bursts.push(NoiseBurst {
            start,
            len,
            amplitude,
            channels,
        });
        self
    }

    /// Fill `[start, start + len)` with NaN on every channel
    pub fn corrupt(mut self, start: u64, len: u64) -> Self {
        self.truth.corrupt.push((start, len));
        self
    }

    pub fn build(self) -> Synthetic {
        let truth = self.truth;
        let n = truth.n_samples as usize;
        let n_channels = truth.n_channels.max(1);
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut samples = Samples::zeros(n, n_channels);
        if truth.noise_std > 0.0 {
            for t in 0..n {
                for c in 0..n_channels {
                    samples.set(t, c, truth.noise_std * gaussian(&mut rng));
                }
            }
        }

        let reach = (6.0 * truth.spike_width).ceil() as i64;
        for spike in &truth.spikes {
            let centre = spike.time.round() as i64;
            for t in (centre - reach).max(0)..(centre + reach + 1).min(n as i64) {
                let d = (t as f64 - spike.time) / truth.spike_width;
                let shape = (-0.5 * d * d).exp() as f32;
                for (c, &amplitude) in spike.amplitudes.iter().enumerate().take(n_channels) {
                    let value = samples.get(t as usize, c) - amplitude * shape;
                    samples.set(t as usize, c, value);
                }
            }
        }

        for burst in &truth.bursts {
            let end = (burst.start + burst.len).min(truth.n_samples);
            for t in burst.start..end {
                let phase = std::f32::consts::FRAC_PI_2 * t as f32 + std::f32::consts::FRAC_PI_4;
                for &c in burst.channels.iter().filter(|&&c| c < n_channels) {
                    let sign = if c % 2 == 0 { 1.0 } else { -1.0 };
                    let value = samples.get(t as usize, c) + sign * burst.amplitude * phase.sin();
                    samples.set(t as usize, c, value);
                }
            }
        }

        for &(start, len) in &truth.corrupt {
            for t in start..(start + len).min(truth.n_samples) {
                for c in 0..n_channels {
                    samples.set(t as usize, c, f32::NAN);
                }
            }
        }

        Synthetic {
            source: ArraySource::new(samples, truth.sample_rate),
            truth,
        }
    }
}

/// Standard normal sample (Box-Muller)
pub fn gaussian<R: Rng>(rng: &mut R) -> f32 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ChunkSource;

    #[test]
    fn test_same_seed_same_recording() {
        let a = SyntheticRecording::new(2, 1000, 20_000.0).seed(5).build();
        let b = SyntheticRecording::new(2, 1000, 20_000.0).seed(5).build();
        let c = SyntheticRecording::new(2, 1000, 20_000.0).seed(6).build();
        assert_eq!(a.source.samples(), b.source.samples());
        assert_ne!(a.source.samples(), c.source.samples());
    }

    #[test]
    fn test_spike_shape() {
        let synthetic = SyntheticRecording::new(2, 200, 20_000.0)
            .noise_std(0.0)
            .spike(100, vec![40.0, 10.0])
            .build();
        let samples = synthetic.source.samples();
        assert_eq!(samples.get(100, 0), -40.0);
        assert_eq!(samples.get(100, 1), -10.0);
        assert!(samples.get(102, 0) > -40.0 && samples.get(102, 0) < 0.0);
        assert_eq!(samples.get(10, 0), 0.0);
        assert_eq!(synthetic.truth.spikes.len(), 1);
    }

    #[test]
    fn test_noise_level() {
        let synthetic = SyntheticRecording::new(1, 20_000, 20_000.0).noise_std(2.0).build();
        let trace = synthetic.source.samples().channel(0);
        let mean = trace.iter().map(|&v| v as f64).sum::<f64>() / trace.len() as f64;
        let var = trace.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / trace.len() as f64;
        assert!(mean.abs() < 0.1);
        assert!((var.sqrt() - 2.0).abs() < 0.1);
    }

    #[test]
    fn test_corrupt_span() {
        let mut synthetic = SyntheticRecording::new(2, 100, 20_000.0).corrupt(10, 5).build();
        let block = synthetic.source.read(0, 100).unwrap();
        assert_eq!(block.first_non_finite(), Some((10, 0)));
        assert!(block.get(14, 1).is_nan());
        assert!(block.get(15, 1).is_finite());
    }

    #[test]
    fn test_ground_truth_serializes() {
        let synthetic = SyntheticRecording::new(2, 100, 20_000.0)
            .spike(50, vec![1.0, 2.0])
            .noise_burst(10, 20, 5.0, vec![0, 1])
            .build();
        let json = serde_json::to_string(&synthetic.truth).unwrap();
        let parsed: GroundTruth = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, synthetic.truth);
    }
}
