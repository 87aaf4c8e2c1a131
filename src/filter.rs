// Band-pass filter - Butterworth cascade of second-order sections
//
// The band-pass is realised as an order-N Butterworth high-pass at `low`
// followed by an order-N Butterworth low-pass at `high`. Each edge becomes
// N/2 `biquad` sections with the Butterworth pole Qs, plus one first-order
// section when N is odd. Coefficients come from the bilinear transform with
// pre-warping at the cutoff.
//
// Sections run as `DirectForm2Transposed<f64>`, which stays stable for
// chunks of millions of samples. Every pass starts from the steady state of
// its first sample: the cascade filters `x - x[0]` from rest and adds the
// settled DC response `gain * x[0]` back. Zero-phase mode filters forward,
// then backward, after padding both ends with an odd reflection.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

use crate::config::FilterMode;
use crate::error::ConfigError;
use crate::source::Samples;

/// Second-order Butterworth stage from the `biquad` cookbook formulas
fn second_order(
    filter_type: Type<f64>,
    sample_rate: f64,
    cutoff: f64,
    q: f64,
) -> Result<Coefficients<f64>, ConfigError> {
    Coefficients::<f64>::from_params(filter_type, sample_rate.hz(), cutoff.hz(), q).map_err(|_| {
        ConfigError::parameter(
            "filter",
            format!("cannot design a section at {} Hz (q {})", cutoff, q),
        )
    })
}

/// First-order bilinear low-pass (`b2 = a2 = 0`)
fn lowpass_first_order(sample_rate: f64, cutoff: f64) -> Coefficients<f64> {
    let k = (std::f64::consts::PI * cutoff / sample_rate).tan();
    Coefficients {
        a1: (k - 1.0) / (k + 1.0),
        a2: 0.0,
        b0: k / (1.0 + k),
        b1: k / (1.0 + k),
        b2: 0.0,
    }
}

/// First-order bilinear high-pass (`b2 = a2 = 0`)
fn highpass_first_order(sample_rate: f64, cutoff: f64) -> Coefficients<f64> {
    let k = (std::f64::consts::PI * cutoff / sample_rate).tan();
    Coefficients {
        a1: (k - 1.0) / (k + 1.0),
        a2: 0.0,
        b0: 1.0 / (1.0 + k),
        b1: -1.0 / (1.0 + k),
        b2: 0.0,
    }
}

/// Gain of one section at 0 Hz
fn dc_gain(section: &Coefficients<f64>) -> f64 {
    (section.b0 + section.b1 + section.b2) / (1.0 + section.a1 + section.a2)
}

/// Butterworth pole quality factors for an order-`order` prototype
fn butterworth_qs(order: usize) -> Vec<f64> {
    (0..order / 2)
        .map(|k| {
            let angle = std::f64::consts::PI * (2 * k + 1) as f64 / (2 * order) as f64;
            1.0 / (2.0 * angle.sin())
        })
        .collect()
}

/// Validated band-pass filter definition
#[derive(Debug, Clone)]
pub struct FilterSpec {
    order: usize,
    sample_rate: f64,
    low: f64,
    high: f64,
    mode: FilterMode,
    sections: Vec<Coefficients<f64>>,
}

impl FilterSpec {
    /// Design a Butterworth band-pass
    ///
    /// # Arguments
    /// * `order` - Butterworth order of each band edge (1-12)
    /// * `sample_rate` - Sample rate in Hz
    /// * `low` - Lower band edge in Hz
    /// * `high` - Upper band edge in Hz
    ///
    /// # Returns
    /// * `Err(ConfigError::InvalidBand)` - Unless `0 < low < high < sample_rate / 2`
    pub fn design(order: usize, sample_rate: f64, low: f64, high: f64) -> Result<Self, ConfigError> {
        let nyquist = sample_rate / 2.0;
        let band_ok = low.is_finite() && high.is_finite() && 0.0 < low && low < high && high < nyquist;
        if !band_ok {
            return Err(ConfigError::InvalidBand { low, high, nyquist });
        }
        if order == 0 || order > 12 {
            return Err(ConfigError::parameter(
                "filter_butter_order",
                format!("must be in 1..=12 (got {})", order),
            ));
        }

        let mut sections = Vec::with_capacity(order + 1);
        let qs = butterworth_qs(order);
        for &q in &qs {
            sections.push(second_order(Type::HighPass, sample_rate, low, q)?);
        }
        if order % 2 == 1 {
            sections.push(highpass_first_order(sample_rate, low));
        }
        for &q in &qs {
            sections.push(second_order(Type::LowPass, sample_rate, high, q)?);
        }
        if order % 2 == 1 {
            sections.push(lowpass_first_order(sample_rate, high));
        }

        Ok(Self {
            order,
            sample_rate,
            low,
            high,
            mode: FilterMode::ZeroPhase,
            sections,
        })
    }

    /// Same filter with another application mode
    pub fn with_mode(mut self, mode: FilterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn band(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn sections(&self) -> &[Coefficients<f64>] {
        &self.sections
    }

    /// Odd-reflection padding used by zero-phase mode
    fn pad_len(&self) -> usize {
        3 * (2 * self.order + 1)
    }

    /// Filter every channel independently; output has the input's shape
    pub fn apply(&self, samples: &Samples) -> Samples {
        let mut out = Samples::zeros(samples.n_samples(), samples.n_channels());
        for c in 0..samples.n_channels() {
            let filtered = self.apply_channel(&samples.channel(c));
            out.set_channel(c, &filtered);
        }
        out
    }

    /// Filter one channel trace
    pub fn apply_channel(&self, trace: &[f32]) -> Vec<f32> {
        if trace.is_empty() {
            return Vec::new();
        }
        let signal: Vec<f64> = trace.iter().map(|&v| v as f64).collect();

        let filtered = match self.mode {
            FilterMode::Causal => {
                let mut signal = signal;
                self.run(&mut signal);
                signal
            }
            FilterMode::ZeroPhase => self.forward_backward(&signal),
        };

        filtered.into_iter().map(|v| v as f32).collect()
    }

    fn forward_backward(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        let pad = self.pad_len().min(n - 1);

        let first = signal[0];
        let last = signal[n - 1];
        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        extended.extend_from_slice(signal);
        extended.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        self.run(&mut extended);
        extended.reverse();
        self.run(&mut extended);
        extended.reverse();

        extended[pad..pad + n].to_vec()
    }

    /// Run the cascade in place, starting from the steady state of the first sample
    fn run(&self, signal: &mut [f64]) {
        let Some(&first) = signal.first() else {
            return;
        };

        let settled = first * self.sections.iter().map(dc_gain).product::<f64>();
        let mut cascade: Vec<DirectForm2Transposed<f64>> = self
            .sections
            .iter()
            .map(|&coefficients| DirectForm2Transposed::<f64>::new(coefficients))
            .collect();

        for sample in signal.iter_mut() {
            let mut x = *sample - first;
            for section in cascade.iter_mut() {
                x = section.run(x);
            }
            *sample = x + settled;
        }
    }
}

/// Apply `spec` to every channel of `samples`
pub fn apply(spec: &FilterSpec, samples: &Samples) -> Samples {
    spec.apply(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(sample_rate: f64, frequency: f64, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * frequency * i as f64 / sample_rate).sin() as f32)
            .collect()
    }

    fn peak(values: &[f32]) -> f32 {
        values.iter().fold(0.0f32, |acc, v| acc.max(v.abs()))
    }

    #[test]
    fn test_design_rejects_bad_bands() {
        for (low, high) in [(0.0, 6000.0), (6000.0, 500.0), (500.0, 10_000.0), (500.0, 500.0)] {
            assert!(
                matches!(
                    FilterSpec::design(3, 20_000.0, low, high),
                    Err(ConfigError::InvalidBand { .. })
                ),
                "band ({}, {}) should be rejected",
                low,
                high
            );
        }
        assert!(FilterSpec::design(0, 20_000.0, 500.0, 6000.0).is_err());
    }

    #[test]
    fn test_section_count_follows_order() {
        assert_eq!(FilterSpec::design(3, 20_000.0, 500.0, 6000.0).unwrap().sections().len(), 4);
        assert_eq!(FilterSpec::design(4, 20_000.0, 500.0, 6000.0).unwrap().sections().len(), 4);
        assert_eq!(FilterSpec::design(1, 20_000.0, 500.0, 6000.0).unwrap().sections().len(), 2);
    }

    #[test]
    fn test_band_edges_sit_at_half_power() {
        // Zero-phase squares the magnitude: -3 dB per pass gives 0.5 at each edge
        let spec = FilterSpec::design(3, 20_000.0, 500.0, 6000.0).unwrap();
        let edge = spec.apply_channel(&sine(20_000.0, 500.0, 4000));
        let edge_peak = peak(&edge[500..3500]);
        assert!((edge_peak - 0.5).abs() < 0.02, "low edge gain {}", edge_peak);

        let sections = spec.sections();
        assert!(dc_gain(&sections[0]).abs() < 1e-9);
        assert!((dc_gain(&sections[3]) - 1.0).abs() < 1e-9);
        assert_eq!(sections[1].b2, 0.0);
        assert_eq!(sections[3].a2, 0.0);
    }

    #[test]
    fn test_butterworth_qs() {
        let qs = butterworth_qs(4);
        assert!((qs[0] - 1.3066).abs() < 1e-3);
        assert!((qs[1] - 0.5412).abs() < 1e-3);
        assert!((butterworth_qs(3)[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_passband_preserved_stopband_rejected() {
        let spec = FilterSpec::design(3, 20_000.0, 500.0, 6000.0).unwrap();

        let pass = spec.apply_channel(&sine(20_000.0, 2000.0, 4000));
        let pass_peak = peak(&pass[500..3500]);
        assert!((pass_peak - 1.0).abs() < 0.05, "passband peak {}", pass_peak);

        let low = spec.apply_channel(&sine(20_000.0, 20.0, 4000));
        assert!(peak(&low[500..3500]) < 0.01);

        let high = spec.apply_channel(&sine(20_000.0, 9500.0, 4000));
        assert!(peak(&high[500..3500]) < 0.05);
    }

    #[test]
    fn test_dc_offset_removed() {
        let spec = FilterSpec::design(3, 20_000.0, 500.0, 6000.0).unwrap();
        let filtered = spec.apply_channel(&vec![123.0; 2000]);
        assert!(peak(&filtered) < 1e-3);
    }

    #[test]
    fn test_zero_phase_keeps_pulse_centre() {
        let spec = FilterSpec::design(3, 20_000.0, 500.0, 6000.0).unwrap();
        let pulse: Vec<f32> = (0..2000)
            .map(|i| {
                let d = (i as f32 - 1000.0) / 2.0;
                -10.0 * (-0.5 * d * d).exp()
            })
            .collect();
        let filtered = spec.apply_channel(&pulse);
        let argmin = filtered
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(argmin, 1000);
        assert!((filtered[990] - filtered[1010]).abs() < 1e-3);
    }

    #[test]
    fn test_causal_mode_delays_pulse() {
        let spec = FilterSpec::design(3, 20_000.0, 500.0, 6000.0)
            .unwrap()
            .with_mode(FilterMode::Causal);
        let mut impulse = vec![0.0f32; 500];
        impulse[100] = 1.0;
        let filtered = spec.apply_channel(&impulse);
        assert!(filtered[..100].iter().all(|v| v.abs() < 1e-9));
        assert!(peak(&filtered[100..]) > 0.0);
    }

    #[test]
    fn test_apply_preserves_shape() {
        let spec = FilterSpec::design(2, 20_000.0, 300.0, 5000.0).unwrap();
        let samples = Samples::from_channels(&[sine(20_000.0, 1000.0, 300), sine(20_000.0, 3000.0, 300)]);
        let filtered = apply(&spec, &samples);
        assert_eq!(filtered.n_samples(), 300);
        assert_eq!(filtered.n_channels(), 2);
    }

    #[test]
    fn test_long_signal_stays_finite() {
        let spec = FilterSpec::design(3, 20_000.0, 500.0, 6000.0).unwrap();
        let signal: Vec<f32> = (0..1_000_000i64)
            .map(|i| ((i * 7919) % 1000) as f32 / 500.0 - 1.0)
            .collect();
        let filtered = spec.apply_channel(&signal);
        assert_eq!(filtered.len(), signal.len());
        assert!(filtered.iter().all(|v| v.is_finite()));
        assert!(peak(&filtered) < 10.0);
    }

    #[test]
    fn test_tiny_inputs() {
        let spec = FilterSpec::design(3, 20_000.0, 500.0, 6000.0).unwrap();
        assert!(spec.apply_channel(&[]).is_empty());
        assert_eq!(spec.apply_channel(&[5.0]).len(), 1);
    }
}
