// Extraction module - aligned waveforms, peak times and channel masks
//
// For every channel a component touches, the extremum pixel is refined to a
// sub-sample peak time from the crossings of the alignment threshold on both
// sides. The channel with the largest amplitude relative to its weak
// threshold defines the spike time, and a fixed window of samples centred on
// that time is interpolated from every channel.

mod view;

pub use view::{ChunkView, Segment};

use serde::Serialize;

use crate::calibration::Threshold;
use crate::config::{AlignmentBound, DetektConfig, Polarity, WaveformSource};
use crate::detection::Component;
use crate::error::{DetectionError, WindowEdge};
use crate::source::Samples;

/// One detected and aligned spike
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spike {
    /// First sample of the component
    pub start: u64,
    /// Last sample of the component
    pub end: u64,
    /// Absolute sub-sample peak time
    pub peak_time: f64,
    /// Channel that defined `peak_time`
    pub peak_channel: usize,
    /// Refined peak time per channel (`None` outside the component)
    pub channel_peak_times: Vec<Option<f64>>,
    /// Window of `waveform_window` rows x channels, row `window / 2` at the peak
    #[serde(skip)]
    pub waveform: Samples,
    /// Soft channel weights in [0, 1]
    pub mask: Vec<f32>,
    /// Polarity-adjusted filtered value per channel: the channel's extremum
    /// inside the component, or the sample nearest `peak_time` elsewhere
    pub peak_values: Vec<f32>,
}

/// Mask weight of a channel whose peak amplitude is `amplitude`
///
/// 0 at or below `weak`, 1 at or above `strong`, linear in between.
pub fn mask_weight(amplitude: f32, weak: f32, strong: f32) -> f32 {
    if strong <= weak {
        return if amplitude >= strong { 1.0 } else { 0.0 };
    }
    ((amplitude - weak) / (strong - weak)).clamp(0.0, 1.0)
}

/// Cuts aligned waveform windows out of a chunk view
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformExtractor {
    pub window: usize,
    pub source: WaveformSource,
    pub bound: AlignmentBound,
    pub polarity: Polarity,
}

impl WaveformExtractor {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            source: WaveformSource::Filtered,
            bound: AlignmentBound::Weak,
            polarity: Polarity::Negative,
        }
    }

    pub fn from_config(config: &DetektConfig) -> Self {
        Self {
            window: config.waveform_window,
            source: config.waveform_source,
            bound: config.alignment_bound,
            polarity: config.polarity,
        }
    }

    /// Extract one spike
    ///
    /// Only channels the component touches get a nonzero mask, however large
    /// another channel's value at the peak.
    ///
    /// # Arguments
    /// * `component` - Seeded component inside the view
    /// * `view` - Raw and filtered samples around the component
    /// * `threshold` - Per-channel thresholds
    ///
    /// # Returns
    /// * `Ok(Spike)` - Aligned spike
    /// * `Err(DetectionError::IncompleteWindow)` - The window is not covered by the view
    pub fn extract(
        &self,
        component: &Component,
        view: &ChunkView<'_>,
        threshold: &Threshold,
    ) -> Result<Spike, DetectionError> {
        let n_channels = view.n_channels();
        let mut channel_peak_times = vec![None; n_channels];
        let mut peak_values = vec![0.0f32; n_channels];
        let mut in_component = vec![false; n_channels];

        // (channel, ratio to weak threshold)
        let mut best: Option<(usize, f32)> = None;
        for channel in component.channels() {
            // earliest pixel wins ties
            let Some(extremum) = component
                .pixels
                .iter()
                .filter(|p| p.channel == channel)
                .reduce(|best, p| if p.value > best.value { p } else { best })
            else {
                continue;
            };

            in_component[channel] = true;
            peak_values[channel] = extremum.value;
            channel_peak_times[channel] =
                Some(self.refine_peak(view, channel, extremum.time, threshold));

            let ratio = extremum.value / threshold.weak(channel).max(f32::MIN_POSITIVE);
            if best.map(|(_, r)| ratio > r).unwrap_or(true) {
                best = Some((channel, ratio));
            }
        }

        let (peak_channel, _) = best.unwrap_or((0, 0.0));
        let peak_time = channel_peak_times[peak_channel].unwrap_or(component.start as f64);

        let waveform = self.window_at(view, peak_time)?;

        for channel in 0..n_channels {
            if in_component[channel] {
                continue;
            }
            let nearest = peak_time.round().max(0.0) as u64;
            peak_values[channel] = view
                .filtered(nearest, channel)
                .map(|v| self.polarity.adjust(v))
                .unwrap_or(0.0);
        }

        let mask = (0..n_channels)
            .map(|c| {
                if in_component[c] {
                    mask_weight(peak_values[c], threshold.weak(c), threshold.strong(c))
                } else {
                    0.0
                }
            })
            .collect();

        Ok(Spike {
            start: component.start,
            end: component.end,
            peak_time,
            peak_channel,
            channel_peak_times,
            waveform,
            mask,
            peak_values,
        })
    }

    /// Sub-sample peak from the alignment-threshold crossings around `peak`
    ///
    /// A peak at or below the alignment bound keeps its integer time.
    fn refine_peak(&self, view: &ChunkView<'_>, channel: usize, peak: u64, threshold: &Threshold) -> f64 {
        let bound = match self.bound {
            AlignmentBound::Weak => threshold.weak(channel),
            AlignmentBound::Strong => threshold.strong(channel),
        };
        let value_at = |t: u64| view.filtered(t, channel).map(|v| self.polarity.adjust(v));

        match value_at(peak) {
            Some(v) if v > bound => {}
            _ => return peak as f64,
        }

        // Walk outwards while above the bound; interpolate into the first sample below
        let mut left = peak;
        let left_crossing = loop {
            let Some(prev) = left.checked_sub(1) else {
                break left as f64;
            };
            match (value_at(prev), value_at(left)) {
                (Some(below), Some(above)) if below <= bound => {
                    break prev as f64 + crossing_fraction(below, above, bound);
                }
                (Some(_), _) => left = prev,
                (None, _) => break left as f64,
            }
        };

        let mut right = peak;
        let right_crossing = loop {
            let next = right + 1;
            match (value_at(right), value_at(next)) {
                (Some(above), Some(below)) if below <= bound => {
                    break right as f64 + 1.0 - crossing_fraction(below, above, bound);
                }
                (_, Some(_)) => right = next,
                (_, None) => break right as f64,
            }
        };

        let middle = (left_crossing + right_crossing) / 2.0;
        middle.clamp(peak as f64 - 1.0, peak as f64 + 1.0)
    }

    /// Interpolated window with row `window / 2` at `peak_time`
    fn window_at(&self, view: &ChunkView<'_>, peak_time: f64) -> Result<Samples, DetectionError> {
        let (available_start, available_end) = view.available();
        let half = (self.window / 2) as f64;
        let first = (peak_time - half).floor();
        let last = (peak_time - half + (self.window - 1) as f64).floor() + 1.0;

        let edge = if first < available_start as f64 {
            Some(WindowEdge::Leading)
        } else if last >= available_end as f64 {
            Some(WindowEdge::Trailing)
        } else {
            None
        };
        if let Some(edge) = edge {
            return Err(DetectionError::IncompleteWindow {
                edge,
                peak_time,
                available_start,
                available_end,
            });
        }

        let n_channels = view.n_channels();
        let mut waveform = Samples::zeros(self.window, n_channels);
        for i in 0..self.window {
            let tau = peak_time - half + i as f64;
            let lo = tau.floor();
            let frac = (tau - lo) as f32;
            let lo = lo as u64;
            for c in 0..n_channels {
                let read = |t: u64| match self.source {
                    WaveformSource::Raw => view.raw(t, c),
                    WaveformSource::Filtered => view.filtered(t, c),
                };
                let a = read(lo).unwrap_or(0.0);
                let b = read(lo + 1).unwrap_or(a);
                waveform.set(i, c, a + (b - a) * frac);
            }
        }
        Ok(waveform)
    }
}

/// Distance from `below` toward `above` (in samples) where the line crosses `bound`
fn crossing_fraction(below: f32, above: f32, bound: f32) -> f64 {
    let span = above - below;
    if span <= 0.0 {
        return 0.0;
    }
    (((bound - below) / span) as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ComponentDetector;
    use crate::probe::ChannelGraph;

    /// Negative Gaussian bump on channel 0 (amplitude `a0`) and channel 1 (`a1`)
    fn bump_segment(centre: f64, a0: f32, a1: f32, len: usize) -> Segment {
        let bump = |t: usize, a: f32| {
            let d = (t as f64 - centre) / 2.0;
            -(a as f64 * (-0.5 * d * d).exp()) as f32
        };
        let filtered = Samples::from_channels(&[
            (0..len).map(|t| bump(t, a0)).collect(),
            (0..len).map(|t| bump(t, a1)).collect(),
            vec![0.0; len],
        ]);
        let raw = filtered.clone();
        Segment::new(0, raw, filtered)
    }

    fn detect(segment: &Segment, threshold: &Threshold) -> Vec<Component> {
        ComponentDetector::new(ChannelGraph::linear(3), 1, 40, Polarity::Negative).detect(
            &segment.filtered,
            segment.start,
            threshold,
        )
    }

    #[test]
    fn test_mask_weight_ramp() {
        assert_eq!(mask_weight(1.0, 2.0, 4.0), 0.0);
        assert_eq!(mask_weight(3.0, 2.0, 4.0), 0.5);
        assert_eq!(mask_weight(9.0, 2.0, 4.0), 1.0);
        assert_eq!(mask_weight(4.0, 4.0, 4.0), 1.0);
    }

    #[test]
    fn test_mask_weight_monotonic() {
        let mut previous = 0.0;
        for step in 0..100 {
            let weight = mask_weight(step as f32 * 0.1, 2.0, 4.5);
            assert!(weight >= previous);
            previous = weight;
        }
    }

    #[test]
    fn test_symmetric_bump_peak_is_exact() {
        let segment = bump_segment(100.0, 20.0, 5.0, 200);
        let threshold = Threshold::uniform(3, 8.0, 4.0);
        let components = detect(&segment, &threshold);
        assert_eq!(components.len(), 1);

        let spike = WaveformExtractor::new(32)
            .extract(&components[0], &ChunkView::single(&segment), &threshold)
            .unwrap();
        assert!((spike.peak_time - 100.0).abs() < 1e-6);
        assert_eq!(spike.peak_channel, 0);
        assert_eq!(spike.waveform.n_samples(), 32);
        assert_eq!(spike.waveform.n_channels(), 3);
        assert!((spike.waveform.get(16, 0) + 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_fractional_peak_within_one_sample() {
        let segment = bump_segment(100.4, 20.0, 0.0, 200);
        let threshold = Threshold::uniform(3, 8.0, 4.0);
        let components = detect(&segment, &threshold);
        let spike = WaveformExtractor::new(32)
            .extract(&components[0], &ChunkView::single(&segment), &threshold)
            .unwrap();
        assert!((spike.peak_time - 100.4).abs() < 0.1, "peak {}", spike.peak_time);
    }

    #[test]
    fn test_strong_bound_refines_between_strong_crossings() {
        let segment = bump_segment(100.4, 20.0, 6.0, 200);
        let threshold = Threshold::uniform(3, 8.0, 4.0);
        let components = detect(&segment, &threshold);
        let mut extractor = WaveformExtractor::new(32);
        extractor.bound = AlignmentBound::Strong;
        let spike = extractor
            .extract(&components[0], &ChunkView::single(&segment), &threshold)
            .unwrap();

        assert_eq!(spike.peak_channel, 0);
        assert!((spike.peak_time - 100.4).abs() < 0.1, "peak {}", spike.peak_time);
        // channel 1 never reaches the strong bound: integer extremum
        assert_eq!(spike.channel_peak_times[1], Some(100.0));
    }

    #[test]
    fn test_mask_and_peak_values() {
        let segment = bump_segment(100.0, 20.0, 6.0, 200);
        let threshold = Threshold::uniform(3, 8.0, 4.0);
        let components = detect(&segment, &threshold);
        let spike = WaveformExtractor::new(32)
            .extract(&components[0], &ChunkView::single(&segment), &threshold)
            .unwrap();
        assert_eq!(spike.mask[0], 1.0);
        assert!((spike.mask[1] - 0.5).abs() < 1e-4);
        assert_eq!(spike.mask[2], 0.0);
        assert!((spike.peak_values[0] - 20.0).abs() < 1e-4);
        assert!(spike.channel_peak_times[2].is_none());
    }

    #[test]
    fn test_mask_limited_to_component_channels() {
        // channels 0 and 2 peak together but are not adjacent through a quiet channel 1
        let bump = |t: usize| {
            let d = (t as f64 - 100.0) / 2.0;
            -(20.0 * (-0.5 * d * d).exp()) as f32
        };
        let trace: Vec<f32> = (0..200).map(bump).collect();
        let filtered = Samples::from_channels(&[trace.clone(), vec![0.0; 200], trace]);
        let segment = Segment::new(0, filtered.clone(), filtered);
        let threshold = Threshold::uniform(3, 8.0, 4.0);
        let components = detect(&segment, &threshold);
        assert_eq!(components.len(), 2);

        let spike = WaveformExtractor::new(32)
            .extract(&components[0], &ChunkView::single(&segment), &threshold)
            .unwrap();
        let touched = components[0].channels();
        let outside = if touched.contains(&0) { 2 } else { 0 };
        assert_eq!(spike.mask[outside], 0.0);
        assert!((spike.peak_values[outside] - 20.0).abs() < 1e-4);
        assert!(spike.channel_peak_times[outside].is_none());
    }

    #[test]
    fn test_incomplete_window_edges() {
        let threshold = Threshold::uniform(3, 8.0, 4.0);
        let extractor = WaveformExtractor::new(32);

        let early = bump_segment(5.0, 20.0, 0.0, 200);
        let components = detect(&early, &threshold);
        let err = extractor
            .extract(&components[0], &ChunkView::single(&early), &threshold)
            .unwrap_err();
        assert!(matches!(
            err,
            DetectionError::IncompleteWindow {
                edge: WindowEdge::Leading,
                ..
            }
        ));

        let late = bump_segment(190.0, 20.0, 0.0, 200);
        let components = detect(&late, &threshold);
        let err = extractor
            .extract(&components[0], &ChunkView::single(&late), &threshold)
            .unwrap_err();
        assert!(matches!(
            err,
            DetectionError::IncompleteWindow {
                edge: WindowEdge::Trailing,
                ..
            }
        ));
    }

    #[test]
    fn test_raw_waveform_source() {
        let mut segment = bump_segment(100.0, 20.0, 0.0, 200);
        segment.raw = Samples::zeros(200, 3);
        let threshold = Threshold::uniform(3, 8.0, 4.0);
        let components = detect(&segment, &threshold);
        let mut extractor = WaveformExtractor::new(32);
        extractor.source = WaveformSource::Raw;
        let spike = extractor
            .extract(&components[0], &ChunkView::single(&segment), &threshold)
            .unwrap();
        assert!(spike.waveform.as_interleaved().iter().all(|&v| v == 0.0));
    }
}
