// Detection module - connected components of above-threshold samples
//
// Architecture:
// - ComponentDetector labels one filtered chunk: every sample above its
//   channel's weak threshold is a pixel, and pixels within `join_size`
//   samples of each other on the same or adjacent channels are joined
// - BoundaryReconciler carries components that touch the end of a chunk
//   ("pending tails") into the next chunk, merges them with their
//   continuation and emits every component exactly once, in start order
//
// Pixel values are polarity-adjusted, so larger always means more
// spike-like regardless of the configured polarity.

mod components;
mod reconcile;

pub use components::ComponentDetector;
pub use reconcile::{BoundaryReconciler, Reconciled};

use crate::calibration::Threshold;

/// One above-weak sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pixel {
    /// Absolute sample index
    pub time: u64,
    pub channel: usize,
    /// Polarity-adjusted filtered value
    pub value: f32,
}

/// Connected set of pixels
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Pixels sorted by (time, channel), without duplicates
    pub pixels: Vec<Pixel>,
    /// First sample (inclusive)
    pub start: u64,
    /// Last sample (inclusive)
    pub end: u64,
    /// At least one pixel exceeds its channel's strong threshold
    pub has_seed: bool,
}

impl Component {
    /// Build a component from its pixels
    ///
    /// Returns `None` for an empty pixel list.
    pub fn from_pixels(mut pixels: Vec<Pixel>, threshold: &Threshold) -> Option<Self> {
        pixels.sort_by_key(|p| (p.time, p.channel));
        pixels.dedup_by_key(|p| (p.time, p.channel));
        let start = pixels.first()?.time;
        let end = pixels.iter().map(|p| p.time).max()?;
        let has_seed = pixels
            .iter()
            .any(|p| p.value > threshold.strong(p.channel));
        Some(Self {
            pixels,
            start,
            end,
            has_seed,
        })
    }

    /// Time extent in samples
    pub fn duration(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Channels touched, ascending
    pub fn channels(&self) -> Vec<usize> {
        let mut channels: Vec<usize> = self.pixels.iter().map(|p| p.channel).collect();
        channels.sort_unstable();
        channels.dedup();
        channels
    }

    /// Seeded and not longer than `max_duration`
    pub fn is_spike(&self, max_duration: usize) -> bool {
        self.has_seed && self.duration() <= max_duration as u64
    }
}
