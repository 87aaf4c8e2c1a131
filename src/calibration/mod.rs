// Calibration module - noise-based detection thresholds
//
// Thresholds are computed once per run from a fixed number of excerpts
// spread evenly across the recording:
// 1. Filter each excerpt (with margin context)
// 2. Estimate a robust noise scale per channel (MAD / 0.6745)
// 3. strong = k_strong * scale, weak = k_weak * scale

pub mod stats;
pub mod threshold;

pub use threshold::{estimate, Threshold, ThresholdEstimator};
