//! Run configuration for the spike detection pipeline
//!
//! This module provides the flat parameter record that drives filtering,
//! threshold calibration, detection, extraction and feature fitting, plus
//! JSON file loading so runs can be tuned without recompilation.
//!
//! Defaults follow the classic spikedetekt parameter file for a 20 kHz
//! recording.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{log_config_error, ConfigError};
use crate::filter::FilterSpec;

/// Zero-phase (forward-backward) or causal (forward only) filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    ZeroPhase,
    Causal,
}

/// Whether each channel gets its own noise scale or all share one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdScope {
    PerChannel,
    Global,
}

/// Sign of the deflections treated as spikes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Negative,
    Positive,
    Both,
}

impl Polarity {
    /// Map a filtered sample onto the "larger is more spike-like" axis
    #[inline]
    pub fn adjust(self, value: f32) -> f32 {
        match self {
            Polarity::Negative => -value,
            Polarity::Positive => value,
            Polarity::Both => value.abs(),
        }
    }
}

/// Samples the waveform window is cut from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveformSource {
    Raw,
    Filtered,
}

/// Threshold whose crossings bracket the peak during alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentBound {
    Weak,
    Strong,
}

/// Run both pipeline stages on one thread or hand chunks to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    Sequential,
    Staged,
}

/// Complete detection configuration
///
/// Every field has a default, so a JSON file only needs to list the
/// options it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetektConfig {
    /// Recording sample rate in Hz
    pub sample_rate: f64,
    /// Band-pass lower edge in Hz
    pub filter_low: f64,
    /// Band-pass upper edge in Hz
    pub filter_high: f64,
    /// Butterworth order of each band edge
    pub filter_butter_order: usize,
    /// Zero-phase or causal filtering
    pub filter_mode: FilterMode,
    /// Samples of filtering context read past each chunk edge (derived when absent)
    pub filter_margin: Option<usize>,
    /// Samples per chunk keep range
    pub chunk_size: usize,
    /// Samples shared by consecutive chunks
    pub chunk_overlap: usize,
    /// Number of excerpts used for threshold calibration
    pub nexcerpts: usize,
    /// Samples per excerpt
    pub excerpt_size: usize,
    /// Strong threshold in units of the noise scale
    pub threshold_strong_multiplier: f64,
    /// Weak threshold in units of the noise scale
    pub threshold_weak_multiplier: f64,
    /// Per-channel or pooled noise scale
    pub threshold_scope: ThresholdScope,
    /// Noise scale used for silent channels
    pub threshold_min_scale: f64,
    /// Spike deflection sign
    pub polarity: Polarity,
    /// Maximum time gap (samples) joining two above-threshold pixels
    pub connected_component_join_size: usize,
    /// Components longer than this (samples) are rejected as artifacts
    pub max_component_duration: usize,
    /// Samples per extracted waveform
    pub waveform_window: usize,
    /// Raw or filtered samples for the waveform window
    pub waveform_source: WaveformSource,
    /// Threshold used to bracket the peak during alignment
    pub alignment_bound: AlignmentBound,
    /// Spikes peaking within this many samples of a kept spike on a shared
    /// channel are suppressed (0 disables). Causal filtering rings about 20
    /// samples after each spike at the default band, so use ~30 there.
    pub refractory_samples: usize,
    /// Principal components kept per channel
    pub feature_dimensionality: usize,
    /// Waveforms sampled to fit the feature basis
    pub waveform_sample_count: usize,
    /// Weight each channel's waveform by its mask before projection
    pub mask_features: bool,
    /// Sequential or staged execution
    pub pipeline_mode: PipelineMode,
    /// Chunks buffered between stages in staged mode
    pub pipeline_queue_depth: usize,
}

impl Default for DetektConfig {
    fn default() -> Self {
        Self {
            sample_rate: 20_000.0,
            filter_low: 500.0,
            filter_high: 0.95 * 0.5 * 20_000.0,
            filter_butter_order: 3,
            filter_mode: FilterMode::ZeroPhase,
            filter_margin: None,
            chunk_size: 20_000,
            chunk_overlap: 300,
            nexcerpts: 50,
            excerpt_size: 20_000,
            threshold_strong_multiplier: 4.5,
            threshold_weak_multiplier: 2.0,
            threshold_scope: ThresholdScope::PerChannel,
            threshold_min_scale: 1e-6,
            polarity: Polarity::Negative,
            connected_component_join_size: 1,
            max_component_duration: 40,
            waveform_window: 32,
            waveform_source: WaveformSource::Filtered,
            alignment_bound: AlignmentBound::Weak,
            refractory_samples: 0,
            feature_dimensionality: 3,
            waveform_sample_count: 10_000,
            mask_features: false,
            pipeline_mode: PipelineMode::Sequential,
            pipeline_queue_depth: 4,
        }
    }
}

impl DetektConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// * `Ok(DetektConfig)` - Parsed and validated configuration
    /// * `Err(ConfigError)` - File missing, malformed or inconsistent
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let display = path.as_ref().display().to_string();
        let contents = fs::read_to_string(&path).map_err(|err| ConfigError::Unreadable {
            path: display.clone(),
            reason: err.to_string(),
        })?;

        let config: DetektConfig =
            serde_json::from_str(&contents).map_err(|err| ConfigError::Malformed {
                path: display.clone(),
                reason: err.to_string(),
            })?;

        if let Err(err) = config.validate() {
            log_config_error(&err, "DetektConfig::load_from_file");
            return Err(err);
        }

        log::info!("[Config] Loaded configuration from {}", display);
        Ok(config)
    }

    /// Filtering context in samples, derived from the low cut when not set
    ///
    /// Six periods of the lowest passband frequency let the high-pass
    /// transient settle before the samples that are kept.
    pub fn effective_filter_margin(&self) -> usize {
        self.filter_margin
            .unwrap_or_else(|| (6.0 * self.sample_rate / self.filter_low).ceil() as usize)
    }

    /// Check every option and cross-option constraint
    ///
    /// # Returns
    /// * `Ok(())` - Configuration is usable
    /// * `Err(ConfigError)` - First violated constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::parameter(
                "sample_rate",
                format!("must be positive (got {})", self.sample_rate),
            ));
        }

        FilterSpec::design(
            self.filter_butter_order,
            self.sample_rate,
            self.filter_low,
            self.filter_high,
        )?;

        if self.threshold_weak_multiplier > self.threshold_strong_multiplier {
            return Err(ConfigError::InvalidThreshold {
                strong: self.threshold_strong_multiplier,
                weak: self.threshold_weak_multiplier,
            });
        }
        if !(self.threshold_weak_multiplier > 0.0) {
            return Err(ConfigError::parameter(
                "threshold_weak_multiplier",
                "must be positive",
            ));
        }
        if !(self.threshold_min_scale > 0.0) {
            return Err(ConfigError::parameter(
                "threshold_min_scale",
                "must be positive",
            ));
        }

        if self.chunk_size == 0 {
            return Err(ConfigError::parameter("chunk_size", "must be positive"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::parameter(
                "chunk_overlap",
                format!(
                    "must be smaller than chunk_size ({} >= {})",
                    self.chunk_overlap, self.chunk_size
                ),
            ));
        }
        if self.nexcerpts == 0 {
            return Err(ConfigError::parameter("nexcerpts", "must be positive"));
        }
        if self.excerpt_size == 0 {
            return Err(ConfigError::parameter("excerpt_size", "must be positive"));
        }
        if self.max_component_duration == 0 {
            return Err(ConfigError::parameter(
                "max_component_duration",
                "must be positive",
            ));
        }
        if self.waveform_window < 2 {
            return Err(ConfigError::parameter(
                "waveform_window",
                format!("must be at least 2 (got {})", self.waveform_window),
            ));
        }
        if self.feature_dimensionality == 0 || self.feature_dimensionality > self.waveform_window
        {
            return Err(ConfigError::parameter(
                "feature_dimensionality",
                format!(
                    "must be in 1..={} (got {})",
                    self.waveform_window, self.feature_dimensionality
                ),
            ));
        }
        if self.waveform_sample_count == 0 {
            return Err(ConfigError::parameter(
                "waveform_sample_count",
                "must be positive",
            ));
        }
        if self.pipeline_queue_depth == 0 {
            return Err(ConfigError::parameter(
                "pipeline_queue_depth",
                "must be positive",
            ));
        }

        Ok(())
    }
}
