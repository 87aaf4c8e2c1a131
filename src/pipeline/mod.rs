// Pipeline - calibrate, fit, then detect/extract/project every chunk
//
// Architecture:
// 1. calibrate: evenly spaced excerpts -> band-pass (with margin) -> Threshold
// 2. fit_basis: first pass over all chunks, offering every extracted spike to
//    the FeatureExtractor's bounded sampler -> FeatureBasis
// 3. run: second pass repeating detection and extraction (deterministic, so
//    both passes see the same spikes), projecting each spike and writing one
//    batch per chunk to the sink
//
// Chunk-to-chunk state (pending tails, carry, deferred spikes) lives in the
// stage objects, which the pipeline owns exclusively. In staged mode the
// detection stage moves to a worker thread for the duration of a pass.

mod staged;
mod stages;

pub use staged::run_staged;
pub use stages::{DetectedChunk, DetectionStage, ExtractionStage};

use serde::Serialize;

use crate::calibration::{Threshold, ThresholdEstimator};
use crate::config::{DetektConfig, FilterMode, PipelineMode};
use crate::error::{log_detection_error, ConfigError, DetectionError};
use crate::extraction::Spike;
use crate::features::{FeatureBasis, FeatureExtractor};
use crate::filter::FilterSpec;
use crate::probe::ChannelGraph;
use crate::sink::{SpikeRecord, SpikeSink};
use crate::source::{
    excerpt_ranges, read_with_margin, trim_margin_to_finite, ChunkBounds, ChunkPlan, ChunkSource,
};

/// Counters of one pass over the recording
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassStats {
    /// Chunks processed successfully
    pub chunks: usize,
    /// Indices of chunks skipped for corrupt samples
    pub skipped_chunks: Vec<usize>,
    /// Spikes extracted
    pub spikes: usize,
    /// Seeded components rejected for exceeding the maximum duration
    pub rejected_components: usize,
    /// Spikes whose window ran past the recording edges or a skipped chunk
    pub dropped_spikes: usize,
    /// Spikes suppressed inside the refractory period of an earlier spike
    pub suppressed_spikes: usize,
}

/// Result of a complete run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub n_samples: u64,
    pub n_channels: usize,
    pub sample_rate: f64,
    pub threshold: Threshold,
    /// Feature directions used for projection
    pub feature_dimensionality: usize,
    /// Spikes sampled while fitting the basis
    pub fit: PassStats,
    /// Spikes written to the sink
    pub output: PassStats,
}

/// Configured spike detection pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: DetektConfig,
    graph: ChannelGraph,
    filter: FilterSpec,
}

impl Pipeline {
    /// Validate the configuration and build the filter
    ///
    /// # Arguments
    /// * `config` - Run configuration
    /// * `graph` - Channel adjacency of the probe
    pub fn new(config: DetektConfig, graph: ChannelGraph) -> Result<Self, ConfigError> {
        config.validate()?;
        if graph.n_channels() == 0 {
            return Err(ConfigError::InvalidProbe {
                reason: "probe has no channels".to_string(),
            });
        }
        let filter = FilterSpec::design(
            config.filter_butter_order,
            config.sample_rate,
            config.filter_low,
            config.filter_high,
        )?
        .with_mode(config.filter_mode);
        if config.filter_mode == FilterMode::Causal && config.refractory_samples == 0 {
            tracing::warn!(
                "[Pipeline] Causal filtering without a refractory period reports ringing as extra spikes"
            );
        }

        Ok(Self {
            config,
            graph,
            filter,
        })
    }

    pub fn config(&self) -> &DetektConfig {
        &self.config
    }

    pub fn graph(&self) -> &ChannelGraph {
        &self.graph
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    /// Check the source against the probe and the configured sample rate
    fn check_source<S: ChunkSource + ?Sized>(&self, source: &S) -> Result<(), ConfigError> {
        if source.n_channels() != self.graph.n_channels() {
            return Err(ConfigError::InvalidProbe {
                reason: format!(
                    "probe describes {} channels but the recording has {}",
                    self.graph.n_channels(),
                    source.n_channels()
                ),
            });
        }
        if (source.sample_rate() - self.config.sample_rate).abs() > 1e-6 {
            return Err(ConfigError::parameter(
                "sample_rate",
                format!(
                    "configured {} Hz but the recording is {} Hz",
                    self.config.sample_rate,
                    source.sample_rate()
                ),
            ));
        }
        Ok(())
    }

    /// Estimate thresholds from filtered excerpts
    ///
    /// Excerpts containing non-finite samples are skipped; if none is left
    /// the calibration fails. A non-finite sample in the filter margin only
    /// shortens that excerpt's filter context.
    pub fn calibrate<S: ChunkSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<Threshold, DetectionError> {
        self.check_source(source)?;
        let margin = self.config.effective_filter_margin();
        let ranges = excerpt_ranges(
            source.n_samples(),
            self.config.nexcerpts,
            self.config.excerpt_size,
        );

        let mut excerpts = Vec::with_capacity(ranges.len());
        for (start, len) in ranges {
            let (block, lead) = read_with_margin(source, start, start + len as u64, margin)?;
            if block.slice_rows(lead, lead + len).first_non_finite().is_some() {
                tracing::warn!(
                    "[Calibration] Skipping excerpt at {} with non-finite samples",
                    start
                );
                continue;
            }
            let (context, lead) = trim_margin_to_finite(&block, lead, len);
            excerpts.push(self.filter.apply(&context).slice_rows(lead, lead + len));
        }

        let estimator = ThresholdEstimator::from_config(&self.config)?;
        Ok(estimator.estimate(&excerpts)?)
    }

    /// First pass: sample extracted waveforms and fit the feature basis
    pub fn fit_basis<S: ChunkSource + Send + ?Sized>(
        &self,
        source: &mut S,
        threshold: &Threshold,
    ) -> Result<(FeatureBasis, PassStats), DetectionError> {
        let mut features = FeatureExtractor::from_config(&self.config);
        features.begin_fit()?;
        let stats = self.pass(source, threshold, |_, spikes| {
            for spike in spikes {
                features.offer(spike)?;
            }
            Ok(())
        })?;

        let basis = features.finish_fit()?.clone();
        tracing::info!(
            "[Pipeline] Feature basis fit from {} spikes over {} chunks",
            stats.spikes,
            stats.chunks
        );
        Ok((basis, stats))
    }

    /// Complete run: calibrate, fit, then write every spike to `sink`
    pub fn run<S, K>(&self, source: &mut S, sink: &mut K) -> Result<RunSummary, DetectionError>
    where
        S: ChunkSource + Send + ?Sized,
        K: SpikeSink + ?Sized,
    {
        let threshold = self.calibrate(source)?;
        let (basis, fit) = self.fit_basis(source, &threshold)?;
        let output = self.write_pass(source, &threshold, &basis, sink)?;

        let summary = RunSummary {
            n_samples: source.n_samples(),
            n_channels: source.n_channels(),
            sample_rate: source.sample_rate(),
            threshold,
            feature_dimensionality: basis.dimensionality(),
            fit,
            output,
        };
        tracing::info!(
            "[Pipeline] Run complete: {} spikes, {} chunks skipped, {} long components rejected",
            summary.output.spikes,
            summary.output.skipped_chunks.len(),
            summary.output.rejected_components
        );
        Ok(summary)
    }

    /// Second pass with a known threshold and basis
    pub fn write_pass<S, K>(
        &self,
        source: &mut S,
        threshold: &Threshold,
        basis: &FeatureBasis,
        sink: &mut K,
    ) -> Result<PassStats, DetectionError>
    where
        S: ChunkSource + Send + ?Sized,
        K: SpikeSink + ?Sized,
    {
        let features = FeatureExtractor::with_basis(basis.clone());
        let sample_rate = self.config.sample_rate;
        let stats = self.pass(source, threshold, |_, spikes| {
            let mut records = Vec::with_capacity(spikes.len());
            for spike in spikes {
                records.push(SpikeRecord {
                    time_samples: spike.peak_time,
                    time_seconds: spike.peak_time / sample_rate,
                    mask: spike.mask.clone(),
                    features: features.project(spike)?,
                });
            }
            sink.write_batch(&records)
        })?;
        sink.finish()?;
        Ok(stats)
    }

    /// One pass over every chunk, in sequential or staged mode
    fn pass<S, F>(
        &self,
        source: &mut S,
        threshold: &Threshold,
        mut on_spikes: F,
    ) -> Result<PassStats, DetectionError>
    where
        S: ChunkSource + Send + ?Sized,
        F: FnMut(&ChunkBounds, &[Spike]) -> Result<(), DetectionError>,
    {
        self.check_source(source)?;
        let n_samples = source.n_samples();
        let plan = ChunkPlan::new(n_samples, self.config.chunk_size, self.config.chunk_overlap);
        let mut detection = DetectionStage::new(
            &self.config,
            self.filter.clone(),
            self.graph.clone(),
            threshold.clone(),
            n_samples,
        );
        let mut extraction = ExtractionStage::new(&self.config, threshold.clone());
        let mut stats = PassStats::default();

        tracing::debug!(
            "[Pipeline] Pass over {} chunks ({:?} mode)",
            plan.chunk_count(),
            self.config.pipeline_mode
        );

        let mut accept = |item: Result<DetectedChunk, DetectionError>| -> Result<(), DetectionError> {
            match item {
                Ok(chunk) => {
                    let spikes = extraction.process(&chunk)?;
                    stats.chunks += 1;
                    stats.spikes += spikes.len();
                    stats.rejected_components += chunk.rejected;
                    on_spikes(&chunk.bounds, &spikes)
                }
                Err(err @ DetectionError::CorruptChunk { chunk_index, .. }) => {
                    log_detection_error(&err, "Pipeline::pass");
                    extraction.skip();
                    stats.skipped_chunks.push(chunk_index);
                    Ok(())
                }
                Err(err) => Err(err),
            }
        };

        match self.config.pipeline_mode {
            PipelineMode::Sequential => {
                for bounds in plan {
                    accept(detection.process(source, &bounds))?;
                }
            }
            PipelineMode::Staged => {
                run_staged(
                    source,
                    detection,
                    plan,
                    self.config.pipeline_queue_depth,
                    &mut accept,
                )?;
            }
        }

        stats.dropped_spikes = extraction.finish();
        stats.suppressed_spikes = extraction.suppressed();
        Ok(stats)
    }
}
