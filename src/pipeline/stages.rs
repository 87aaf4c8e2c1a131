// Pipeline stages - detection and extraction halves of chunk processing
//
// DetectionStage: read (with filter margin) -> finite check -> band-pass ->
//                 crop -> label -> boundary reconciliation
// ExtractionStage: stitched view (carry + chunk) -> waveform extraction,
//                  deferring spikes whose window runs past the chunk end
//
// Each stage owns the state it passes from one chunk to the next, so the
// two halves can run on different threads without sharing anything.

use crate::calibration::Threshold;
use crate::config::DetektConfig;
use crate::detection::{BoundaryReconciler, Component, ComponentDetector};
use crate::error::{DetectionError, WindowEdge};
use crate::extraction::{ChunkView, Segment, Spike, WaveformExtractor};
use crate::filter::FilterSpec;
use crate::probe::ChannelGraph;
use crate::source::{read_with_margin, trim_margin_to_finite, ChunkBounds, ChunkSource};

/// Output of the detection stage for one chunk
#[derive(Debug, Clone)]
pub struct DetectedChunk {
    pub bounds: ChunkBounds,
    /// Raw and filtered samples of the chunk's data range
    pub segment: Segment,
    /// Reconciled components, sorted by start
    pub components: Vec<Component>,
    /// Seeded components dropped for exceeding the maximum duration
    pub rejected: usize,
    /// The chunk reaches the end of the recording
    pub at_recording_end: bool,
}

/// Filtering, labeling and boundary reconciliation
#[derive(Debug, Clone)]
pub struct DetectionStage {
    filter: FilterSpec,
    detector: ComponentDetector,
    reconciler: BoundaryReconciler,
    threshold: Threshold,
    overlap: usize,
    margin: usize,
    n_samples: u64,
}

impl DetectionStage {
    pub fn new(
        config: &DetektConfig,
        filter: FilterSpec,
        graph: ChannelGraph,
        threshold: Threshold,
        n_samples: u64,
    ) -> Self {
        let detector = ComponentDetector::from_config(config, graph.clone());
        let reconciler = BoundaryReconciler::new(
            graph,
            config.connected_component_join_size,
            config.max_component_duration,
        );
        Self {
            filter,
            detector,
            reconciler,
            threshold,
            overlap: config.chunk_overlap,
            margin: config.effective_filter_margin(),
            n_samples,
        }
    }

    /// Detect the components of one chunk
    ///
    /// # Returns
    /// * `Err(DetectionError::CorruptChunk)` - Non-finite samples; pending state is dropped
    /// * `Err(DetectionError::Source)` - Reading failed
    pub fn process<S: ChunkSource + ?Sized>(
        &mut self,
        source: &mut S,
        bounds: &ChunkBounds,
    ) -> Result<DetectedChunk, DetectionError> {
        let (block, lead) =
            read_with_margin(source, bounds.data_start, bounds.data_end, self.margin)?;
        let len = bounds.len();
        let raw = block.slice_rows(lead, lead + len);

        if let Some((row, channel)) = raw.first_non_finite() {
            self.reconciler.reset();
            return Err(DetectionError::CorruptChunk {
                chunk_index: bounds.index,
                reason: format!(
                    "non-finite sample at {} on channel {}",
                    bounds.data_start + row as u64,
                    channel
                ),
            });
        }

        // a bad sample in the margin only shortens the filter context
        let (context, lead) = trim_margin_to_finite(&block, lead, len);
        let filtered = self.filter.apply(&context).slice_rows(lead, lead + len);

        let labeled = self.detector.label(&filtered, bounds.data_start, &self.threshold);
        let at_recording_end = bounds.data_end >= self.n_samples;
        let mut reconciled = self.reconciler.process(
            bounds,
            labeled,
            self.overlap,
            at_recording_end,
            &self.threshold,
        );
        if at_recording_end {
            let rest = self.reconciler.flush();
            reconciled.components.extend(rest.components);
            reconciled.rejected += rest.rejected;
        }

        tracing::debug!(
            "[Detection] Chunk {} [{}, {}): {} components, {} rejected, {} pending",
            bounds.index,
            bounds.data_start,
            bounds.data_end,
            reconciled.components.len(),
            reconciled.rejected,
            self.reconciler.pending().len()
        );

        Ok(DetectedChunk {
            bounds: *bounds,
            segment: Segment::new(bounds.data_start, raw, filtered),
            components: reconciled.components,
            rejected: reconciled.rejected,
            at_recording_end,
        })
    }
}

/// Waveform extraction across chunk boundaries
#[derive(Debug, Clone)]
pub struct ExtractionStage {
    extractor: WaveformExtractor,
    threshold: Threshold,
    carry: Option<Segment>,
    carry_len: u64,
    deferred: Vec<Component>,
    dropped: usize,
    refractory: f64,
    // (peak time, component channels) of kept spikes inside the refractory period
    recent: Vec<(f64, Vec<bool>)>,
    suppressed: usize,
}

impl ExtractionStage {
    pub fn new(config: &DetektConfig, threshold: Threshold) -> Self {
        let carry_len = config.waveform_window
            + config.max_component_duration
            + config.chunk_overlap
            + config.connected_component_join_size
            + 2;
        Self {
            extractor: WaveformExtractor::from_config(config),
            threshold,
            carry: None,
            carry_len: carry_len as u64,
            deferred: Vec::new(),
            dropped: 0,
            refractory: config.refractory_samples as f64,
            recent: Vec::new(),
            suppressed: 0,
        }
    }

    /// Spikes dropped because their window ran past the recording edges
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Spikes suppressed inside the refractory period of an earlier spike
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    /// Keep `spike` unless it peaks within the refractory period of a kept
    /// spike that shares one of its channels
    fn admit(&mut self, spike: &Spike) -> bool {
        if self.refractory <= 0.0 {
            return true;
        }
        let refractory = self.refractory;
        self.recent.retain(|(time, _)| spike.peak_time - time < refractory);

        let channels: Vec<bool> = spike.channel_peak_times.iter().map(Option::is_some).collect();
        let shadowed = self.recent.iter().any(|(time, kept)| {
            (spike.peak_time - time).abs() < refractory
                && kept.iter().zip(&channels).any(|(&a, &b)| a && b)
        });
        if shadowed {
            tracing::debug!(
                "[Extraction] Suppressing spike at {:.2} inside refractory period",
                spike.peak_time
            );
            self.suppressed += 1;
            return false;
        }

        self.recent.push((spike.peak_time, channels));
        true
    }

    /// Extract the spikes of one detected chunk (plus any deferred from the previous one)
    pub fn process(&mut self, chunk: &DetectedChunk) -> Result<Vec<Spike>, DetectionError> {
        let bounds = &chunk.bounds;
        let split = bounds.data_start + bounds.overlap() / 2;
        let view = ChunkView::stitched(self.carry.as_ref(), &chunk.segment, split);

        let mut components = std::mem::take(&mut self.deferred);
        components.extend(chunk.components.iter().cloned());

        let mut spikes = Vec::with_capacity(components.len());
        for (i, component) in components.iter().enumerate() {
            match self.extractor.extract(component, &view, &self.threshold) {
                Ok(spike) => spikes.push(spike),
                Err(DetectionError::IncompleteWindow {
                    edge: WindowEdge::Trailing,
                    ..
                }) if !chunk.at_recording_end => {
                    // keep start order: everything after waits as well
                    self.deferred = components[i..].to_vec();
                    break;
                }
                Err(DetectionError::IncompleteWindow {
                    edge, peak_time, ..
                }) => {
                    tracing::debug!(
                        "[Extraction] Dropping spike at {:.2}: window past {:?} edge of recording",
                        peak_time,
                        edge
                    );
                    self.dropped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        let end = chunk.segment.end();
        let carry = view.segment(end.saturating_sub(self.carry_len), end);
        self.carry = Some(carry);

        spikes.retain(|spike| self.admit(spike));
        Ok(spikes)
    }

    /// Forget carry and deferred spikes after a skipped chunk
    pub fn skip(&mut self) {
        if !self.deferred.is_empty() {
            tracing::warn!(
                "[Extraction] Dropping {} deferred spikes at skipped chunk",
                self.deferred.len()
            );
        }
        self.dropped += self.deferred.len();
        self.deferred.clear();
        self.carry = None;
        self.recent.clear();
    }

    /// Drop whatever is still deferred at the end of the stream
    pub fn finish(&mut self) -> usize {
        self.dropped += self.deferred.len();
        self.deferred.clear();
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ArraySource, ChunkPlan, Samples};

    fn config() -> DetektConfig {
        DetektConfig {
            filter_high: 6000.0,
            chunk_size: 1000,
            chunk_overlap: 50,
            threshold_strong_multiplier: 8.0,
            threshold_weak_multiplier: 4.0,
            ..DetektConfig::default()
        }
    }

    /// Two-channel recording with one negative bump per `centres` entry
    fn recording(n: usize, centres: &[f64]) -> ArraySource {
        let trace: Vec<f32> = (0..n)
            .map(|t| {
                centres
                    .iter()
                    .map(|&c| {
                        let d = (t as f64 - c) / 2.0;
                        -40.0 * (-0.5 * d * d).exp()
                    })
                    .sum::<f64>() as f32
            })
            .collect();
        ArraySource::new(Samples::from_channels(&[trace.clone(), trace]), 20_000.0)
    }

    fn run_stages(source: &mut ArraySource, config: &DetektConfig) -> (Vec<Spike>, Vec<usize>) {
        let filter = FilterSpec::design(3, 20_000.0, config.filter_low, config.filter_high).unwrap();
        let threshold = Threshold::uniform(2, 8.0, 4.0);
        let mut detection = DetectionStage::new(
            config,
            filter,
            ChannelGraph::linear(2),
            threshold.clone(),
            source.n_samples(),
        );
        let mut extraction = ExtractionStage::new(config, threshold);
        let mut spikes = Vec::new();
        let mut skipped = Vec::new();
        for bounds in ChunkPlan::new(source.n_samples(), config.chunk_size, config.chunk_overlap) {
            match detection.process(source, &bounds) {
                Ok(chunk) => spikes.extend(extraction.process(&chunk).unwrap()),
                Err(DetectionError::CorruptChunk { chunk_index, .. }) => {
                    extraction.skip();
                    skipped.push(chunk_index);
                }
                Err(err) => panic!("unexpected error {:?}", err),
            }
        }
        extraction.finish();
        (spikes, skipped)
    }

    #[test]
    fn test_spikes_found_once_across_chunks() {
        let centres = [300.0, 995.0, 1500.0, 1998.0, 2993.0];
        let mut source = recording(4000, &centres);
        let (spikes, skipped) = run_stages(&mut source, &config());
        assert!(skipped.is_empty());
        let peaks: Vec<f64> = spikes.iter().map(|s| s.peak_time).collect();
        assert_eq!(peaks.len(), centres.len(), "peaks {:?}", peaks);
        for (peak, centre) in peaks.iter().zip(centres.iter()) {
            assert!((peak - centre).abs() <= 1.0, "peak {} vs {}", peak, centre);
        }
    }

    #[test]
    fn test_corrupt_chunk_skipped() {
        let mut source = recording(4000, &[500.0, 1500.0, 2500.0]);
        let mut samples = source.samples().clone();
        samples.set(1500, 0, f32::NAN);
        let mut source = ArraySource::new(samples, 20_000.0);
        let (spikes, skipped) = run_stages(&mut source, &config());
        assert_eq!(skipped, vec![1]);
        let peaks: Vec<f64> = spikes.iter().map(|s| s.peak_time.round()).collect();
        assert_eq!(peaks, vec![500.0, 2500.0]);
    }

    #[test]
    fn test_bad_sample_in_margin_skips_only_its_chunk() {
        // chunk 1 reads [950, 2000); both positions also sit in a neighbour's margin
        for bad in [1050, 1920] {
            let mut samples = recording(4000, &[500.0, 1500.0, 2500.0]).samples().clone();
            samples.set(bad, 1, f32::NAN);
            let mut source = ArraySource::new(samples, 20_000.0);
            let (spikes, skipped) = run_stages(&mut source, &config());
            assert_eq!(skipped, vec![1], "bad sample at {}", bad);
            let peaks: Vec<f64> = spikes.iter().map(|s| s.peak_time.round()).collect();
            assert_eq!(peaks, vec![500.0, 2500.0], "bad sample at {}", bad);
        }
    }

    #[test]
    fn test_refractory_period_suppresses_close_spikes() {
        let centres = [500.0, 520.0, 1500.0];
        let mut source = recording(4000, &centres);
        let (spikes, _) = run_stages(&mut source, &config());
        assert_eq!(spikes.len(), 3);

        let config = DetektConfig {
            refractory_samples: 30,
            ..config()
        };
        let filter = FilterSpec::design(3, 20_000.0, config.filter_low, config.filter_high).unwrap();
        let threshold = Threshold::uniform(2, 8.0, 4.0);
        let mut detection =
            DetectionStage::new(&config, filter, ChannelGraph::linear(2), threshold.clone(), 4000);
        let mut extraction = ExtractionStage::new(&config, threshold);
        let mut peaks = Vec::new();
        for bounds in ChunkPlan::new(4000, config.chunk_size, config.chunk_overlap) {
            let chunk = detection.process(&mut source, &bounds).unwrap();
            peaks.extend(extraction.process(&chunk).unwrap().iter().map(|s| s.peak_time.round()));
        }
        assert_eq!(peaks, vec![500.0, 1500.0]);
        assert_eq!(extraction.suppressed(), 1);
    }

    #[test]
    fn test_edge_spikes_dropped() {
        let mut source = recording(2000, &[12.0, 1000.0, 1990.0]);
        let config = config();
        let filter = FilterSpec::design(3, 20_000.0, config.filter_low, config.filter_high).unwrap();
        let threshold = Threshold::uniform(2, 8.0, 4.0);
        let mut detection =
            DetectionStage::new(&config, filter, ChannelGraph::linear(2), threshold.clone(), 2000);
        let mut extraction = ExtractionStage::new(&config, threshold);
        let mut count = 0;
        for bounds in ChunkPlan::new(2000, config.chunk_size, config.chunk_overlap) {
            let chunk = detection.process(&mut source, &bounds).unwrap();
            count += extraction.process(&chunk).unwrap().len();
        }
        assert_eq!(count, 1);
        assert_eq!(extraction.finish(), 2);
    }
}
