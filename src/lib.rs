// SpikeDetekt Core - streaming spike detection for extracellular recordings
// Chunked band-pass filtering, connected-component detection and PCA features

// Module declarations
pub mod calibration;
pub mod config;
pub mod detection;
pub mod error;
pub mod extraction;
pub mod features;
pub mod filter;
pub mod pipeline;
pub mod probe;
pub mod sink;
pub mod source;
pub mod synthetic;

// Re-exports for convenience
pub use calibration::{Threshold, ThresholdEstimator};
pub use config::DetektConfig;
pub use error::{ConfigError, DetectionError, ErrorCode};
pub use features::{FeatureBasis, FeatureExtractor};
pub use filter::FilterSpec;
pub use pipeline::{PassStats, Pipeline, RunSummary};
pub use probe::ChannelGraph;
pub use sink::{JsonLinesSink, SpikeRecord, SpikeSink, VecSink};
pub use source::{ArraySource, ChunkSource, DatSource, Samples, WavSource};

/// Install a stderr `tracing` subscriber
///
/// Calling it more than once is harmless; later calls keep the first
/// subscriber.
pub fn init_logging(level: tracing::Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_structure() {
        let config = DetektConfig::default();
        let pipeline = Pipeline::new(config, ChannelGraph::linear(4)).unwrap();
        assert_eq!(pipeline.graph().n_channels(), 4);
        init_logging(tracing::Level::DEBUG);
        init_logging(tracing::Level::INFO);
    }
}
