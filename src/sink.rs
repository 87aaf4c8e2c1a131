// Spike sinks - where finished spike records go
//
// The pipeline hands over one batch per chunk, and only after every spike
// of that chunk was extracted and projected, so a sink never sees a
// partially processed chunk.

use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::error::DetectionError;

/// Final output record of one spike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeRecord {
    /// Absolute sub-sample peak time in samples
    pub time_samples: f64,
    /// Absolute peak time in seconds
    pub time_seconds: f64,
    /// Soft channel mask
    pub mask: Vec<f32>,
    /// Channels x K feature values, channel-major
    pub features: Vec<f32>,
}

/// Storage collaborator receiving spike records in time order
pub trait SpikeSink {
    /// Store the records of one chunk
    fn write_batch(&mut self, records: &[SpikeRecord]) -> Result<(), DetectionError>;

    /// Flush and close; called once after the last batch
    fn finish(&mut self) -> Result<(), DetectionError> {
        Ok(())
    }
}

impl<S: SpikeSink + ?Sized> SpikeSink for &mut S {
    fn write_batch(&mut self, records: &[SpikeRecord]) -> Result<(), DetectionError> {
        (**self).write_batch(records)
    }

    fn finish(&mut self) -> Result<(), DetectionError> {
        (**self).finish()
    }
}

/// In-memory sink
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    pub records: Vec<SpikeRecord>,
    /// Number of batches received
    pub batches: usize,
    pub finished: bool,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpikeSink for VecSink {
    fn write_batch(&mut self, records: &[SpikeRecord]) -> Result<(), DetectionError> {
        self.records.extend_from_slice(records);
        self.batches += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), DetectionError> {
        self.finished = true;
        Ok(())
    }
}

/// One JSON object per line
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Records written so far
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> SpikeSink for JsonLinesSink<W> {
    fn write_batch(&mut self, records: &[SpikeRecord]) -> Result<(), DetectionError> {
        for record in records {
            serde_json::to_writer(&mut self.writer, record).map_err(|err| DetectionError::Sink {
                reason: err.to_string(),
            })?;
            self.writer
                .write_all(b"\n")
                .map_err(|err| DetectionError::Sink {
                    reason: err.to_string(),
                })?;
            self.written += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), DetectionError> {
        self.writer.flush().map_err(|err| DetectionError::Sink {
            reason: err.to_string(),
        })
    }
}
