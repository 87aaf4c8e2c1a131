// In-memory recording source

use super::{ChunkSource, Samples};
use crate::error::DetectionError;

/// Recording held entirely in memory
///
/// Used for synthetic recordings, tests and callers that already decoded
/// their data.
#[derive(Debug, Clone)]
pub struct ArraySource {
    samples: Samples,
    sample_rate: f64,
}

impl ArraySource {
    pub fn new(samples: Samples, sample_rate: f64) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn into_samples(self) -> Samples {
        self.samples
    }
}

impl ChunkSource for ArraySource {
    fn n_channels(&self) -> usize {
        self.samples.n_channels()
    }

    fn n_samples(&self) -> u64 {
        self.samples.n_samples() as u64
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn read(&mut self, start: u64, len: usize) -> Result<Samples, DetectionError> {
        let end = start + len as u64;
        if end > self.n_samples() {
            return Err(DetectionError::Source {
                reason: format!(
                    "range [{}, {}) past end of recording ({} samples)",
                    start,
                    end,
                    self.n_samples()
                ),
            });
        }
        Ok(self.samples.slice_rows(start as usize, end as usize))
    }
}
