// Raw data sources - chunked access to multichannel recordings
//
// The pipeline never holds a whole recording. It asks a `ChunkSource` for
// arbitrary sample ranges and walks the recording with a `ChunkPlan`:
//
//   chunk i data:  [keep_start - overlap, keep_end)
//   chunk i keep:  [i * chunk_size, (i + 1) * chunk_size)
//
// Consecutive chunks therefore share exactly `chunk_overlap` samples, which
// is where components straddling a boundary are reconciled. Excerpts for
// threshold calibration are evenly spaced ranges over the same source.

mod array;
mod dat;
mod wav;

pub use array::ArraySource;
pub use dat::{write_dat, DatSource};
pub use wav::WavSource;

use crate::error::DetectionError;

/// Time-major block of samples, shape (time, channels)
#[derive(Debug, Clone, PartialEq)]
pub struct Samples {
    n_channels: usize,
    data: Vec<f32>,
}

impl Samples {
    /// Wrap interleaved samples
    ///
    /// # Panics
    /// Panics if `n_channels` is 0 or `data.len()` is not a multiple of it
    pub fn from_interleaved(n_channels: usize, data: Vec<f32>) -> Self {
        assert!(n_channels > 0, "n_channels must be greater than 0");
        assert_eq!(
            data.len() % n_channels,
            0,
            "sample count must be a multiple of the channel count"
        );
        Self { n_channels, data }
    }

    /// All-zero block
    pub fn zeros(n_samples: usize, n_channels: usize) -> Self {
        Self::from_interleaved(n_channels, vec![0.0; n_samples * n_channels])
    }

    /// Build from one vector per channel (all the same length)
    pub fn from_channels(channels: &[Vec<f32>]) -> Self {
        let n_channels = channels.len();
        let n_samples = channels.first().map(|c| c.len()).unwrap_or(0);
        let mut out = Self::zeros(n_samples, n_channels.max(1));
        for (c, column) in channels.iter().enumerate() {
            for (t, &value) in column.iter().enumerate() {
                out.set(t, c, value);
            }
        }
        out
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn n_samples(&self) -> usize {
        self.data.len() / self.n_channels
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, t: usize, c: usize) -> f32 {
        self.data[t * self.n_channels + c]
    }

    #[inline]
    pub fn set(&mut self, t: usize, c: usize, value: f32) {
        self.data[t * self.n_channels + c] = value;
    }

    /// One time step across all channels
    pub fn row(&self, t: usize) -> &[f32] {
        &self.data[t * self.n_channels..(t + 1) * self.n_channels]
    }

    /// Copy of one channel's trace
    pub fn channel(&self, c: usize) -> Vec<f32> {
        self.data
            .iter()
            .skip(c)
            .step_by(self.n_channels)
            .copied()
            .collect()
    }

    /// Overwrite one channel's trace
    pub fn set_channel(&mut self, c: usize, values: &[f32]) {
        for (t, &value) in values.iter().enumerate().take(self.n_samples()) {
            self.set(t, c, value);
        }
    }

    /// Copy of rows `[start, end)`
    pub fn slice_rows(&self, start: usize, end: usize) -> Samples {
        let end = end.min(self.n_samples());
        let start = start.min(end);
        Samples {
            n_channels: self.n_channels,
            data: self.data[start * self.n_channels..end * self.n_channels].to_vec(),
        }
    }

    /// Rows of `self` followed by rows of `other`
    pub fn concat_rows(&self, other: &Samples) -> Samples {
        debug_assert_eq!(self.n_channels, other.n_channels);
        let mut data = Vec::with_capacity(self.data.len() + other.data.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);
        Samples {
            n_channels: self.n_channels,
            data,
        }
    }

    /// Position of the first NaN or infinite sample as (time, channel)
    pub fn first_non_finite(&self) -> Option<(usize, usize)> {
        self.data
            .iter()
            .position(|v| !v.is_finite())
            .map(|i| (i / self.n_channels, i % self.n_channels))
    }

    pub fn as_interleaved(&self) -> &[f32] {
        &self.data
    }
}

/// Random-access reader of a multichannel recording
///
/// Implementations must return exactly `len` rows for any range inside
/// `[0, n_samples())`.
pub trait ChunkSource {
    fn n_channels(&self) -> usize;

    fn n_samples(&self) -> u64;

    fn sample_rate(&self) -> f64;

    /// Read rows `[start, start + len)`
    fn read(&mut self, start: u64, len: usize) -> Result<Samples, DetectionError>;
}

impl<S: ChunkSource + ?Sized> ChunkSource for &mut S {
    fn n_channels(&self) -> usize {
        (**self).n_channels()
    }

    fn n_samples(&self) -> u64 {
        (**self).n_samples()
    }

    fn sample_rate(&self) -> f64 {
        (**self).sample_rate()
    }

    fn read(&mut self, start: u64, len: usize) -> Result<Samples, DetectionError> {
        (**self).read(start, len)
    }
}

/// Absolute sample ranges of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    pub index: usize,
    /// First sample held by the chunk (start of the leading overlap)
    pub data_start: u64,
    /// First sample this chunk is responsible for
    pub keep_start: u64,
    /// One past the last sample this chunk is responsible for
    pub keep_end: u64,
    /// One past the last sample held by the chunk
    pub data_end: u64,
}

impl ChunkBounds {
    pub fn len(&self) -> usize {
        (self.data_end - self.data_start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.data_end == self.data_start
    }

    /// Samples of leading overlap actually present
    pub fn overlap(&self) -> u64 {
        self.keep_start - self.data_start
    }
}

/// Iterator over the chunks covering a recording
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    n_samples: u64,
    chunk_size: u64,
    overlap: u64,
    next: usize,
}

impl ChunkPlan {
    /// Plan chunks of `chunk_size` kept samples sharing `overlap` samples
    ///
    /// # Panics
    /// Panics if `chunk_size` is 0
    pub fn new(n_samples: u64, chunk_size: usize, overlap: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be greater than 0");
        Self {
            n_samples,
            chunk_size: chunk_size as u64,
            overlap: overlap as u64,
            next: 0,
        }
    }

    /// Number of chunks in the plan
    pub fn chunk_count(&self) -> usize {
        self.n_samples.div_ceil(self.chunk_size) as usize
    }
}

impl Iterator for ChunkPlan {
    type Item = ChunkBounds;

    fn next(&mut self) -> Option<ChunkBounds> {
        let keep_start = self.next as u64 * self.chunk_size;
        if keep_start >= self.n_samples {
            return None;
        }
        let keep_end = (keep_start + self.chunk_size).min(self.n_samples);
        let bounds = ChunkBounds {
            index: self.next,
            data_start: keep_start.saturating_sub(self.overlap),
            keep_start,
            keep_end,
            data_end: keep_end,
        };
        self.next += 1;
        Some(bounds)
    }
}

/// Evenly spaced excerpt ranges `(start, len)` for threshold calibration
///
/// Short recordings yield fewer (possibly a single, shortened) excerpts;
/// identical ranges are never returned twice.
pub fn excerpt_ranges(n_samples: u64, nexcerpts: usize, excerpt_size: usize) -> Vec<(u64, usize)> {
    if n_samples == 0 || nexcerpts == 0 || excerpt_size == 0 {
        return Vec::new();
    }

    let size = (excerpt_size as u64).min(n_samples);
    let span = n_samples - size;
    let mut ranges: Vec<(u64, usize)> = Vec::with_capacity(nexcerpts);
    for i in 0..nexcerpts {
        let start = if nexcerpts == 1 {
            0
        } else {
            span * i as u64 / (nexcerpts as u64 - 1)
        };
        if ranges.last().map(|&(s, _)| s != start).unwrap_or(true) {
            ranges.push((start, size as usize));
        }
    }
    ranges
}

/// Read `[start, end)` extended by up to `margin` samples on both sides
///
/// # Returns
/// The block together with the number of margin rows actually read before
/// `start` (clipped at the recording start).
pub fn read_with_margin<S: ChunkSource + ?Sized>(
    source: &mut S,
    start: u64,
    end: u64,
    margin: usize,
) -> Result<(Samples, usize), DetectionError> {
    let ext_start = start.saturating_sub(margin as u64);
    let ext_end = (end + margin as u64).min(source.n_samples());
    let block = source.read(ext_start, (ext_end - ext_start) as usize)?;
    Ok((block, (start - ext_start) as usize))
}

/// Cut the margin of `block` at the nearest non-finite row on either side
///
/// Rows `[lead, lead + len)` are the data range and are always kept; margin
/// rows are kept only while every row between them and the data range is
/// finite on all channels.
///
/// # Returns
/// The trimmed block and its new lead.
pub fn trim_margin_to_finite(block: &Samples, lead: usize, len: usize) -> (Samples, usize) {
    let finite = |t: usize| block.row(t).iter().all(|v| v.is_finite());

    let mut start = lead;
    while start > 0 && finite(start - 1) {
        start -= 1;
    }
    let mut end = lead + len;
    while end < block.n_samples() && finite(end) {
        end += 1;
    }

    (block.slice_rows(start, end), lead - start)
}
