// Stitched sample view across a chunk boundary
//
// A waveform window around a spike near the start of a chunk may reach
// further back than the chunk's leading overlap. The extraction stage keeps
// the tail of the previous chunk (the carry) and reads through a view that
// uses the carry before the split point and the current chunk after it.

use crate::source::Samples;

/// Raw and filtered samples of one contiguous absolute range
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: u64,
    pub raw: Samples,
    pub filtered: Samples,
}

impl Segment {
    pub fn new(start: u64, raw: Samples, filtered: Samples) -> Self {
        debug_assert_eq!(raw.n_samples(), filtered.n_samples());
        Self {
            start,
            raw,
            filtered,
        }
    }

    pub fn end(&self) -> u64 {
        self.start + self.raw.n_samples() as u64
    }

    pub fn n_channels(&self) -> usize {
        self.raw.n_channels()
    }

    fn contains(&self, t: u64) -> bool {
        t >= self.start && t < self.end()
    }
}

/// Read-only view over the carry and the current chunk
#[derive(Debug, Clone, Copy)]
pub struct ChunkView<'a> {
    carry: Option<&'a Segment>,
    current: &'a Segment,
    split: u64,
}

impl<'a> ChunkView<'a> {
    /// View over a single segment
    pub fn single(current: &'a Segment) -> Self {
        Self {
            carry: None,
            current,
            split: current.start,
        }
    }

    /// View preferring `carry` before `split` and `current` from `split` on
    ///
    /// A carry that does not reach the current segment is ignored.
    pub fn stitched(carry: Option<&'a Segment>, current: &'a Segment, split: u64) -> Self {
        let carry = carry.filter(|c| c.end() >= current.start && c.start < current.start);
        Self {
            carry,
            current,
            split,
        }
    }

    /// Absolute range `[start, end)` readable through the view
    pub fn available(&self) -> (u64, u64) {
        let start = self
            .carry
            .map(|c| c.start.min(self.current.start))
            .unwrap_or(self.current.start);
        (start, self.current.end())
    }

    pub fn n_channels(&self) -> usize {
        self.current.n_channels()
    }

    fn locate(&self, t: u64) -> Option<(&'a Segment, usize)> {
        let pick = match self.carry {
            Some(carry) if t < self.split && carry.contains(t) => carry,
            _ if self.current.contains(t) => self.current,
            Some(carry) if carry.contains(t) => carry,
            _ => return None,
        };
        Some((pick, (t - pick.start) as usize))
    }

    pub fn filtered(&self, t: u64, channel: usize) -> Option<f32> {
        self.locate(t)
            .map(|(segment, row)| segment.filtered.get(row, channel))
    }

    pub fn raw(&self, t: u64, channel: usize) -> Option<f32> {
        self.locate(t).map(|(segment, row)| segment.raw.get(row, channel))
    }

    /// Copy `[start, end)` (clipped to the view) into a standalone segment
    pub fn segment(&self, start: u64, end: u64) -> Segment {
        let (available_start, available_end) = self.available();
        let start = start.max(available_start);
        let end = end.min(available_end).max(start);
        let n_channels = self.n_channels();
        let len = (end - start) as usize;

        let mut raw = Samples::zeros(len, n_channels);
        let mut filtered = Samples::zeros(len, n_channels);
        for row in 0..len {
            if let Some((segment, src)) = self.locate(start + row as u64) {
                for c in 0..n_channels {
                    raw.set(row, c, segment.raw.get(src, c));
                    filtered.set(row, c, segment.filtered.get(src, c));
                }
            }
        }
        Segment::new(start, raw, filtered)
    }
}
