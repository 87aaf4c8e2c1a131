// BoundaryReconciler - exactly-once emission across chunk boundaries
//
// A component that ends close to the end of a chunk may continue in the
// next one. It is held back as a pending tail, together with every
// component that starts after it (so output stays sorted by start). When
// the next chunk arrives:
// - components touching a pending tail are merged with it; overlapping
//   pixels take the newer chunk's value from the middle of the overlap on
// - pending tails without a continuation are emitted as they are
// - components starting in the leading overlap that touch nothing were
//   already emitted by the previous chunk and are dropped
// Seed and duration checks run on the merged result.

use std::collections::BTreeMap;

use super::{Component, Pixel};
use crate::calibration::Threshold;
use crate::probe::ChannelGraph;
use crate::source::ChunkBounds;

/// Output of one reconciliation step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    /// Valid components, sorted by start
    pub components: Vec<Component>,
    /// Seeded components dropped for exceeding the maximum duration
    pub rejected: usize,
}

/// Pending-tail state passed from one chunk to the next
#[derive(Debug, Clone)]
pub struct BoundaryReconciler {
    graph: ChannelGraph,
    join_size: u64,
    max_duration: usize,
    pending: Vec<Component>,
    /// Previous chunk was skipped, so nothing in the leading overlap was emitted
    after_gap: bool,
}

impl BoundaryReconciler {
    pub fn new(graph: ChannelGraph, join_size: usize, max_duration: usize) -> Self {
        Self {
            graph,
            join_size: join_size as u64,
            max_duration,
            pending: Vec::new(),
            after_gap: false,
        }
    }

    /// Components held back for the next chunk
    pub fn pending(&self) -> &[Component] {
        &self.pending
    }

    /// Forget pending tails after a skipped chunk
    pub fn reset(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                "[Detection] Dropping {} pending components at skipped chunk",
                self.pending.len()
            );
        }
        self.pending.clear();
        self.after_gap = true;
    }

    /// Reconcile one chunk's labeled components with the pending tails
    ///
    /// # Arguments
    /// * `bounds` - Ranges of the chunk the components were labeled in
    /// * `components` - Every labeled component of the chunk (seeded or not), sorted by start
    /// * `overlap` - Configured chunk overlap in samples
    /// * `at_recording_end` - The chunk's data reaches the end of the recording
    /// * `threshold` - Thresholds used to re-judge seeds after merging
    pub fn process(
        &mut self,
        bounds: &ChunkBounds,
        components: Vec<Component>,
        overlap: usize,
        at_recording_end: bool,
        threshold: &Threshold,
    ) -> Reconciled {
        let pending = std::mem::take(&mut self.pending);
        let after_gap = std::mem::replace(&mut self.after_gap, false);
        let split = bounds.data_start + bounds.overlap() / 2;

        // Union pending tails (0..p) with new components (p..p+n) they touch
        let p = pending.len();
        let mut group: Vec<usize> = (0..p + components.len()).collect();
        let candidate_limit = bounds.keep_start + self.join_size + 1;
        for (j, component) in components.iter().enumerate() {
            if component.start >= candidate_limit {
                break;
            }
            for (i, tail) in pending.iter().enumerate() {
                if self.touches(tail, component) {
                    let (a, b) = (root(&mut group, i), root(&mut group, p + j));
                    group[b.max(a)] = a.min(b);
                }
            }
        }

        let mut merged: BTreeMap<usize, (Vec<Component>, Vec<Component>)> = BTreeMap::new();
        let mut candidates: Vec<Component> = Vec::new();
        let mut duplicates = 0usize;
        for (i, tail) in pending.into_iter().enumerate() {
            let r = root(&mut group, i);
            merged.entry(r).or_default().0.push(tail);
        }
        for (j, component) in components.into_iter().enumerate() {
            let r = root(&mut group, p + j);
            if r < p {
                merged.entry(r).or_default().1.push(component);
            } else if component.start < bounds.keep_start && !after_gap {
                duplicates += 1;
            } else {
                candidates.push(component);
            }
        }

        for (_, (older, newer)) in merged {
            if newer.is_empty() {
                candidates.extend(older);
            } else if let Some(component) = merge(older, newer, split, threshold) {
                candidates.push(component);
            }
        }
        candidates.sort_by_key(|c| (c.start, c.end));

        if duplicates > 0 {
            tracing::trace!(
                "[Detection] Chunk {}: {} components already emitted by the previous chunk",
                bounds.index,
                duplicates
            );
        }

        // Hold back everything from the first component that may continue
        if !at_recording_end {
            let horizon = bounds.data_end.saturating_sub(overlap as u64 / 2 + self.join_size);
            if let Some(first) = candidates.iter().position(|c| c.end >= horizon) {
                self.pending = candidates.split_off(first);
            }
        }

        self.finish(candidates)
    }

    /// Emit whatever is still pending at the end of the stream
    pub fn flush(&mut self) -> Reconciled {
        let pending = std::mem::take(&mut self.pending);
        self.finish(pending)
    }

    fn finish(&self, candidates: Vec<Component>) -> Reconciled {
        let mut out = Reconciled::default();
        for component in candidates {
            if !component.has_seed {
                continue;
            }
            if component.is_spike(self.max_duration) {
                out.components.push(component);
            } else {
                out.rejected += 1;
            }
        }
        out
    }

    fn touches(&self, a: &Component, b: &Component) -> bool {
        if a.start > b.end + self.join_size || b.start > a.end + self.join_size {
            return false;
        }
        a.pixels.iter().any(|pa| {
            b.pixels.iter().any(|pb| {
                pa.time.abs_diff(pb.time) <= self.join_size
                    && self.graph.touches(pa.channel, pb.channel)
            })
        })
    }
}

fn root(group: &mut [usize], mut x: usize) -> usize {
    while group[x] != x {
        group[x] = group[group[x]];
        x = group[x];
    }
    x
}

/// Merge pending tails with their continuation in the newer chunk
fn merge(
    older: Vec<Component>,
    newer: Vec<Component>,
    split: u64,
    threshold: &Threshold,
) -> Option<Component> {
    let mut pixels: BTreeMap<(u64, usize), f32> = BTreeMap::new();
    for pixel in older.iter().flat_map(|c| c.pixels.iter()) {
        pixels.insert((pixel.time, pixel.channel), pixel.value);
    }
    for pixel in newer.iter().flat_map(|c| c.pixels.iter()) {
        let key = (pixel.time, pixel.channel);
        if pixel.time >= split || !pixels.contains_key(&key) {
            pixels.insert(key, pixel.value);
        }
    }

    let pixels = pixels
        .into_iter()
        .map(|((time, channel), value)| Pixel {
            time,
            channel,
            value,
        })
        .collect();
    Component::from_pixels(pixels, threshold)
}
