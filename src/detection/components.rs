// ComponentDetector - union-find labeling over a (time x channel) grid
//
// Above-weak pixels are appended to an arena in time-major order. Only the
// labels of the last `join_size + 1` rows are kept, so memory is bounded by
// the number of pixels rather than the chunk area.

use super::{Component, Pixel};
use crate::calibration::Threshold;
use crate::config::{DetektConfig, Polarity};
use crate::probe::ChannelGraph;
use crate::source::Samples;

/// Disjoint sets over arena indices (path halving, union by size)
#[derive(Debug, Default)]
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn push(&mut self) -> usize {
        let id = self.parent.len();
        self.parent.push(id);
        self.size.push(1);
        id
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut a, mut b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        if self.size[a] < self.size[b] {
            std::mem::swap(&mut a, &mut b);
        }
        self.parent[b] = a;
        self.size[a] += self.size[b];
    }
}

/// Finds connected components in filtered chunks
#[derive(Debug, Clone)]
pub struct ComponentDetector {
    graph: ChannelGraph,
    join_size: usize,
    max_duration: usize,
    polarity: Polarity,
}

impl ComponentDetector {
    pub fn new(graph: ChannelGraph, join_size: usize, max_duration: usize, polarity: Polarity) -> Self {
        Self {
            graph,
            join_size,
            max_duration,
            polarity,
        }
    }

    pub fn from_config(config: &DetektConfig, graph: ChannelGraph) -> Self {
        Self::new(
            graph,
            config.connected_component_join_size,
            config.max_component_duration,
            config.polarity,
        )
    }

    pub fn graph(&self) -> &ChannelGraph {
        &self.graph
    }

    pub fn join_size(&self) -> usize {
        self.join_size
    }

    pub fn max_duration(&self) -> usize {
        self.max_duration
    }

    /// Label every connected set of above-weak pixels, seeded or not
    ///
    /// # Arguments
    /// * `filtered` - Filtered samples, shape (time, channels)
    /// * `start` - Absolute sample index of row 0
    /// * `threshold` - Per-channel thresholds
    ///
    /// # Returns
    /// Components sorted by start time
    pub fn label(&self, filtered: &Samples, start: u64, threshold: &Threshold) -> Vec<Component> {
        let n_channels = filtered.n_channels();
        let rows = self.join_size + 1;

        let mut arena: Vec<Pixel> = Vec::new();
        let mut sets = UnionFind::default();
        // labels[(t % rows) * n_channels + c] = arena index of pixel (t, c)
        let mut labels: Vec<Option<usize>> = vec![None; rows * n_channels];

        for t in 0..filtered.n_samples() {
            let slot = (t % rows) * n_channels;
            labels[slot..slot + n_channels].fill(None);

            for c in 0..n_channels {
                let value = self.polarity.adjust(filtered.get(t, c));
                if !(value > threshold.weak(c)) {
                    continue;
                }

                let id = sets.push();
                arena.push(Pixel {
                    time: start + t as u64,
                    channel: c,
                    value,
                });
                labels[slot + c] = Some(id);

                for dt in 0..=self.join_size.min(t) {
                    let row = ((t - dt) % rows) * n_channels;
                    let same = if dt == 0 { None } else { labels[row + c] };
                    if let Some(other) = same {
                        sets.union(id, other);
                    }
                    for &n in self.graph.neighbors(c) {
                        if let Some(other) = labels[row + n] {
                            sets.union(id, other);
                        }
                    }
                }
            }
        }

        // Group pixels by root; arena order is time-major so groups come out by start
        let mut group_of_root: Vec<Option<usize>> = vec![None; arena.len()];
        let mut groups: Vec<Vec<Pixel>> = Vec::new();
        for (id, pixel) in arena.iter().enumerate() {
            let root = sets.find(id);
            let group = match group_of_root[root] {
                Some(g) => g,
                None => {
                    groups.push(Vec::new());
                    group_of_root[root] = Some(groups.len() - 1);
                    groups.len() - 1
                }
            };
            groups[group].push(*pixel);
        }

        groups
            .into_iter()
            .filter_map(|pixels| Component::from_pixels(pixels, threshold))
            .collect()
    }

    /// Seeded components no longer than the maximum duration
    ///
    /// Long components are artifacts; they are logged and dropped, not
    /// treated as errors.
    pub fn detect(&self, filtered: &Samples, start: u64, threshold: &Threshold) -> Vec<Component> {
        let mut rejected = 0usize;
        let spikes: Vec<Component> = self
            .label(filtered, start, threshold)
            .into_iter()
            .filter(|component| {
                if !component.has_seed {
                    return false;
                }
                if component.is_spike(self.max_duration) {
                    return true;
                }
                rejected += 1;
                false
            })
            .collect();

        if rejected > 0 {
            tracing::debug!(
                "[Detection] Rejected {} components longer than {} samples",
                rejected,
                self.max_duration
            );
        }
        spikes
    }
}
