//! Probe geometry - which channels are spatial neighbours
//!
//! Connected components grow across channels only along the edges of this
//! graph. Probe files are JSON:
//!
//! ```json
//! { "channels": 4, "graph": [[0, 1], [1, 2], [2, 3]] }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// On-disk probe description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeFile {
    pub channels: usize,
    #[serde(default)]
    pub graph: Vec<[usize; 2]>,
}

/// Symmetric channel adjacency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelGraph {
    neighbors: Vec<Vec<usize>>,
}

impl ChannelGraph {
    /// Graph without any edges: components never span channels
    pub fn isolated(n_channels: usize) -> Self {
        Self {
            neighbors: vec![Vec::new(); n_channels],
        }
    }

    /// Linear probe: channel `i` touches `i - 1` and `i + 1`
    pub fn linear(n_channels: usize) -> Self {
        let edges: Vec<[usize; 2]> = (1..n_channels).map(|c| [c - 1, c]).collect();
        Self::build(n_channels, &edges)
    }

    /// Every channel touches every other channel
    pub fn complete(n_channels: usize) -> Self {
        let mut edges = Vec::new();
        for a in 0..n_channels {
            for b in (a + 1)..n_channels {
                edges.push([a, b]);
            }
        }
        Self::build(n_channels, &edges)
    }

    /// Graph from an explicit edge list
    ///
    /// # Returns
    /// * `Err(ConfigError::InvalidProbe)` - Edge references an unknown channel or is a self loop
    pub fn from_edges(n_channels: usize, edges: &[[usize; 2]]) -> Result<Self, ConfigError> {
        for &[a, b] in edges {
            if a >= n_channels || b >= n_channels {
                return Err(ConfigError::InvalidProbe {
                    reason: format!(
                        "edge ({}, {}) references a channel outside 0..{}",
                        a, b, n_channels
                    ),
                });
            }
            if a == b {
                return Err(ConfigError::InvalidProbe {
                    reason: format!("self edge on channel {}", a),
                });
            }
        }
        Ok(Self::build(n_channels, edges))
    }

    /// Load a JSON probe file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let display = path.as_ref().display().to_string();
        let contents = fs::read_to_string(&path).map_err(|err| ConfigError::Unreadable {
            path: display.clone(),
            reason: err.to_string(),
        })?;
        let probe: ProbeFile =
            serde_json::from_str(&contents).map_err(|err| ConfigError::Malformed {
                path: display.clone(),
                reason: err.to_string(),
            })?;
        let graph = Self::from_edges(probe.channels, &probe.graph)?;
        log::info!(
            "[Probe] Loaded {} channels / {} edges from {}",
            probe.channels,
            probe.graph.len(),
            display
        );
        Ok(graph)
    }

    fn build(n_channels: usize, edges: &[[usize; 2]]) -> Self {
        let mut neighbors = vec![Vec::new(); n_channels];
        for &[a, b] in edges {
            neighbors[a].push(b);
            neighbors[b].push(a);
        }
        for list in neighbors.iter_mut() {
            list.sort_unstable();
            list.dedup();
        }
        Self { neighbors }
    }

    pub fn n_channels(&self) -> usize {
        self.neighbors.len()
    }

    pub fn neighbors(&self, channel: usize) -> &[usize] {
        &self.neighbors[channel]
    }

    /// Same channel or joined by an edge
    pub fn touches(&self, a: usize, b: usize) -> bool {
        a == b || self.neighbors[a].binary_search(&b).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_graph() {
        let graph = ChannelGraph::linear(4);
        assert_eq!(graph.neighbors(0), &[1]);
        assert_eq!(graph.neighbors(2), &[1, 3]);
        assert!(graph.touches(3, 2));
        assert!(!graph.touches(0, 2));
        assert!(graph.touches(1, 1));
    }

    #[test]
    fn test_complete_and_isolated() {
        assert_eq!(ChannelGraph::complete(3).neighbors(1), &[0, 2]);
        assert!(ChannelGraph::isolated(3).neighbors(1).is_empty());
    }

    #[test]
    fn test_from_edges_symmetric_and_deduplicated() {
        let graph = ChannelGraph::from_edges(3, &[[0, 2], [2, 0]]).unwrap();
        assert_eq!(graph.neighbors(0), &[2]);
        assert_eq!(graph.neighbors(2), &[0]);
    }

    #[test]
    fn test_from_edges_rejects_bad_edges() {
        assert!(matches!(
            ChannelGraph::from_edges(2, &[[0, 2]]),
            Err(ConfigError::InvalidProbe { .. })
        ));
        assert!(matches!(
            ChannelGraph::from_edges(2, &[[1, 1]]),
            Err(ConfigError::InvalidProbe { .. })
        ));
    }

    #[test]
    fn test_load_probe_file() {
        let path = std::env::temp_dir().join(format!("spikedetekt_probe_{}.json", std::process::id()));
        fs::write(&path, r#"{"channels": 3, "graph": [[0, 1], [1, 2]]}"#).unwrap();
        let graph = ChannelGraph::load_from_file(&path).unwrap();
        assert_eq!(graph, ChannelGraph::linear(3));
        fs::remove_file(&path).ok();
    }
}
