//! Edge adjacency lists.
//!
//! Edge collections keep two adjacency maps, one keyed by `_from` and one by
//! `_to`, so traversals can follow edges in either direction without
//! scanning the collection.

use crate::graph::Direction;
use smallvec::SmallVec;
use tessera_common::utils::hash::{FastHashMap, fast_map};

/// Adjacency for a single vertex: slots of incident edges in insertion order.
type AdjacencyList = SmallVec<[usize; 4]>;

/// Forward and backward adjacency of one edge collection.
#[derive(Debug, Clone)]
pub struct EdgeAdjacency {
    /// Vertex id -> edges whose `_from` is that vertex.
    outgoing: FastHashMap<String, AdjacencyList>,
    /// Vertex id -> edges whose `_to` is that vertex.
    incoming: FastHashMap<String, AdjacencyList>,
    /// Number of live edges.
    edge_count: usize,
}

impl EdgeAdjacency {
    /// Creates empty adjacency lists.
    #[must_use]
    pub fn new() -> Self {
        Self {
            outgoing: fast_map(),
            incoming: fast_map(),
            edge_count: 0,
        }
    }

    /// Registers the edge at `slot` from `from` to `to`.
    pub fn add_edge(&mut self, from: &str, to: &str, slot: usize) {
        self.outgoing.entry(from.to_string()).or_default().push(slot);
        self.incoming.entry(to.to_string()).or_default().push(slot);
        self.edge_count += 1;
    }

    /// Unregisters the edge at `slot`.
    pub fn remove_edge(&mut self, from: &str, to: &str, slot: usize) {
        if let Some(list) = self.outgoing.get_mut(from) {
            list.retain(|s| *s != slot);
        }
        if let Some(list) = self.incoming.get_mut(to) {
            list.retain(|s| *s != slot);
        }
        self.edge_count = self.edge_count.saturating_sub(1);
    }

    /// Returns the slots of edges incident to `vertex` in `direction`.
    ///
    /// For [`Direction::Any`] outgoing edges come first, and a self loop is
    /// reported once.
    #[must_use]
    pub fn edges(&self, vertex: &str, direction: Direction) -> Vec<usize> {
        let out = self.outgoing.get(vertex).map(|l| l.as_slice()).unwrap_or(&[]);
        let inc = self.incoming.get(vertex).map(|l| l.as_slice()).unwrap_or(&[]);
        match direction {
            Direction::Outbound => out.to_vec(),
            Direction::Inbound => inc.to_vec(),
            Direction::Any => {
                let mut all = out.to_vec();
                all.extend(inc.iter().filter(|s| !out.contains(s)));
                all
            }
        }
    }

    /// Returns the number of live edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Average out-degree over vertices that have at least one outgoing edge.
    #[must_use]
    pub fn average_degree(&self) -> f64 {
        let vertices = self.outgoing.values().filter(|l| !l.is_empty()).count();
        if vertices == 0 {
            0.0
        } else {
            self.edge_count as f64 / vertices as f64
        }
    }
}

impl Default for EdgeAdjacency {
    fn default() -> Self {
        Self::new()
    }
}
