//! Graph traversal.
//!
//! The [`Traverser`] walks an edge collection from a start vertex up to a
//! maximum depth. Every visited element (the start vertex included) is handed
//! to a decision callback that says whether to emit it and whether to prune
//! descent below it. Pruning stops exploration strictly below the vertex;
//! the vertex itself is still emitted if the callback accepts it.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tessera_common::utils::hash::{FastHashSet, fast_set};
use tessera_common::{Error, Result, Value};
use tessera_core::{Direction, StorageEngine};
use tracing::debug;

/// Visitation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TraversalOrder {
    /// Depth-first, pre-order.
    #[default]
    DepthFirst,
    /// Breadth-first, level by level.
    BreadthFirst,
}

/// Vertex uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UniqueVertices {
    /// Vertices may repeat.
    #[default]
    None,
    /// A vertex appears at most once per path.
    Path,
    /// A vertex is visited at most once per traversal. Requires
    /// breadth-first order.
    Global,
}

/// Edge uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UniqueEdges {
    /// An edge appears at most once per path.
    #[default]
    Path,
    /// Edges may repeat.
    None,
}

/// Traversal options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TraversalOptions {
    /// Visitation order.
    pub order: TraversalOrder,
    /// Vertex uniqueness.
    pub unique_vertices: UniqueVertices,
    /// Edge uniqueness.
    pub unique_edges: UniqueEdges,
}

impl TraversalOptions {
    /// Depth-first, no vertex uniqueness, unique edges per path.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the visitation order.
    #[must_use]
    pub fn with_order(mut self, order: TraversalOrder) -> Self {
        self.order = order;
        self
    }

    /// Sets vertex uniqueness.
    #[must_use]
    pub fn with_unique_vertices(mut self, unique: UniqueVertices) -> Self {
        self.unique_vertices = unique;
        self
    }

    /// Sets edge uniqueness.
    #[must_use]
    pub fn with_unique_edges(mut self, unique: UniqueEdges) -> Self {
        self.unique_edges = unique;
        self
    }
}

/// One visited element.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// The vertex document, or null if it does not exist.
    pub vertex: Value,
    /// The edge leading to the vertex; null for the start vertex.
    pub edge: Value,
    /// Distance from the start vertex.
    pub depth: u32,
    vertex_ids: Vec<String>,
    edge_ids: Vec<String>,
    vertices: Vec<Value>,
    edges: Vec<Value>,
}

impl Step {
    /// `{vertices, edges}` from the start vertex to this one.
    #[must_use]
    pub fn path(&self) -> Value {
        Value::map([
            ("vertices", Value::List(self.vertices.clone())),
            ("edges", Value::List(self.edges.clone())),
        ])
    }

    fn vertex_id(&self) -> &str {
        self.vertex_ids.last().map_or("", String::as_str)
    }

    fn extend(&self, edge: Value, edge_id: String, vertex: Value, vertex_id: String) -> Step {
        let mut next = self.clone();
        next.depth += 1;
        next.vertex_ids.push(vertex_id);
        next.edge_ids.push(edge_id);
        next.vertices.push(vertex.clone());
        next.edges.push(edge.clone());
        next.vertex = vertex;
        next.edge = edge;
        next
    }
}

/// What to do with a visited element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Emit the element if it is within the depth range.
    pub emit: bool,
    /// Do not descend below the element.
    pub prune: bool,
}

/// Walks one edge collection.
pub struct Traverser<'a> {
    storage: &'a dyn StorageEngine,
    edge_collection: &'a str,
    direction: Direction,
    min_depth: u32,
    max_depth: u32,
    options: TraversalOptions,
}

impl<'a> Traverser<'a> {
    /// Creates a traverser.
    ///
    /// Global vertex uniqueness without breadth-first order is rejected.
    pub fn new(
        storage: &'a dyn StorageEngine,
        edge_collection: &'a str,
        direction: Direction,
        min_depth: u32,
        max_depth: u32,
        options: TraversalOptions,
    ) -> Result<Self> {
        if options.unique_vertices == UniqueVertices::Global
            && options.order != TraversalOrder::BreadthFirst
        {
            return Err(Error::InvalidQuery(
                "uniqueVertices 'global' requires breadth-first traversal".to_string(),
            ));
        }
        Ok(Self {
            storage,
            edge_collection,
            direction,
            min_depth,
            max_depth,
            options,
        })
    }

    /// Traverses from `start_id`, calling `decide` on every visited element,
    /// and returns the emitted elements in visitation order.
    pub fn run(
        &self,
        start_id: &str,
        mut decide: impl FnMut(&Step) -> Result<Decision>,
    ) -> Result<Vec<Step>> {
        let start_vertex = self.storage.document(start_id)?.unwrap_or_default();
        let start = Step {
            vertex: start_vertex.clone(),
            edge: Value::Null,
            depth: 0,
            vertex_ids: vec![start_id.to_string()],
            edge_ids: Vec::new(),
            vertices: vec![start_vertex],
            edges: Vec::new(),
        };

        let mut visited: FastHashSet<String> = fast_set();
        if self.options.unique_vertices == UniqueVertices::Global {
            visited.insert(start_id.to_string());
        }

        let mut out = Vec::new();
        let mut pending = VecDeque::from([start]);
        while let Some(step) = match self.options.order {
            TraversalOrder::DepthFirst => pending.pop_back(),
            TraversalOrder::BreadthFirst => pending.pop_front(),
        } {
            let decision = decide(&step)?;
            let descend = !decision.prune && step.depth < self.max_depth;
            if descend {
                let mut next = self.expand(&step, &mut visited)?;
                if self.options.order == TraversalOrder::DepthFirst {
                    // Stack: the first neighbor must be popped first.
                    next.reverse();
                }
                pending.extend(next);
            }
            if decision.emit && step.depth >= self.min_depth {
                out.push(step);
            }
        }
        debug!(start = start_id, emitted = out.len(), "traversal finished");
        Ok(out)
    }

    fn expand(&self, step: &Step, visited: &mut FastHashSet<String>) -> Result<Vec<Step>> {
        let current = step.vertex_id();
        let mut next = Vec::new();
        for edge in self.storage.edges(self.edge_collection, current, self.direction)? {
            let edge_id = edge.attribute("_id").as_str().unwrap_or_default().to_string();
            let from = edge.attribute("_from");
            let to = edge.attribute("_to");
            let (Some(from), Some(to)) = (from.as_str(), to.as_str()) else {
                continue;
            };
            let target = self.direction.other_end(from, to, current).to_string();

            if self.options.unique_edges == UniqueEdges::Path && step.edge_ids.contains(&edge_id) {
                continue;
            }
            match self.options.unique_vertices {
                UniqueVertices::None => {}
                UniqueVertices::Path => {
                    if step.vertex_ids.contains(&target) {
                        continue;
                    }
                }
                UniqueVertices::Global => {
                    if !visited.insert(target.clone()) {
                        continue;
                    }
                }
            }
            let vertex = self.storage.document(&target)?.unwrap_or_default();
            next.push(step.extend(edge, edge_id, vertex, target));
        }
        Ok(next)
    }
}

/// Resolves a traversal start value: a document id string or a document
/// carrying `_id`. Anything else yields `None`.
#[must_use]
pub fn start_vertex_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if id.contains('/') => Some(id.clone()),
        Value::Map(_) => value.attribute("_id").as_str().map(str::to_string),
        _ => None,
    }
}
