//! Collection statistics for cost-based optimization.

use crate::storage::CollectionKind;
use serde::{Deserialize, Serialize};

/// Statistics the optimizer consumes for one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionStatistics {
    /// Collection name.
    pub name: String,
    /// Document or edge collection.
    pub kind: CollectionKind,
    /// Number of live documents.
    pub document_count: u64,
    /// Number of shards the collection is split into.
    pub shard_count: usize,
    /// Average number of outgoing edges per source vertex (edge collections).
    pub average_degree: f64,
}

impl CollectionStatistics {
    /// Creates statistics for a collection with `document_count` documents in
    /// a single shard.
    #[must_use]
    pub fn new(name: &str, kind: CollectionKind, document_count: u64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            document_count,
            shard_count: 1,
            average_degree: 0.0,
        }
    }

    /// Sets the shard count.
    #[must_use]
    pub fn with_shards(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count.max(1);
        self
    }

    /// Sets the average degree.
    #[must_use]
    pub fn with_average_degree(mut self, degree: f64) -> Self {
        self.average_degree = degree;
        self
    }
}
