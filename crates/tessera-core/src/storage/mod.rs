//! The storage contract consumed by the query engine.
//!
//! [`StorageEngine`] is everything the planner and the execution blocks need
//! from a storage layer. [`MemoryStorage`] implements it over sharded
//! in-memory collections with ordered secondary indexes.

mod collection;
mod memory;

pub use memory::MemoryStorage;

use crate::graph::Direction;
use crate::index::{AttributePath, IndexAnswer, IndexOperator};
use crate::statistics::CollectionStatistics;
use serde::{Deserialize, Serialize};
use tessera_common::{Result, Value};

/// Kind of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Plain documents.
    Document,
    /// Edge documents carrying `_from` and `_to`.
    Edge,
}

/// Storage operations the query engine depends on.
///
/// All methods take `&self`; implementations synchronize internally so one
/// storage instance can serve concurrent queries and partition workers.
pub trait StorageEngine: Send + Sync {
    /// Returns true if `collection` exists.
    fn collection_exists(&self, collection: &str) -> bool;

    /// Returns statistics for `collection`.
    fn statistics(&self, collection: &str) -> Result<CollectionStatistics>;

    /// Returns all documents of `collection`, or of one shard of it, in
    /// storage order.
    fn scan(&self, collection: &str, shard: Option<usize>) -> Result<Vec<Value>>;

    /// Asks whether an index can evaluate `path op value` on `collection`.
    fn can_answer(&self, collection: &str, path: &AttributePath, op: IndexOperator)
    -> IndexAnswer;

    /// Returns the documents matching `path op value` via an index, in
    /// storage order.
    fn index_lookup(
        &self,
        collection: &str,
        shard: Option<usize>,
        path: &AttributePath,
        op: IndexOperator,
        value: &Value,
    ) -> Result<Vec<Value>>;

    /// Returns the edges of `edge_collection` incident to `vertex_id`.
    fn edges(&self, edge_collection: &str, vertex_id: &str, direction: Direction)
    -> Result<Vec<Value>>;

    /// Looks up a document by its `collection/key` id.
    fn document(&self, id: &str) -> Result<Option<Value>>;

    /// Inserts a document and returns it as stored.
    fn insert(&self, collection: &str, document: Value) -> Result<Value>;

    /// Merges `patch` into the document with `key` and returns the result.
    fn update(&self, collection: &str, key: &str, patch: Value) -> Result<Value>;

    /// Removes the document with `key` and returns the removed document.
    fn remove(&self, collection: &str, key: &str) -> Result<Value>;
}
