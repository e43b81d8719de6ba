//! In-memory storage engine.

use super::collection::Collection;
use super::{CollectionKind, StorageEngine};
use crate::graph::Direction;
use crate::index::{AttributePath, IndexAnswer, IndexOperator};
use crate::statistics::CollectionStatistics;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_common::{Error, Result, Value};
use tracing::debug;

/// Sharded in-memory collections.
///
/// Each collection is split into a fixed number of shards by a CRC32 hash of
/// the document key; the distributed gather runs one partition per shard.
pub struct MemoryStorage {
    collections: RwLock<IndexMap<String, Collection>>,
    next_key: AtomicU64,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(IndexMap::new()),
            next_key: AtomicU64::new(1),
        }
    }

    /// Creates a single-shard document collection.
    pub fn create_collection(&self, name: &str) -> Result<()> {
        self.create_collection_with(name, CollectionKind::Document, 1)
    }

    /// Creates a single-shard edge collection.
    pub fn create_edge_collection(&self, name: &str) -> Result<()> {
        self.create_collection_with(name, CollectionKind::Edge, 1)
    }

    /// Creates a collection of the given kind split into `shards` shards.
    pub fn create_collection_with(
        &self,
        name: &str,
        kind: CollectionKind,
        shards: usize,
    ) -> Result<()> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidQuery(format!("illegal collection name '{name}'")));
        }
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(Error::Storage(format!("duplicate collection name '{name}'")));
        }
        collections.insert(name.to_string(), Collection::new(name, kind, shards));
        debug!(collection = name, ?kind, shards, "created collection");
        Ok(())
    }

    /// Creates an ordered index on `path` unless one already exists.
    pub fn ensure_index(&self, collection: &str, path: &str) -> Result<()> {
        let path = AttributePath::parse(path)?;
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        debug!(collection, path = %path, "ensure index");
        coll.ensure_index(path);
        Ok(())
    }

    /// Returns the names of all collections in creation order.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    fn with_collection<T>(&self, name: &str, f: impl FnOnce(&Collection) -> Result<T>) -> Result<T> {
        let collections = self.collections.read();
        let coll = collections
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        f(coll)
    }

    fn with_collection_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Collection) -> Result<T>,
    ) -> Result<T> {
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        f(coll)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for MemoryStorage {
    fn collection_exists(&self, collection: &str) -> bool {
        self.collections.read().contains_key(collection)
    }

    fn statistics(&self, collection: &str) -> Result<CollectionStatistics> {
        self.with_collection(collection, |c| Ok(c.statistics()))
    }

    fn scan(&self, collection: &str, shard: Option<usize>) -> Result<Vec<Value>> {
        self.with_collection(collection, |c| Ok(c.scan(shard)))
    }

    fn can_answer(
        &self,
        collection: &str,
        path: &AttributePath,
        op: IndexOperator,
    ) -> IndexAnswer {
        self.collections
            .read()
            .get(collection)
            .map_or_else(IndexAnswer::unsupported, |c| c.can_answer(path, op))
    }

    fn index_lookup(
        &self,
        collection: &str,
        shard: Option<usize>,
        path: &AttributePath,
        op: IndexOperator,
        value: &Value,
    ) -> Result<Vec<Value>> {
        self.with_collection(collection, |c| c.index_lookup(shard, path, op, value))
    }

    fn edges(
        &self,
        edge_collection: &str,
        vertex_id: &str,
        direction: Direction,
    ) -> Result<Vec<Value>> {
        self.with_collection(edge_collection, |c| c.edges(vertex_id, direction))
    }

    fn document(&self, id: &str) -> Result<Option<Value>> {
        let Some((collection, key)) = id.split_once('/') else {
            return Ok(None);
        };
        let collections = self.collections.read();
        Ok(collections.get(collection).and_then(|c| c.get(key)))
    }

    fn insert(&self, collection: &str, document: Value) -> Result<Value> {
        let generated = self.next_key.fetch_add(1, Ordering::Relaxed).to_string();
        self.with_collection_mut(collection, |c| c.insert(document, generated))
    }

    fn update(&self, collection: &str, key: &str, patch: Value) -> Result<Value> {
        self.with_collection_mut(collection, |c| c.update(key, patch))
    }

    fn remove(&self, collection: &str, key: &str) -> Result<Value> {
        self.with_collection_mut(collection, |c| c.remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Value {
        Value::from(v)
    }

    #[test]
    fn test_insert_and_lookup() {
        let storage = MemoryStorage::new();
        storage.create_collection("users").unwrap();

        let stored = storage.insert("users", doc(json!({"_key": "a", "age": 3}))).unwrap();
        assert_eq!(stored.attribute("_id"), Value::from("users/a"));

        let generated = storage.insert("users", doc(json!({"age": 4}))).unwrap();
        assert!(generated.attribute("_key").as_str().is_some());

        assert_eq!(storage.scan("users", None).unwrap().len(), 2);
        assert_eq!(
            storage.document("users/a").unwrap().map(|d| d.attribute("age")),
            Some(Value::Int64(3))
        );
        assert!(storage.document("users/zzz").unwrap().is_none());
        assert_eq!(storage.statistics("users").unwrap().document_count, 2);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let storage = MemoryStorage::new();
        storage.create_collection("c").unwrap();
        storage.insert("c", doc(json!({"_key": "k"}))).unwrap();
        assert!(matches!(
            storage.insert("c", doc(json!({"_key": "k"}))),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_unknown_collection() {
        let storage = MemoryStorage::new();
        assert_eq!(
            storage.scan("nope", None),
            Err(Error::CollectionNotFound("nope".to_string()))
        );
        assert!(!storage.can_answer("nope", &AttributePath::attributes(["a"]), IndexOperator::Eq).supported);
    }

    #[test]
    fn test_index_lookup_follows_updates() {
        let storage = MemoryStorage::new();
        storage.create_collection("c").unwrap();
        storage.ensure_index("c", "v").unwrap();
        storage.insert("c", doc(json!({"_key": "1", "v": 1}))).unwrap();
        storage.insert("c", doc(json!({"_key": "2", "v": 2}))).unwrap();

        let path = AttributePath::parse("v").unwrap();
        assert!(storage.can_answer("c", &path, IndexOperator::Eq).supported);

        storage.update("c", "1", doc(json!({"v": 2}))).unwrap();
        let hits = storage
            .index_lookup("c", None, &path, IndexOperator::Eq, &Value::Int64(2))
            .unwrap();
        assert_eq!(hits.len(), 2);

        storage.remove("c", "2").unwrap();
        let hits = storage
            .index_lookup("c", None, &path, IndexOperator::Eq, &Value::Int64(2))
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_shards_partition_documents() {
        let storage = MemoryStorage::new();
        storage
            .create_collection_with("c", CollectionKind::Document, 3)
            .unwrap();
        for i in 0..30 {
            storage.insert("c", doc(json!({"_key": format!("k{i}")}))).unwrap();
        }
        let total: usize = (0..3)
            .map(|s| storage.scan("c", Some(s)).unwrap().len())
            .sum();
        assert_eq!(total, 30);
        assert_eq!(storage.statistics("c").unwrap().shard_count, 3);
    }

    #[test]
    fn test_edges() {
        let storage = MemoryStorage::new();
        storage.create_collection("v").unwrap();
        storage.create_edge_collection("e").unwrap();
        storage
            .insert("e", doc(json!({"_from": "v/a", "_to": "v/b"})))
            .unwrap();
        assert!(storage.insert("e", doc(json!({"_from": "v/a"}))).is_err());

        assert_eq!(storage.edges("e", "v/a", Direction::Outbound).unwrap().len(), 1);
        assert_eq!(storage.edges("e", "v/a", Direction::Inbound).unwrap().len(), 0);
        assert_eq!(storage.edges("e", "v/b", Direction::Any).unwrap().len(), 1);
        assert!(storage.edges("v", "v/a", Direction::Any).is_err());
    }
}
