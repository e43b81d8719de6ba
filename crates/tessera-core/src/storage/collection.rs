//! A single in-memory collection.

use super::CollectionKind;
use crate::graph::Direction;
use crate::index::{AttributePath, EdgeAdjacency, IndexAnswer, IndexOperator, SecondaryIndex};
use crate::statistics::CollectionStatistics;
use std::collections::BTreeMap;
use tessera_common::utils::hash::{FastHashMap, fast_map};
use tessera_common::{Error, Result, Value};

/// Documents of one collection, stored in slots that are never reused.
#[derive(Debug)]
pub(super) struct Collection {
    name: String,
    kind: CollectionKind,
    shard_count: usize,
    /// Document slots; removed documents leave a tombstone.
    slots: Vec<Option<Value>>,
    /// Shard of each slot.
    shards: Vec<usize>,
    /// `_key` -> slot.
    keys: FastHashMap<String, usize>,
    indexes: Vec<SecondaryIndex>,
    /// Present for edge collections.
    adjacency: Option<EdgeAdjacency>,
    live: usize,
}

impl Collection {
    pub(super) fn new(name: &str, kind: CollectionKind, shard_count: usize) -> Self {
        Self {
            name: name.to_string(),
            kind,
            shard_count: shard_count.max(1),
            slots: Vec::new(),
            shards: Vec::new(),
            keys: fast_map(),
            indexes: Vec::new(),
            adjacency: match kind {
                CollectionKind::Edge => Some(EdgeAdjacency::new()),
                CollectionKind::Document => None,
            },
            live: 0,
        }
    }

    pub(super) fn statistics(&self) -> CollectionStatistics {
        CollectionStatistics::new(&self.name, self.kind, self.live as u64)
            .with_shards(self.shard_count)
            .with_average_degree(self.adjacency.as_ref().map_or(0.0, |a| a.average_degree()))
    }

    pub(super) fn ensure_index(&mut self, path: AttributePath) {
        if self.indexes.iter().any(|i| *i.path() == path) {
            return;
        }
        let mut index = SecondaryIndex::new(path);
        for (slot, doc) in self.slots.iter().enumerate() {
            if let Some(doc) = doc {
                index.insert(slot, doc);
            }
        }
        self.indexes.push(index);
    }

    pub(super) fn scan(&self, shard: Option<usize>) -> Vec<Value> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(slot, _)| shard.is_none_or(|s| self.shards[*slot] == s))
            .filter_map(|(_, doc)| doc.clone())
            .collect()
    }

    pub(super) fn can_answer(&self, path: &AttributePath, op: IndexOperator) -> IndexAnswer {
        self.indexes
            .iter()
            .find(|i| i.path() == path)
            .map_or_else(IndexAnswer::unsupported, |i| {
                IndexAnswer::supported(i.selectivity(op))
            })
    }

    pub(super) fn index_lookup(
        &self,
        shard: Option<usize>,
        path: &AttributePath,
        op: IndexOperator,
        value: &Value,
    ) -> Result<Vec<Value>> {
        let index = self.indexes.iter().find(|i| i.path() == path).ok_or_else(|| {
            Error::Storage(format!("no index on {}.{}", self.name, path))
        })?;
        Ok(index
            .lookup(op, value)
            .into_iter()
            .filter(|slot| shard.is_none_or(|s| self.shards[*slot] == s))
            .filter_map(|slot| self.slots[slot].clone())
            .collect())
    }

    pub(super) fn edges(&self, vertex_id: &str, direction: Direction) -> Result<Vec<Value>> {
        let adjacency = self.adjacency.as_ref().ok_or_else(|| {
            Error::InvalidQuery(format!("collection '{}' is not an edge collection", self.name))
        })?;
        Ok(adjacency
            .edges(vertex_id, direction)
            .into_iter()
            .filter_map(|slot| self.slots[slot].clone())
            .collect())
    }

    pub(super) fn get(&self, key: &str) -> Option<Value> {
        self.keys.get(key).and_then(|slot| self.slots[*slot].clone())
    }

    pub(super) fn insert(&mut self, document: Value, generated_key: String) -> Result<Value> {
        let Value::Map(mut fields) = document else {
            return Err(Error::type_mismatch("object", document.type_name()));
        };
        let key = match fields.get("_key") {
            Some(Value::String(k)) if !k.is_empty() && !k.contains('/') => k.clone(),
            Some(Value::String(k)) => {
                return Err(Error::Storage(format!("illegal document key '{k}'")));
            }
            Some(other) => return Err(Error::type_mismatch("string", other.type_name())),
            None => generated_key,
        };
        if self.keys.contains_key(&key) {
            return Err(Error::Storage(format!(
                "unique constraint violated: {}/{key} already exists",
                self.name
            )));
        }
        fields.insert("_key".to_string(), Value::String(key.clone()));
        fields.insert(
            "_id".to_string(),
            Value::String(format!("{}/{key}", self.name)),
        );
        if self.kind == CollectionKind::Edge {
            edge_endpoints(&fields)?;
        }

        let slot = self.slots.len();
        let shard = crc32fast::hash(key.as_bytes()) as usize % self.shard_count;
        let document = Value::Map(fields);
        self.link(slot, &document);
        self.slots.push(Some(document.clone()));
        self.shards.push(shard);
        self.keys.insert(key, slot);
        self.live += 1;
        Ok(document)
    }

    pub(super) fn update(&mut self, key: &str, patch: Value) -> Result<Value> {
        let Value::Map(patch) = patch else {
            return Err(Error::type_mismatch("object", patch.type_name()));
        };
        let slot = self.slot_of(key)?;
        let old = self.slots[slot].take().unwrap_or_default();
        self.unlink(slot, &old);

        let mut fields: BTreeMap<String, Value> = old.as_map().cloned().unwrap_or_default();
        for (name, value) in patch {
            if name != "_key" && name != "_id" {
                fields.insert(name, value);
            }
        }
        if self.kind == CollectionKind::Edge {
            if let Err(err) = edge_endpoints(&fields) {
                self.link(slot, &old);
                self.slots[slot] = Some(old);
                return Err(err);
            }
        }
        let updated = Value::Map(fields);
        self.link(slot, &updated);
        self.slots[slot] = Some(updated.clone());
        Ok(updated)
    }

    pub(super) fn remove(&mut self, key: &str) -> Result<Value> {
        let slot = self.slot_of(key)?;
        let old = self.slots[slot].take().unwrap_or_default();
        self.unlink(slot, &old);
        self.keys.remove(key);
        self.live -= 1;
        Ok(old)
    }

    fn slot_of(&self, key: &str) -> Result<usize> {
        self.keys
            .get(key)
            .copied()
            .ok_or_else(|| Error::Storage(format!("document not found: {}/{key}", self.name)))
    }

    fn link(&mut self, slot: usize, document: &Value) {
        for index in &mut self.indexes {
            index.insert(slot, document);
        }
        if let (Some(adjacency), Some(fields)) = (self.adjacency.as_mut(), document.as_map()) {
            if let Ok((from, to)) = edge_endpoints(fields) {
                adjacency.add_edge(&from, &to, slot);
            }
        }
    }

    fn unlink(&mut self, slot: usize, document: &Value) {
        for index in &mut self.indexes {
            index.remove(slot, document);
        }
        if let (Some(adjacency), Some(fields)) = (self.adjacency.as_mut(), document.as_map()) {
            if let Ok((from, to)) = edge_endpoints(fields) {
                adjacency.remove_edge(&from, &to, slot);
            }
        }
    }
}

fn edge_endpoints(fields: &BTreeMap<String, Value>) -> Result<(String, String)> {
    match (fields.get("_from"), fields.get("_to")) {
        (Some(Value::String(from)), Some(Value::String(to))) => Ok((from.clone(), to.clone())),
        _ => Err(Error::Storage(
            "edge documents require string _from and _to attributes".to_string(),
        )),
    }
}
