//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tessera_common::Value;
use tessera_core::{CollectionKind, MemoryStorage, StorageEngine};
use tessera_engine::query::ExecutionPlan;
use tessera_engine::{Config, Database, QueryOptions};

/// Runs `plan` to completion and returns its results.
pub fn run(db: &Database, plan: ExecutionPlan, options: &QueryOptions) -> Vec<Value> {
    db.query(plan, options).unwrap().collect_all().unwrap()
}

/// Sorts values into their total order.
pub fn sorted(mut values: Vec<Value>) -> Vec<Value> {
    values.sort();
    values
}

/// Strings as values.
pub fn strings(items: &[&str]) -> Vec<Value> {
    items.iter().map(|s| Value::from(*s)).collect()
}

/// A document collection `name` with `shards` shards, filled with
/// `documents`.
pub fn fill(storage: &MemoryStorage, name: &str, shards: usize, documents: Vec<Value>) {
    storage
        .create_collection_with(name, CollectionKind::Document, shards)
        .unwrap();
    for document in documents {
        storage.insert(name, document).unwrap();
    }
}

/// Vertices `v/A` to `v/F` and the edges
/// `A->B, B->C, C->D, C->F, E->B, F->E` in `e`.
pub fn base_graph() -> MemoryStorage {
    let storage = MemoryStorage::new();
    storage.create_collection("v").unwrap();
    storage.create_edge_collection("e").unwrap();
    for key in ["A", "B", "C", "D", "E", "F"] {
        storage.insert("v", Value::map([("_key", Value::from(key))])).unwrap();
    }
    for (from, to) in [("A", "B"), ("B", "C"), ("C", "D"), ("C", "F"), ("E", "B"), ("F", "E")] {
        let edge = Value::map([
            ("_from", Value::from(format!("v/{from}"))),
            ("_to", Value::from(format!("v/{to}"))),
        ]);
        storage.insert("e", edge).unwrap();
    }
    storage
}

/// A database over `storage`.
pub fn database(storage: MemoryStorage, config: Config) -> Database {
    Database::with_config(Arc::new(storage), config)
}

/// Installs a test subscriber once so `RUST_LOG` shows engine traces.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
