//! # tessera-core
//!
//! Storage-facing layer for Tessera: the contracts the query engine consumes
//! from a storage engine, and an in-memory implementation of them.
//!
//! The query engine never touches documents directly. It asks a
//! [`StorageEngine`] for collection statistics, full scans, index capability
//! ("can you answer `doc.a == x`?"), index lookups, edge adjacency and
//! mutations.
//!
//! ## Modules
//!
//! - [`graph`] - Edge direction for traversals
//! - [`index`] - Attribute paths, index operators, ordered secondary indexes, edge adjacency
//! - [`statistics`] - Collection statistics for cost estimation
//! - [`storage`] - The `StorageEngine` contract and `MemoryStorage`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod graph;
pub mod index;
pub mod statistics;
pub mod storage;

// Re-export commonly used types
pub use graph::Direction;
pub use index::{AttributePath, IndexAnswer, IndexOperator};
pub use statistics::CollectionStatistics;
pub use storage::{CollectionKind, MemoryStorage, StorageEngine};
