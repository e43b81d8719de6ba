//! # tessera-common
//!
//! Foundation layer for Tessera: values, identifiers, and errors.
//!
//! This crate provides the fundamental building blocks used by all other
//! Tessera crates. It has no internal dependencies and should be kept minimal.
//!
//! ## Modules
//!
//! - [`types`] - Core type definitions (Value, PlanNodeId, VariableId, QueryId)
//! - [`utils`] - Utility functions and helpers (hashing, errors)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod types;
pub mod utils;

// Re-export commonly used types at crate root
pub use types::{PlanNodeId, QueryId, Value, VariableId};
pub use utils::error::{Error, Result};
