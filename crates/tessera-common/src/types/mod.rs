//! Core type definitions for Tessera.
//!
//! This module contains the fundamental types used throughout the query core:
//! - Identifier types ([`PlanNodeId`], [`VariableId`], [`QueryId`])
//! - The document data model ([`Value`])

mod id;
mod value;

pub use id::{PlanNodeId, QueryId, VariableId};
pub use value::Value;
