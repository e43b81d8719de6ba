//! Error types shared by every Tessera crate.
//!
//! Errors fall into four groups:
//!
//! - contract violations ([`Error::Internal`]), which always indicate a bug
//! - planning errors reported before execution begins
//! - runtime errors raised while a query executes
//! - cancellation ([`Error::QueryKilled`]), a terminal state rather than a
//!   failure

use crate::types::{PlanNodeId, QueryId};
use thiserror::Error;

/// Unified error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Broken plan or variable invariant. Never caused by user input.
    #[error("internal error: {0}")]
    Internal(String),

    /// A bind parameter referenced by the query has no value.
    #[error("bind parameter '{0}' is missing")]
    BindParameterMissing(String),

    /// A collection referenced by the query does not exist.
    #[error("collection or view not found: {0}")]
    CollectionNotFound(String),

    /// The query is well-formed but semantically invalid.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A runtime failure while executing a plan node.
    #[error("{}", format_runtime(.node, .message))]
    Runtime {
        /// Node that raised the error, if known.
        node: Option<PlanNodeId>,
        /// Description of the failure.
        message: String,
    },

    /// An operand had the wrong type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected type name.
        expected: String,
        /// Found type name.
        found: String,
    },

    /// Failure reported by the storage layer.
    #[error("storage error: {0}")]
    Storage(String),

    /// The query was killed by a caller.
    #[error("query {0} was killed")]
    QueryKilled(QueryId),
}

fn format_runtime(node: &Option<PlanNodeId>, message: &str) -> String {
    match node {
        Some(id) => format!("runtime error in node {id}: {message}"),
        None => format!("runtime error: {message}"),
    }
}

impl Error {
    /// Creates a runtime error not yet attributed to a node.
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime {
            node: None,
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Error::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Attributes an unattributed runtime error to `node`. Other errors pass
    /// through unchanged.
    #[must_use]
    pub fn at_node(self, node: PlanNodeId) -> Self {
        match self {
            Error::Runtime { node: None, message } => Error::Runtime {
                node: Some(node),
                message,
            },
            Error::TypeMismatch { expected, found } => Error::Runtime {
                node: Some(node),
                message: format!("type mismatch: expected {expected}, found {found}"),
            },
            other => other,
        }
    }

    /// Returns true if this error reports cancellation rather than failure.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        matches!(self, Error::QueryKilled(_))
    }

    /// Returns true for contract violations.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }
}

/// Result type alias using the unified [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
