//! Graph vocabulary shared by storage and traversal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which edges a traversal step follows from a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Edges whose `_from` is the vertex.
    Outbound,
    /// Edges whose `_to` is the vertex.
    Inbound,
    /// Both.
    Any,
}

impl Direction {
    /// Given an edge and the vertex it was reached from, returns the id of the
    /// vertex on the other side.
    #[must_use]
    pub fn other_end<'a>(&self, from: &'a str, to: &'a str, current: &str) -> &'a str {
        match self {
            Direction::Outbound => to,
            Direction::Inbound => from,
            // Self loops resolve to the same vertex either way.
            Direction::Any => {
                if from == current {
                    to
                } else {
                    from
                }
            }
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "OUTBOUND"),
            Direction::Inbound => write!(f, "INBOUND"),
            Direction::Any => write!(f, "ANY"),
        }
    }
}
