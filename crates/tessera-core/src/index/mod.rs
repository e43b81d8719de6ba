//! Index structures and the vocabulary used to ask about them.
//!
//! - [`AttributePath`]: the document path an index covers, e.g. `a.b` or
//!   `tags[*].name`
//! - [`IndexOperator`]: the comparisons an index can answer
//! - [`SecondaryIndex`]: an ordered index over one path
//! - [`EdgeAdjacency`]: `_from`/`_to` adjacency lists for edge collections

pub mod adjacency;
mod operator;
mod path;
mod secondary;

pub use adjacency::EdgeAdjacency;
pub use operator::{IndexAnswer, IndexOperator};
pub use path::{AttributePath, PathSegment};
pub use secondary::SecondaryIndex;
