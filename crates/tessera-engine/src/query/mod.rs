//! Query processing pipeline.
//!
//! - **Variables**: single-producer registers shared by plan nodes
//! - **Expressions**: the computational payload of nodes, with evaluation
//! - **Plan**: the node arena, and the builder used by front-ends
//! - **Optimizer**: rule-driven search over equivalent plans
//! - **Exec**: pull-based execution blocks, traversal and partition gather
//! - **Registry / Cursor**: query lifecycle, kill and incremental fetching

pub mod builder;
pub mod cursor;
pub mod exec;
pub mod explain;
pub mod expr;
pub mod optimizer;
pub mod plan;
pub mod registry;
pub mod traversal;
pub mod variable;

pub use builder::PlanBuilder;
pub use cursor::Cursor;
pub use expr::{BinaryOp, ComparisonOp, Expression, Function, Quantifier, UnaryOp};
pub use optimizer::{Optimizer, OptimizerStats};
pub use plan::{ExecutionPlan, NodeKind, NodeType, PlanNode};
pub use traversal::{TraversalOptions, TraversalOrder, UniqueEdges, UniqueVertices};
pub use variable::{Variable, VariableRegistry};
