//! Execution plans.
//!
//! A plan is an arena of [`PlanNode`]s linked by dependency ids. The main
//! query and every nested subquery chain live in the same arena; a Subquery
//! node refers to the top of its nested chain by id.

mod execution_plan;
mod node;

pub use execution_plan::ExecutionPlan;
pub use node::{
    Aggregate, AggregateFunction, CalculationOp, CollectOp, Dependencies, EnumerateCollectionOp,
    EnumerateListOp, FilterOp, GatherOp, GroupVariable, IndexScanOp, IntoVariable, LimitOp,
    ModificationOp, NodeKind, NodeType, PlanNode, ReturnOp, SortElement, SortOp, SubqueryOp,
    TraversalOp,
};
