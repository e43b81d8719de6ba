//! The rule library.
//!
//! | level | rule |
//! |---|---|
//! | 100 | `remove-unnecessary-filters` |
//! | 200 | `remove-redundant-calculations` |
//! | 300 | `move-calculations-up` |
//! | 400 | `move-filters-up` |
//! | 500 | `optimize-subquery-count` |
//! | 600 | `remove-unnecessary-calculations` |
//! | 700 | `interchange-adjacent-enumerations` |
//! | 800 | `use-indexes` |
//! | 900 | `remove-filter-covered-by-index` |
//! | 1000 | `remove-redundant-sorts` |
//! | 1100 | `remove-unnecessary-calculations-2` |
//! | 1200 | `distribute-in-cluster` |
//!
//! Every rule must leave the result multiset of the plan unchanged.

mod calculations;
mod distribute;
mod filters;
mod indexes;
mod interchange;
mod sorts;
mod subquery;

pub use calculations::{MoveCalculationsUp, RemoveRedundantCalculations, RemoveUnnecessaryCalculations};
pub use distribute::DistributeInCluster;
pub use filters::{MoveFiltersUp, RemoveUnnecessaryFilters};
pub use indexes::{RemoveFilterCoveredByIndex, UseIndexes};
pub use interchange::InterchangeAdjacentEnumerations;
pub use sorts::RemoveRedundantSorts;
pub use subquery::OptimizeSubqueryCount;

use crate::query::plan::{CalculationOp, ExecutionPlan, NodeKind};
use tessera_common::{PlanNodeId, Result, VariableId};
use tessera_core::StorageEngine;

/// What a rule did to a plan.
#[derive(Debug)]
pub enum RuleEffect {
    /// Nothing.
    Unchanged,
    /// Rewrote the plan in place.
    Modified,
    /// Left the plan as is and produced sibling plans.
    Branched(Vec<ExecutionPlan>),
}

/// Environment a rule runs in.
pub struct RuleContext<'a> {
    storage: &'a dyn StorageEngine,
    distributed: bool,
    remaining_plans: usize,
    truncated: bool,
}

impl<'a> RuleContext<'a> {
    /// Creates a context allowing `remaining_plans` more candidates.
    #[must_use]
    pub fn new(storage: &'a dyn StorageEngine, distributed: bool, remaining_plans: usize) -> Self {
        Self {
            storage,
            distributed,
            remaining_plans,
            truncated: false,
        }
    }

    /// The storage layer, for statistics and index capabilities.
    #[must_use]
    pub fn storage(&self) -> &'a dyn StorageEngine {
        self.storage
    }

    /// True when execution is distributed over shards.
    #[must_use]
    pub fn distributed(&self) -> bool {
        self.distributed
    }

    /// How many sibling plans a branching rule may still create.
    #[must_use]
    pub fn remaining_plans(&self) -> usize {
        self.remaining_plans
    }

    /// Records that a branching rule dropped siblings because of the cap.
    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    /// True if [`RuleContext::mark_truncated`] was called.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

/// A named plan transformation.
pub trait OptimizerRule: Send + Sync {
    /// Unique name, as shown in explain output and accepted by the deny-list.
    fn name(&self) -> &'static str;

    /// Level; rules run in ascending level order.
    fn level(&self) -> u32;

    /// False for rules required for correct execution.
    fn can_be_disabled(&self) -> bool {
        true
    }

    /// Applies the rule. Errors abort the optimization.
    fn apply(&self, plan: &mut ExecutionPlan, ctx: &mut RuleContext<'_>) -> Result<RuleEffect>;
}

/// The default library, in level order.
#[must_use]
pub fn default_rules() -> Vec<Box<dyn OptimizerRule>> {
    vec![
        Box::new(RemoveUnnecessaryFilters),
        Box::new(RemoveRedundantCalculations),
        Box::new(MoveCalculationsUp),
        Box::new(MoveFiltersUp),
        Box::new(OptimizeSubqueryCount),
        Box::new(RemoveUnnecessaryCalculations::first()),
        Box::new(InterchangeAdjacentEnumerations),
        Box::new(UseIndexes),
        Box::new(RemoveFilterCoveredByIndex),
        Box::new(RemoveRedundantSorts),
        Box::new(RemoveUnnecessaryCalculations::second()),
        Box::new(DistributeInCluster),
    ]
}

fn modified(changed: bool) -> RuleEffect {
    if changed {
        RuleEffect::Modified
    } else {
        RuleEffect::Unchanged
    }
}

/// The calculation producing `var`, if `var` is produced by one.
fn calculation_of(plan: &ExecutionPlan, var: VariableId) -> Option<(PlanNodeId, &CalculationOp)> {
    let setter = plan.setter_of(var)?;
    match plan.kind(setter).ok()? {
        NodeKind::Calculation(calc) => Some((setter, calc)),
        _ => None,
    }
}

/// Nodes of the chain containing `id`, from its Singleton upwards.
fn enclosing_chain(plan: &ExecutionPlan, id: PlanNodeId) -> Result<Vec<PlanNodeId>> {
    let mut top = id;
    while let Some(parent) = plan.parent(top) {
        top = parent;
    }
    plan.chain(top)
}

/// True if the nested chain of a subquery writes to storage.
fn subquery_modifies(plan: &ExecutionPlan, subquery_top: PlanNodeId) -> Result<bool> {
    for id in plan.chain(subquery_top)? {
        match plan.kind(id)? {
            kind if kind.is_modification() => return Ok(true),
            NodeKind::Subquery(op) => {
                if subquery_modifies(plan, op.subquery)? {
                    return Ok(true);
                }
            }
            _ => {}
        }
    }
    Ok(false)
}

/// Every chain of the plan: the main chain first, then nested chains in
/// dependency-first order of their Subquery nodes.
fn chains(plan: &ExecutionPlan) -> Result<Vec<Vec<PlanNodeId>>> {
    let mut out = vec![plan.chain(plan.root()?)?];
    for id in plan.nodes_of_type(crate::query::plan::NodeType::Subquery, true)? {
        if let NodeKind::Subquery(op) = plan.kind(id)? {
            out.push(plan.chain(op.subquery)?);
        }
    }
    Ok(out)
}
