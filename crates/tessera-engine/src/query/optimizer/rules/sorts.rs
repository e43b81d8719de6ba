//! Sort rules.

use super::{OptimizerRule, RuleContext, RuleEffect, modified};
use crate::query::plan::{ExecutionPlan, NodeKind, NodeType};
use tessera_common::Result;

/// Removes one of two sorts separated only by calculations and filters when
/// the keys of one are a prefix of the keys of the other.
///
/// If the upper sort's keys are a prefix of the lower's, the upper sort
/// leaves the order unchanged. If the lower sort's keys are a prefix of the
/// upper's, the upper sort fully overrides it.
pub struct RemoveRedundantSorts;

impl OptimizerRule for RemoveRedundantSorts {
    fn name(&self) -> &'static str {
        "remove-redundant-sorts"
    }

    fn level(&self) -> u32 {
        1000
    }

    fn apply(&self, plan: &mut ExecutionPlan, _ctx: &mut RuleContext<'_>) -> Result<RuleEffect> {
        let mut changed = false;
        for lower in plan.nodes_of_type(NodeType::Sort, true)? {
            let Ok(NodeKind::Sort(lower_op)) = plan.kind(lower) else {
                continue;
            };
            let mut current = plan.parent(lower);
            let upper = loop {
                let Some(id) = current else {
                    break None;
                };
                match plan.kind(id)? {
                    NodeKind::Calculation(_) | NodeKind::Filter(_) => current = plan.parent(id),
                    NodeKind::Sort(upper_op) => break Some((id, upper_op)),
                    _ => break None,
                }
            };
            let Some((upper, upper_op)) = upper else {
                continue;
            };

            let remove = if lower_op.elements.starts_with(&upper_op.elements) {
                upper
            } else if upper_op.elements.starts_with(&lower_op.elements) {
                lower
            } else {
                continue;
            };
            plan.remove_node(remove)?;
            changed = true;
        }
        Ok(modified(changed))
    }
}
