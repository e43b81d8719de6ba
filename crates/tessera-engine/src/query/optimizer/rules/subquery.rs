//! Subquery count collapsing.

use super::{OptimizerRule, RuleContext, RuleEffect, modified};
use crate::query::plan::{ExecutionPlan, NodeKind, NodeType};
use tessera_common::{PlanNodeId, Result, VariableId};

/// Switches a subquery to count-only mode when its result is only ever
/// passed to `LENGTH`.
///
/// The nested chain must be free of limits, modifications, nested
/// subqueries and non-deterministic calculations, and may loop at most
/// once.
pub struct OptimizeSubqueryCount;

impl OptimizeSubqueryCount {
    fn nested_chain_qualifies(plan: &ExecutionPlan, top: PlanNodeId) -> Result<bool> {
        let mut loops = 0;
        for id in plan.chain(top)? {
            let kind = plan.kind(id)?;
            if kind.is_modification() {
                return Ok(false);
            }
            if kind.is_enumeration() {
                loops += 1;
            }
            match kind {
                NodeKind::Limit(_) | NodeKind::Subquery(_) => return Ok(false),
                NodeKind::Calculation(calc) if !calc.expression.is_deterministic() => {
                    return Ok(false);
                }
                _ => {}
            }
        }
        Ok(loops <= 1)
    }

    fn only_counted(plan: &ExecutionPlan, users: &[PlanNodeId], var: VariableId) -> Result<bool> {
        for user in users {
            let NodeKind::Calculation(calc) = plan.kind(*user)? else {
                return Ok(false);
            };
            let uses = calc.expression.count_variable_uses(var);
            if uses == 0 || uses != calc.expression.count_length_uses(var) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl OptimizerRule for OptimizeSubqueryCount {
    fn name(&self) -> &'static str {
        "optimize-subquery-count"
    }

    fn level(&self) -> u32 {
        500
    }

    fn apply(&self, plan: &mut ExecutionPlan, _ctx: &mut RuleContext<'_>) -> Result<RuleEffect> {
        let mut changed = false;
        for id in plan.nodes_of_type(NodeType::Subquery, true)? {
            let NodeKind::Subquery(op) = plan.kind(id)? else {
                continue;
            };
            if op.count_only {
                continue;
            }
            let (var, top) = (op.out_variable, op.subquery);
            let users = plan.users_of(var);
            if users.is_empty()
                || !Self::only_counted(plan, &users, var)?
                || !Self::nested_chain_qualifies(plan, top)?
            {
                continue;
            }

            for user in &users {
                if let NodeKind::Calculation(calc) = &mut plan.node_mut(*user)?.kind {
                    calc.expression.replace_length_with_variable(var);
                }
            }
            let count = plan.variables_mut().declare_synthetic()?;
            plan.substitute(var, count)?;
            if let NodeKind::Subquery(op) = &mut plan.node_mut(id)?.kind {
                op.count_only = true;
            }
            plan.remove_variable(var)?;
            changed = true;
        }
        Ok(modified(changed))
    }
}
