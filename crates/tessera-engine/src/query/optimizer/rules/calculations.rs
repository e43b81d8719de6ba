//! Calculation rules.

use super::{OptimizerRule, RuleContext, RuleEffect, chains, modified};
use crate::query::plan::{ExecutionPlan, NodeKind, NodeType};
use tessera_common::Result;

/// Folds a calculation into an earlier one in the same chain that computes
/// the same deterministic expression.
pub struct RemoveRedundantCalculations;

impl OptimizerRule for RemoveRedundantCalculations {
    fn name(&self) -> &'static str {
        "remove-redundant-calculations"
    }

    fn level(&self) -> u32 {
        200
    }

    fn apply(&self, plan: &mut ExecutionPlan, _ctx: &mut RuleContext<'_>) -> Result<RuleEffect> {
        let mut changed = false;
        for chain in chains(plan)? {
            // (out variable, expression) of the calculations seen so far.
            let mut seen = Vec::new();
            for id in chain {
                let Ok(node) = plan.node(id) else {
                    continue;
                };
                match &node.kind {
                    // Collect drops every register it does not produce.
                    NodeKind::Collect(_) => seen.clear(),
                    NodeKind::Calculation(calc) if calc.expression.is_deterministic() => {
                        let earlier = seen
                            .iter()
                            .find(|(_, expression)| *expression == calc.expression)
                            .map(|(var, _)| *var);
                        match earlier {
                            Some(keep) => {
                                let drop = calc.out_variable;
                                plan.remove_node(id)?;
                                plan.substitute(drop, keep)?;
                                plan.remove_variable(drop)?;
                                changed = true;
                            }
                            None => seen.push((calc.out_variable, calc.expression.clone())),
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(modified(changed))
    }
}

/// Moves deterministic calculations that cannot fail towards the start of
/// their chain, so they run outside loops that do not affect them.
pub struct MoveCalculationsUp;

impl OptimizerRule for MoveCalculationsUp {
    fn name(&self) -> &'static str {
        "move-calculations-up"
    }

    fn level(&self) -> u32 {
        300
    }

    fn apply(&self, plan: &mut ExecutionPlan, _ctx: &mut RuleContext<'_>) -> Result<RuleEffect> {
        let mut changed = false;
        for id in plan.nodes_of_type(NodeType::Calculation, true)? {
            let node = plan.node(id)?;
            let NodeKind::Calculation(calc) = &node.kind else {
                continue;
            };
            if !calc.expression.is_deterministic() || calc.expression.can_throw() {
                continue;
            }
            let used = calc.expression.variables();
            let Some(original) = node.dependency() else {
                continue;
            };

            let mut target = original;
            let mut current = original;
            loop {
                let below = plan.node(current)?;
                let blocked = matches!(
                    below.kind,
                    NodeKind::Singleton | NodeKind::Collect(_) | NodeKind::Gather(_)
                ) || below.kind.variables_set().iter().any(|v| used.contains(v));
                if blocked {
                    break;
                }
                let Some(next) = below.dependency() else {
                    break;
                };
                target = next;
                current = next;
            }
            if target != original {
                plan.move_above(id, target)?;
                changed = true;
            }
        }
        Ok(modified(changed))
    }
}

/// Removes calculations whose result is never read.
pub struct RemoveUnnecessaryCalculations {
    name: &'static str,
    level: u32,
}

impl RemoveUnnecessaryCalculations {
    /// The early pass.
    #[must_use]
    pub fn first() -> Self {
        Self {
            name: "remove-unnecessary-calculations",
            level: 600,
        }
    }

    /// The late pass, cleaning up after index rules.
    #[must_use]
    pub fn second() -> Self {
        Self {
            name: "remove-unnecessary-calculations-2",
            level: 1100,
        }
    }
}

impl OptimizerRule for RemoveUnnecessaryCalculations {
    fn name(&self) -> &'static str {
        self.name
    }

    fn level(&self) -> u32 {
        self.level
    }

    fn apply(&self, plan: &mut ExecutionPlan, _ctx: &mut RuleContext<'_>) -> Result<RuleEffect> {
        let mut changed = false;
        // Removing one calculation can leave the inputs of another unused.
        loop {
            let mut removed = false;
            for id in plan.nodes_of_type(NodeType::Calculation, true)? {
                let NodeKind::Calculation(calc) = plan.kind(id)? else {
                    continue;
                };
                if !calc.expression.is_deterministic() || calc.expression.can_throw() {
                    continue;
                }
                let out = calc.out_variable;
                if plan.users_of(out).is_empty() {
                    plan.remove_node(id)?;
                    plan.remove_variable(out)?;
                    removed = true;
                }
            }
            if !removed {
                break;
            }
            changed = true;
        }
        Ok(modified(changed))
    }
}
