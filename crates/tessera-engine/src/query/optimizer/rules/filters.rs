//! Filter rules.

use super::{OptimizerRule, RuleContext, RuleEffect, calculation_of, modified, subquery_modifies};
use crate::query::plan::{ExecutionPlan, NodeKind, NodeType};
use tessera_common::Result;

/// Removes filters on constant conditions: an always-true filter is dropped,
/// an always-false one becomes a `NoResults` node.
pub struct RemoveUnnecessaryFilters;

impl OptimizerRule for RemoveUnnecessaryFilters {
    fn name(&self) -> &'static str {
        "remove-unnecessary-filters"
    }

    fn level(&self) -> u32 {
        100
    }

    fn apply(&self, plan: &mut ExecutionPlan, _ctx: &mut RuleContext<'_>) -> Result<RuleEffect> {
        let mut changed = false;
        for id in plan.nodes_of_type(NodeType::Filter, true)? {
            let NodeKind::Filter(op) = plan.kind(id)? else {
                continue;
            };
            let Some((_, calc)) = calculation_of(plan, op.in_variable) else {
                continue;
            };
            if !calc.expression.is_constant() {
                continue;
            }
            // Conditions that fail to evaluate are left for execution to report.
            let Ok(value) = calc.expression.evaluate(&[]) else {
                continue;
            };
            if value.to_bool() {
                plan.remove_node(id)?;
            } else {
                plan.replace_node(id, NodeKind::NoResults)?;
            }
            changed = true;
        }
        Ok(modified(changed))
    }
}

/// Moves filters towards the start of their chain, past nodes that neither
/// produce the filter's input nor change which rows reach it.
pub struct MoveFiltersUp;

impl MoveFiltersUp {
    fn can_pass(plan: &ExecutionPlan, kind: &NodeKind) -> Result<bool> {
        Ok(match kind {
            NodeKind::EnumerateCollection(_)
            | NodeKind::IndexScan(_)
            | NodeKind::EnumerateList(_)
            | NodeKind::Traversal(_)
            | NodeKind::Filter(_)
            | NodeKind::Sort(_) => true,
            NodeKind::Calculation(calc) => !calc.expression.can_throw(),
            NodeKind::Subquery(op) => !subquery_modifies(plan, op.subquery)?,
            NodeKind::Singleton
            | NodeKind::Limit(_)
            | NodeKind::Collect(_)
            | NodeKind::Return(_)
            | NodeKind::NoResults
            | NodeKind::Gather(_)
            | NodeKind::Insert(_)
            | NodeKind::Update(_)
            | NodeKind::Remove(_) => false,
        })
    }
}

impl OptimizerRule for MoveFiltersUp {
    fn name(&self) -> &'static str {
        "move-filters-up"
    }

    fn level(&self) -> u32 {
        400
    }

    fn apply(&self, plan: &mut ExecutionPlan, _ctx: &mut RuleContext<'_>) -> Result<RuleEffect> {
        let mut changed = false;
        for id in plan.nodes_of_type(NodeType::Filter, true)? {
            let node = plan.node(id)?;
            let NodeKind::Filter(op) = &node.kind else {
                continue;
            };
            let var = op.in_variable;
            let Some(original) = node.dependency() else {
                continue;
            };

            let mut target = original;
            let mut current = original;
            loop {
                let below = plan.node(current)?;
                if below.kind.variables_set().contains(&var) || !Self::can_pass(plan, &below.kind)? {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::builder::PlanBuilder;
    use crate::query::expr::Expression;
    use tessera_core::MemoryStorage;

    fn apply(rule: &dyn OptimizerRule, plan: &mut ExecutionPlan) -> RuleEffect {
        let storage = MemoryStorage::new();
        let mut ctx = RuleContext::new(&storage, false, 0);
        rule.apply(plan, &mut ctx).unwrap()
    }

    fn types(plan: &ExecutionPlan) -> Vec<NodeType> {
        plan.all_nodes()
            .unwrap()
            .into_iter()
            .map(|id| plan.kind(id).unwrap().node_type())
            .collect()
    }

    #[test]
    fn test_false_filter_becomes_no_results() {
        let mut b = PlanBuilder::new();
        let d = b.for_collection("d", "c").unwrap();
        b.filter(Expression::literal(false)).unwrap();
        b.return_(d).unwrap();
        let mut plan = b.build().unwrap();

        assert!(matches!(apply(&RemoveUnnecessaryFilters, &mut plan), RuleEffect::Modified));
        assert!(types(&plan).contains(&NodeType::NoResults));
        assert!(!types(&plan).contains(&NodeType::Filter));
    }

    #[test]
    fn test_non_constant_filter_kept() {
        let mut b = PlanBuilder::new();
        let d = b.for_collection("d", "c").unwrap();
        b.filter(Expression::variable(d).attribute("a")).unwrap();
        b.return_(d).unwrap();
        let mut plan = b.build().unwrap();
        assert!(matches!(apply(&RemoveUnnecessaryFilters, &mut plan), RuleEffect::Unchanged));
    }

    #[test]
    fn test_filter_moves_out_of_inner_loop() {
        let mut b = PlanBuilder::new();
        let a = b.for_collection("a", "c").unwrap();
        let cond = b
            .calculate(Expression::variable(a).attribute("x").equals(Expression::literal(1)))
            .unwrap();
        let inner = b.for_collection("b", "c").unwrap();
        b.filter_on(cond).unwrap();
        b.return_(inner).unwrap();
        let mut plan = b.build().unwrap();

        assert!(matches!(apply(&MoveFiltersUp, &mut plan), RuleEffect::Modified));
        // The filter on `a` now sits directly above its calculation, below
        // the inner loop.
        assert_eq!(
            types(&plan),
            vec![
                NodeType::Singleton,
                NodeType::EnumerateCollection,
                NodeType::Calculation,
                NodeType::Filter,
                NodeType::EnumerateCollection,
                NodeType::Return
            ]
        );
    }

    #[test]
    fn test_filter_never_passes_limit() {
        let mut b = PlanBuilder::new();
        let a = b.for_collection("a", "c").unwrap();
        let cond = b.calculate(Expression::variable(a).attribute("x")).unwrap();
        b.limit(0, 1).unwrap();
        b.filter_on(cond).unwrap();
        b.return_(a).unwrap();
        let mut plan = b.build().unwrap();
        assert!(matches!(apply(&MoveFiltersUp, &mut plan), RuleEffect::Unchanged));
    }
}
