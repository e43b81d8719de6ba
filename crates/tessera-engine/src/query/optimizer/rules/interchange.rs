//! Enumeration interchange.

use super::{OptimizerRule, RuleContext, RuleEffect, chains};
use crate::query::plan::{ExecutionPlan, NodeKind};
use tessera_common::{PlanNodeId, Result};
use tracing::debug;

/// A maximal run of adjacent enumerations in one chain, lowest first.
struct Run {
    below: PlanNodeId,
    members: Vec<PlanNodeId>,
    above: PlanNodeId,
}

/// Creates one sibling plan per valid reordering of adjacent enumerations.
///
/// A reordering is valid when no enumeration reads a variable produced by an
/// enumeration placed above it. The original order is kept in the original
/// plan, so `n` independent enumerations give `n!` candidates in total.
pub struct InterchangeAdjacentEnumerations;

impl InterchangeAdjacentEnumerations {
    fn is_member(kind: &NodeKind) -> bool {
        matches!(kind, NodeKind::EnumerateCollection(_) | NodeKind::EnumerateList(_))
    }

    fn runs(plan: &ExecutionPlan) -> Result<Vec<Run>> {
        let mut runs = Vec::new();
        for chain in chains(plan)? {
            let mut i = 0;
            while i < chain.len() {
                if !Self::is_member(plan.kind(chain[i])?) {
                    i += 1;
                    continue;
                }
                let start = i;
                while i < chain.len() && Self::is_member(plan.kind(chain[i])?) {
                    i += 1;
                }
                if i - start < 2 || start == 0 || i == chain.len() {
                    continue;
                }
                runs.push(Run {
                    below: chain[start - 1],
                    members: chain[start..i].to_vec(),
                    above: chain[i],
                });
            }
        }
        Ok(runs)
    }

    /// Valid orderings of `run`, identity first, at most `limit` of them.
    /// The flag is true if further valid orderings were left out.
    fn orderings(plan: &ExecutionPlan, run: &Run, limit: usize) -> Result<(Vec<Vec<usize>>, bool)> {
        let used = run
            .members
            .iter()
            .map(|id| Ok(plan.kind(*id)?.variables_used()))
            .collect::<Result<Vec<_>>>()?;
        let set = run
            .members
            .iter()
            .map(|id| Ok(plan.kind(*id)?.variables_set()))
            .collect::<Result<Vec<_>>>()?;

        let valid = |order: &[usize]| {
            order.iter().enumerate().all(|(pos, &member)| {
                order[pos + 1..]
                    .iter()
                    .all(|&later| set[later].iter().all(|v| !used[member].contains(v)))
            })
        };

        let mut order: Vec<usize> = (0..run.members.len()).collect();
        let mut found = Vec::new();
        loop {
            if valid(&order) {
                if found.len() == limit {
                    return Ok((found, true));
                }
                found.push(order.clone());
            }
            if !next_permutation(&mut order) {
                return Ok((found, false));
            }
        }
    }
}

/// Advances `items` to the next lexicographic permutation. Returns false
/// after the last one.
fn next_permutation(items: &mut [usize]) -> bool {
    let Some(pivot) = items.windows(2).rposition(|w| w[0] < w[1]) else {
        return false;
    };
    let Some(successor) = items.iter().rposition(|&x| x > items[pivot]) else {
        return false;
    };
    items.swap(pivot, successor);
    items[pivot + 1..].reverse();
    true
}

impl OptimizerRule for InterchangeAdjacentEnumerations {
    fn name(&self) -> &'static str {
        "interchange-adjacent-enumerations"
    }

    fn level(&self) -> u32 {
        700
    }

    fn apply(&self, plan: &mut ExecutionPlan, ctx: &mut RuleContext<'_>) -> Result<RuleEffect> {
        let runs = Self::runs(plan)?;
        let budget = ctx.remaining_plans();
        if runs.is_empty() {
            return Ok(RuleEffect::Unchanged);
        }

        let mut truncated = false;
        let mut orderings = Vec::with_capacity(runs.len());
        for run in &runs {
            let (found, more) = Self::orderings(plan, run, budget.saturating_add(1))?;
            truncated |= more;
            orderings.push(found);
        }
        if orderings.iter().all(|o| o.len() < 2) {
            if truncated {
                ctx.mark_truncated();
            }
            return Ok(RuleEffect::Unchanged);
        }

        // Odometer over the product of all runs' orderings; all zeros is the
        // unchanged plan.
        let mut digits = vec![0usize; runs.len()];
        let mut siblings = Vec::new();
        loop {
            let mut position = digits.len();
            let advanced = loop {
                if position == 0 {
                    break false;
                }
                position -= 1;
                digits[position] += 1;
                if digits[position] < orderings[position].len() {
                    break true;
                }
                digits[position] = 0;
            };
            if !advanced {
                break;
            }
            if siblings.len() == budget {
                truncated = true;
                break;
            }

            let mut sibling = plan.clone();
            for ((run, choices), digit) in runs.iter().zip(&orderings).zip(&digits) {
                if *digit == 0 {
                    continue;
                }
                let order: Vec<PlanNodeId> = choices[*digit].iter().map(|&i| run.members[i]).collect();
                let old_top = run.members[run.members.len() - 1];
                sibling.relink_run(run.below, &order, run.above, old_top)?;
            }
            siblings.push(sibling);
        }

        if truncated {
            ctx.mark_truncated();
        }
        if siblings.is_empty() {
            return Ok(RuleEffect::Unchanged);
        }
        debug!(siblings = siblings.len(), truncated, "enumeration interchange");
        Ok(RuleEffect::Branched(siblings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::builder::PlanBuilder;
    use crate::query::expr::Expression;
    use crate::query::plan::NodeType;
    use tessera_core::MemoryStorage;

    fn nested_loops(n: usize) -> ExecutionPlan {
        let mut b = PlanBuilder::new();
        let vars: Vec<_> = (0..n)
            .map(|i| b.for_collection(&format!("v{i}"), &format!("c{i}")).unwrap())
            .collect();
        let row = b
            .let_("row", Expression::array(vars.into_iter().map(Expression::variable).collect()))
            .unwrap();
        b.return_(row).unwrap();
        b.build().unwrap()
    }

    fn apply(plan: &mut ExecutionPlan, budget: usize) -> (RuleEffect, bool) {
        let storage = MemoryStorage::new();
        let mut ctx = RuleContext::new(&storage, false, budget);
        let effect = InterchangeAdjacentEnumerations.apply(plan, &mut ctx).unwrap();
        (effect, ctx.truncated())
    }

    #[test]
    fn test_next_permutation() {
        let mut items = vec![0, 1, 2];
        let mut count = 1;
        while next_permutation(&mut items) {
            count += 1;
        }
        assert_eq!(count, 6);
        assert_eq!(items, vec![2, 1, 0]);
    }

    #[test]
    fn test_three_loops_give_five_siblings() {
        let mut plan = nested_loops(3);
        let (effect, truncated) = apply(&mut plan, 100);
        let RuleEffect::Branched(siblings) = effect else {
            panic!("expected siblings");
        };
        assert_eq!(siblings.len(), 5);
        assert!(!truncated);
        // The first sibling swaps the two innermost loops.
        let chain = siblings[0].chain(siblings[0].root().unwrap()).unwrap();
        let collections: Vec<_> = chain
            .iter()
            .filter_map(|id| match siblings[0].kind(*id).unwrap() {
                NodeKind::EnumerateCollection(op) => Some(op.collection.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(collections, vec!["c0", "c2", "c1"]);
    }

    #[test]
    fn test_budget_truncates() {
        let mut plan = nested_loops(4);
        let (effect, truncated) = apply(&mut plan, 10);
        let RuleEffect::Branched(siblings) = effect else {
            panic!("expected siblings");
        };
        assert_eq!(siblings.len(), 10);
        assert!(truncated);
    }

    #[test]
    fn test_dependent_loops_not_swapped() {
        let mut b = PlanBuilder::new();
        let nested = Expression::array(vec![Expression::array(vec![Expression::literal(1)])]);
        let list = b.let_("l", nested).unwrap();
        let x = b.for_list("x", list).unwrap();
        // Iterates the element produced by the outer loop.
        let y = b.for_list("y", x).unwrap();
        b.return_(y).unwrap();
        let mut plan = b.build().unwrap();
        assert_eq!(plan.nodes_of_type(NodeType::EnumerateList, false).unwrap().len(), 2);
        assert!(matches!(apply(&mut plan, 10).0, RuleEffect::Unchanged));
    }
}
