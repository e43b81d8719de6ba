//! Index rules.

use super::{
    OptimizerRule, RuleContext, RuleEffect, calculation_of, enclosing_chain, modified, subquery_modifies,
};
use crate::query::expr::{BinaryOp, ComparisonOp, Expression, Quantifier};
use crate::query::plan::{ExecutionPlan, IndexScanOp, NodeKind, NodeType};
use std::collections::BTreeSet;
use tessera_common::{PlanNodeId, Result, VariableId};
use tessera_core::index::{AttributePath, IndexOperator, PathSegment};
use tracing::debug;

/// An index-answerable condition found in a filter.
#[derive(Debug, Clone, PartialEq)]
struct IndexCandidate {
    path: AttributePath,
    op: IndexOperator,
    value: Expression,
    condition: Expression,
}

fn index_operator(op: ComparisonOp) -> Option<IndexOperator> {
    match op {
        ComparisonOp::Eq => Some(IndexOperator::Eq),
        ComparisonOp::Lt => Some(IndexOperator::Lt),
        ComparisonOp::Le => Some(IndexOperator::Le),
        ComparisonOp::Gt => Some(IndexOperator::Gt),
        ComparisonOp::Ge => Some(IndexOperator::Ge),
        ComparisonOp::In => Some(IndexOperator::In),
        ComparisonOp::Ne | ComparisonOp::NotIn => None,
    }
}

/// True for nodes that write documents, directly or inside a subquery.
/// Rows reaching such a node must not be narrowed by a filter above it.
fn writes(plan: &ExecutionPlan, kind: &NodeKind) -> Result<bool> {
    Ok(match kind {
        NodeKind::Subquery(op) => subquery_modifies(plan, op.subquery)?,
        other => other.is_modification(),
    })
}

/// Splits a condition on its top-level `AND`s.
fn conjuncts(expression: &Expression) -> Vec<&Expression> {
    match expression {
        Expression::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            let mut out = conjuncts(left);
            out.extend(conjuncts(right));
            out
        }
        other => vec![other],
    }
}

/// Replaces collection scans by index scans when a filter on the scanned
/// document can be answered by an index.
///
/// Recognized conditions are `path op value`, `value op path`,
/// `path ANY op value` and `value IN path`, with `op` one of `==`, `<`,
/// `<=`, `>`, `>=` and `IN`. The filter itself is kept.
pub struct UseIndexes;

impl UseIndexes {
    /// Matches one conjunct against the recognized shapes. `unavailable` holds
    /// the variables the value side must not read.
    fn match_condition(
        condition: &Expression,
        doc: VariableId,
        unavailable: &BTreeSet<VariableId>,
    ) -> Option<IndexCandidate> {
        let plain_path = |e: &Expression| e.attribute_path(doc).filter(|p| !p.is_expanded());
        let usable = |e: &Expression| {
            e.is_deterministic()
                && !e.can_throw()
                && e.variables().iter().all(|v| !unavailable.contains(v))
        };
        let candidate = |path: AttributePath, op: IndexOperator, value: &Expression| IndexCandidate {
            path,
            op,
            value: value.clone(),
            condition: condition.clone(),
        };

        match condition {
            Expression::Binary {
                op: BinaryOp::Compare(cmp),
                left,
                right,
            } => {
                let (left, right) = (&**left, &**right);
                let op = index_operator(*cmp)?;
                if let Some(path) = plain_path(left) {
                    return usable(right).then(|| candidate(path, op, right));
                }
                let path = plain_path(right)?;
                if !usable(left) {
                    return None;
                }
                match op.reversed() {
                    Some(reversed) => Some(candidate(path, reversed, left)),
                    // `value IN path` looks the value up among the elements.
                    None => Some(candidate(path.with(PathSegment::Expand), IndexOperator::Eq, left)),
                }
            }
            Expression::Quantified {
                quantifier: Quantifier::Any,
                op,
                left,
                right,
            } => {
                let op = index_operator(*op)?;
                let path = plain_path(&**left)?;
                usable(&**right).then(|| candidate(path.with(PathSegment::Expand), op, &**right))
            }
            _ => None,
        }
    }

    /// Conditions of filters above `scan` in its chain that refer to the
    /// scanned document, in chain order.
    fn candidates(
        plan: &ExecutionPlan,
        scan: PlanNodeId,
        doc: VariableId,
    ) -> Result<Vec<IndexCandidate>> {
        let chain = enclosing_chain(plan, scan)?;
        let Some(position) = chain.iter().position(|id| *id == scan) else {
            return Ok(Vec::new());
        };
        let mut unavailable = BTreeSet::new();
        for id in &chain[position..] {
            unavailable.extend(plan.kind(*id)?.variables_set());
        }

        let mut found = Vec::new();
        for id in &chain[position + 1..] {
            let kind = plan.kind(*id)?;
            if writes(plan, kind)? {
                break;
            }
            match kind {
                // The set of rows reaching anything above these depends on
                // the scan order.
                NodeKind::Limit(_) | NodeKind::Collect(_) => break,
                NodeKind::Filter(filter) => {
                    let Some((_, calc)) = calculation_of(plan, filter.in_variable) else {
                        continue;
                    };
                    for conjunct in conjuncts(&calc.expression) {
                        if let Some(c) = Self::match_condition(conjunct, doc, &unavailable) {
                            found.push(c);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(found)
    }
}

impl OptimizerRule for UseIndexes {
    fn name(&self) -> &'static str {
        "use-indexes"
    }

    fn level(&self) -> u32 {
        800
    }

    fn apply(&self, plan: &mut ExecutionPlan, ctx: &mut RuleContext<'_>) -> Result<RuleEffect> {
        let mut changed = false;
        for id in plan.nodes_of_type(NodeType::EnumerateCollection, true)? {
            let NodeKind::EnumerateCollection(op) = plan.kind(id)? else {
                continue;
            };
            if op.random || op.shard.is_some() {
                continue;
            }
            let (collection, doc) = (op.collection.clone(), op.out_variable);

            let mut best: Option<(f64, IndexCandidate)> = None;
            for candidate in Self::candidates(plan, id, doc)? {
                let answer = ctx.storage().can_answer(&collection, &candidate.path, candidate.op);
                if !answer.supported {
                    continue;
                }
                // Ties keep the earlier filter.
                if best.as_ref().is_none_or(|(s, _)| answer.selectivity < *s) {
                    best = Some((answer.selectivity, candidate));
                }
            }
            let Some((selectivity, chosen)) = best else {
                continue;
            };
            debug!(collection = %collection, path = %chosen.path, op = %chosen.op, selectivity, "use index");
            plan.replace_node(
                id,
                NodeKind::IndexScan(IndexScanOp {
                    collection,
                    out_variable: doc,
                    path: chosen.path,
                    op: chosen.op,
                    value: chosen.value,
                    condition: chosen.condition,
                    shard: None,
                }),
            )?;
            changed = true;
        }
        Ok(modified(changed))
    }
}

/// Removes a filter whose condition is exactly the condition an index scan
/// below it already guarantees.
pub struct RemoveFilterCoveredByIndex;

impl OptimizerRule for RemoveFilterCoveredByIndex {
    fn name(&self) -> &'static str {
        "remove-filter-covered-by-index"
    }

    fn level(&self) -> u32 {
        900
    }

    fn apply(&self, plan: &mut ExecutionPlan, _ctx: &mut RuleContext<'_>) -> Result<RuleEffect> {
        let mut changed = false;
        for scan in plan.nodes_of_type(NodeType::IndexScan, true)? {
            let NodeKind::IndexScan(op) = plan.kind(scan)? else {
                continue;
            };
            let condition = op.condition.clone();
            let chain = enclosing_chain(plan, scan)?;
            let Some(position) = chain.iter().position(|id| *id == scan) else {
                continue;
            };

            let mut covered = Vec::new();
            for id in &chain[position + 1..] {
                let kind = plan.kind(*id)?;
                if writes(plan, kind)? {
                    break;
                }
                match kind {
                    NodeKind::Collect(_) => break,
                    NodeKind::Filter(filter) => {
                        if calculation_of(plan, filter.in_variable)
                            .is_some_and(|(_, calc)| calc.expression == condition)
                        {
                            covered.push(*id);
                        }
                    }
                    _ => {}
                }
            }
            for id in covered {
                plan.remove_node(id)?;
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
    use tessera_core::MemoryStorage;
    use tessera_core::StorageEngine;

    fn storage() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.create_collection("c").unwrap();
        storage.ensure_index("c", "a").unwrap();
        storage.ensure_index("c", "tags[*]").unwrap();
        storage
    }

    fn apply(rule: &dyn OptimizerRule, plan: &mut ExecutionPlan, storage: &dyn StorageEngine) -> RuleEffect {
        let mut ctx = RuleContext::new(storage, false, 0);
        rule.apply(plan, &mut ctx).unwrap()
    }

    fn scan_op(plan: &ExecutionPlan) -> Option<IndexScanOp> {
        plan.nodes_of_type(NodeType::IndexScan, true)
            .unwrap()
            .first()
            .and_then(|id| match plan.kind(*id).unwrap() {
                NodeKind::IndexScan(op) => Some(op.clone()),
                _ => None,
            })
    }

    fn filtered(condition: impl FnOnce(VariableId) -> Expression) -> ExecutionPlan {
        let mut b = PlanBuilder::new();
        let d = b.for_collection("d", "c").unwrap();
        b.filter(condition(d)).unwrap();
        b.return_(d).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_equality_uses_index() {
        let storage = storage();
        let mut plan = filtered(|d| Expression::variable(d).attribute("a").equals(Expression::literal(3)));
        assert!(matches!(apply(&UseIndexes, &mut plan, &storage), RuleEffect::Modified));

        let op = scan_op(&plan).unwrap();
        assert_eq!(op.path, AttributePath::attributes(["a"]));
        assert_eq!(op.op, IndexOperator::Eq);
        // The filter is only removed by the covering rule.
        assert_eq!(plan.nodes_of_type(NodeType::Filter, false).unwrap().len(), 1);
        assert!(matches!(
            apply(&RemoveFilterCoveredByIndex, &mut plan, &storage),
            RuleEffect::Modified
        ));
        assert!(plan.nodes_of_type(NodeType::Filter, false).unwrap().is_empty());
    }

    #[test]
    fn test_reversed_comparison() {
        let storage = storage();
        let mut plan = filtered(|d| {
            Expression::compare(ComparisonOp::Gt, Expression::literal(5), Expression::variable(d).attribute("a"))
        });
        apply(&UseIndexes, &mut plan, &storage);
        assert_eq!(scan_op(&plan).unwrap().op, IndexOperator::Lt);
    }

    #[test]
    fn test_any_and_in_array_use_expanded_index() {
        let storage = storage();
        let mut plan = filtered(|d| {
            Expression::quantified(
                Quantifier::Any,
                ComparisonOp::Eq,
                Expression::variable(d).attribute("tags"),
                Expression::literal("x"),
            )
        });
        apply(&UseIndexes, &mut plan, &storage);
        let op = scan_op(&plan).unwrap();
        assert_eq!(op.path, AttributePath::parse("tags[*]").unwrap());
        assert_eq!(op.op, IndexOperator::Eq);

        let mut plan = filtered(|d| {
            Expression::compare(
                ComparisonOp::In,
                Expression::literal("x"),
                Expression::variable(d).attribute("tags"),
            )
        });
        apply(&UseIndexes, &mut plan, &storage);
        assert_eq!(scan_op(&plan).unwrap().path, AttributePath::parse("tags[*]").unwrap());
    }

    #[test]
    fn test_unsupported_conditions_keep_scan() {
        let storage = storage();
        let conditions: Vec<Box<dyn Fn(VariableId) -> Expression>> = vec![
            Box::new(|d| {
                Expression::compare(ComparisonOp::Ne, Expression::variable(d).attribute("a"), Expression::literal(1))
            }),
            Box::new(|d| {
                Expression::quantified(
                    Quantifier::All,
                    ComparisonOp::Eq,
                    Expression::variable(d).attribute("tags"),
                    Expression::literal("x"),
                )
            }),
            Box::new(|d| {
                Expression::quantified(
                    Quantifier::None,
                    ComparisonOp::Eq,
                    Expression::variable(d).attribute("tags"),
                    Expression::literal("x"),
                )
            }),
            // No index on `b`.
            Box::new(|d| Expression::variable(d).attribute("b").equals(Expression::literal(1))),
            // Both sides read the document.
            Box::new(|d| {
                Expression::variable(d)
                    .attribute("a")
                    .equals(Expression::variable(d).attribute("b"))
            }),
        ];
        for condition in conditions {
            let mut plan = filtered(condition);
            assert!(matches!(apply(&UseIndexes, &mut plan, &storage), RuleEffect::Unchanged));
        }
    }

    #[test]
    fn test_conjunct_keeps_filter() {
        let storage = storage();
        let mut plan = filtered(|d| {
            Expression::and(
                Expression::variable(d).attribute("a").equals(Expression::literal(3)),
                Expression::variable(d).attribute("b").equals(Expression::literal(4)),
            )
        });
        apply(&UseIndexes, &mut plan, &storage);
        assert!(scan_op(&plan).is_some());
        assert!(matches!(
            apply(&RemoveFilterCoveredByIndex, &mut plan, &storage),
            RuleEffect::Unchanged
        ));
    }

    fn a_equals_one(d: VariableId) -> Expression {
        Expression::variable(d).attribute("a").equals(Expression::literal(1))
    }

    #[test]
    fn test_filter_above_write_keeps_scan() {
        let storage = storage();

        // FOR d IN c LET r = (REMOVE d IN c RETURN d) FILTER d.a == 1 RETURN d
        let mut b = PlanBuilder::new();
        let d = b.for_collection("d", "c").unwrap();
        b.subquery("r", |b| {
            b.remove("c", d, None)?;
            Ok(d)
        })
        .unwrap();
        b.filter(a_equals_one(d)).unwrap();
        b.return_(d).unwrap();
        let mut plan = b.build().unwrap();
        assert!(matches!(apply(&UseIndexes, &mut plan, &storage), RuleEffect::Unchanged));

        // FOR d IN c UPDATE d IN c FILTER d.a == 1 RETURN d
        let mut b = PlanBuilder::new();
        let d = b.for_collection("d", "c").unwrap();
        b.update("c", d, None).unwrap();
        b.filter(a_equals_one(d)).unwrap();
        b.return_(d).unwrap();
        let mut plan = b.build().unwrap();
        assert!(matches!(apply(&UseIndexes, &mut plan, &storage), RuleEffect::Unchanged));
    }

    #[test]
    fn test_covered_filter_above_write_is_kept() {
        let storage = storage();

        // FOR d IN c FILTER d.a == 1 LET r = (REMOVE d IN c RETURN d) FILTER d.a == 1 RETURN d
        let mut b = PlanBuilder::new();
        let d = b.for_collection("d", "c").unwrap();
        b.filter(a_equals_one(d)).unwrap();
        b.subquery("r", |b| {
            b.remove("c", d, None)?;
            Ok(d)
        })
        .unwrap();
        b.filter(a_equals_one(d)).unwrap();
        b.return_(d).unwrap();
        let mut plan = b.build().unwrap();

        assert!(matches!(apply(&UseIndexes, &mut plan, &storage), RuleEffect::Modified));
        assert!(matches!(
            apply(&RemoveFilterCoveredByIndex, &mut plan, &storage),
            RuleEffect::Modified
        ));
        assert_eq!(plan.nodes_of_type(NodeType::Filter, false).unwrap().len(), 1);
    }
}
