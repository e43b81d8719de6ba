//! Cluster distribution.

use super::{OptimizerRule, RuleContext, RuleEffect};
use crate::query::plan::{ExecutionPlan, GatherOp, NodeKind, NodeType};
use tessera_common::Result;
use tracing::debug;

/// Splits the bottom of the main chain into per-shard snippets joined by a
/// `Gather` node.
///
/// The snippet starts with the scan of a sharded collection directly on the
/// singleton and extends over the calculations and filters above it, plus an
/// optional sort. When the snippet ends in a sort, the gather merges the
/// shard streams on the same keys.
pub struct DistributeInCluster;

impl OptimizerRule for DistributeInCluster {
    fn name(&self) -> &'static str {
        "distribute-in-cluster"
    }

    fn level(&self) -> u32 {
        1200
    }

    fn can_be_disabled(&self) -> bool {
        false
    }

    fn apply(&self, plan: &mut ExecutionPlan, ctx: &mut RuleContext<'_>) -> Result<RuleEffect> {
        if !ctx.distributed() || !plan.nodes_of_type(NodeType::Gather, true)?.is_empty() {
            return Ok(RuleEffect::Unchanged);
        }
        let chain = plan.chain(plan.root()?)?;
        let Some(&scan) = chain.get(1) else {
            return Ok(RuleEffect::Unchanged);
        };
        let collection = match plan.kind(scan)? {
            NodeKind::EnumerateCollection(op) if op.shard.is_none() => op.collection.clone(),
            NodeKind::IndexScan(op) if op.shard.is_none() => op.collection.clone(),
            _ => return Ok(RuleEffect::Unchanged),
        };
        let shards = ctx.storage().statistics(&collection)?.shard_count;
        if shards < 2 {
            return Ok(RuleEffect::Unchanged);
        }

        let mut top = 1;
        let mut elements = Vec::new();
        for (position, id) in chain.iter().enumerate().skip(2) {
            match plan.kind(*id)? {
                NodeKind::Calculation(_) | NodeKind::Filter(_) => top = position,
                NodeKind::Sort(op) => {
                    top = position;
                    elements.clone_from(&op.elements);
                    break;
                }
                _ => break,
            }
        }
        // The root is always a Return, so the snippet has a consumer.
        let Some(&consumer) = chain.get(top + 1) else {
            return Ok(RuleEffect::Unchanged);
        };
        debug!(collection = %collection, shards, sorted = !elements.is_empty(), "distribute");
        plan.insert_dependency(consumer, NodeKind::Gather(GatherOp { collection, elements }))?;
        Ok(RuleEffect::Modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::builder::PlanBuilder;
    use crate::query::expr::Expression;
    use tessera_core::{CollectionKind, MemoryStorage};

    fn storage() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.create_collection_with("sharded", CollectionKind::Document, 4).unwrap();
        storage.create_collection("single").unwrap();
        storage
    }

    fn apply(plan: &mut ExecutionPlan, distributed: bool) -> RuleEffect {
        let storage = storage();
        let mut ctx = RuleContext::new(&storage, distributed, 0);
        DistributeInCluster.apply(plan, &mut ctx).unwrap()
    }

    fn sorted_scan(collection: &str) -> ExecutionPlan {
        let mut b = PlanBuilder::new();
        let d = b.for_collection("d", collection).unwrap();
        b.filter(Expression::variable(d).attribute("ok")).unwrap();
        b.sort_by(Expression::variable(d).attribute("n"), true).unwrap();
        b.limit(0, 5).unwrap();
        b.return_(d).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_gather_above_sorted_snippet() {
        let mut plan = sorted_scan("sharded");
        assert!(matches!(apply(&mut plan, true), RuleEffect::Modified));

        let chain = plan.chain(plan.root().unwrap()).unwrap();
        let types: Vec<_> = chain.iter().map(|id| plan.kind(*id).unwrap().node_type()).collect();
        assert_eq!(
            types,
            vec![
                NodeType::Singleton,
                NodeType::EnumerateCollection,
                NodeType::Calculation,
                NodeType::Filter,
                NodeType::Calculation,
                NodeType::Sort,
                NodeType::Gather,
                NodeType::Limit,
                NodeType::Return,
            ]
        );
        let NodeKind::Gather(op) = plan.kind(chain[6]).unwrap() else {
            panic!("expected gather");
        };
        assert_eq!(op.elements.len(), 1);
        assert!(!DistributeInCluster.can_be_disabled());
    }

    #[test]
    fn test_requires_cluster_and_shards() {
        let mut plan = sorted_scan("sharded");
        assert!(matches!(apply(&mut plan, false), RuleEffect::Unchanged));
        let mut plan = sorted_scan("single");
        assert!(matches!(apply(&mut plan, true), RuleEffect::Unchanged));
    }

    #[test]
    fn test_applies_once() {
        let mut plan = sorted_scan("sharded");
        apply(&mut plan, true);
        assert!(matches!(apply(&mut plan, true), RuleEffect::Unchanged));
    }
}
