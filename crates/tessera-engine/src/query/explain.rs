//! Explain output.

use crate::query::optimizer::{CostEstimator, OptimizedPlans, OptimizerStats};
use crate::query::plan::ExecutionPlan;
use serde::Serialize;
use tessera_common::{Error, Result};
use tessera_core::StorageEngine;

/// One node of an explained plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainedNode {
    /// Node id.
    pub id: u32,
    /// Node type name, e.g. `EnumerateCollectionNode`.
    #[serde(rename = "type")]
    pub node_type: &'static str,
    /// Ids of the nodes this node reads from.
    pub dependencies: Vec<u32>,
    /// Estimated cost of the chain up to and including this node.
    pub estimated_cost: f64,
    /// Estimated rows produced.
    pub estimated_items: f64,
    /// Human readable description.
    pub detail: String,
}

/// One candidate plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainedPlan {
    /// Nodes, top-down along the main chain with nested chains after their
    /// subquery node.
    pub nodes: Vec<ExplainedNode>,
    /// Names of the rules applied to this plan, in order.
    pub rules: Vec<&'static str>,
    /// Estimated total cost.
    pub estimated_cost: f64,
    /// Estimated result rows.
    pub estimated_items: f64,
}

/// Result of explaining a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    /// The winning plan, or every candidate ordered by ascending cost.
    pub plans: Vec<ExplainedPlan>,
    /// Optimizer counters.
    pub stats: OptimizerStats,
}

impl Explanation {
    /// Builds the explanation of an optimization result. Without
    /// `all_plans` only the cheapest candidate is described.
    pub fn from_optimized(
        optimized: &OptimizedPlans,
        storage: &dyn StorageEngine,
        all_plans: bool,
    ) -> Result<Self> {
        let mut estimator = CostEstimator::new();
        for candidate in &optimized.candidates {
            estimator.observe(&candidate.plan, storage)?;
        }
        let take = if all_plans { optimized.candidates.len() } else { 1 };
        let plans = optimized
            .candidates
            .iter()
            .take(take)
            .map(|c| explain_plan(&c.plan, &estimator))
            .collect::<Result<Vec<_>>>()?;
        if plans.is_empty() {
            return Err(Error::Internal("optimizer returned no plan".to_string()));
        }
        Ok(Self {
            plans,
            stats: optimized.stats,
        })
    }

    /// The winning plan.
    #[must_use]
    pub fn best(&self) -> Option<&ExplainedPlan> {
        self.plans.first()
    }

    /// Renders the explanation as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| Error::Internal(format!("explain serialization failed: {e}")))
    }
}

fn explain_plan(plan: &ExecutionPlan, estimator: &CostEstimator) -> Result<ExplainedPlan> {
    let registry = plan.variables();
    let mut ids = plan.all_nodes()?;
    ids.reverse();
    let nodes = ids
        .into_iter()
        .map(|id| {
            let node = plan.node(id)?;
            let estimate = plan.node_cost(id, estimator)?;
            Ok(ExplainedNode {
                id: id.as_u32(),
                node_type: node.kind.node_type().name(),
                dependencies: node.dependencies.iter().map(|d| d.as_u32()).collect(),
                estimated_cost: estimate.cost,
                estimated_items: estimate.items,
                detail: node.kind.describe(registry),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let total = plan.estimated_cost(estimator)?;
    Ok(ExplainedPlan {
        nodes,
        rules: plan.applied_rules().to_vec(),
        estimated_cost: total.cost,
        estimated_items: total.items,
    })
}
