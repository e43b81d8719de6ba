//! Cardinality and cost estimation.
//!
//! Estimates, bottom-up along a chain, how many rows each node produces and
//! what producing them costs. Enumerations take their row counts from
//! collection statistics or index selectivity, filters multiply by an
//! estimated selectivity and traversals by the edge fanout. The numbers are
//! heuristics: only their relative ordering matters.

use crate::query::expr::{BinaryOp, ComparisonOp, Expression, UnaryOp};
use crate::query::plan::{ExecutionPlan, IndexScanOp, NodeKind};
use serde::Serialize;
use tessera_common::utils::hash::{FastHashMap, fast_map};
use tessera_common::{PlanNodeId, Result, Value, VariableId};
use tessera_core::{CollectionStatistics, StorageEngine};

/// Estimate for the chain ending at one node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CostEstimate {
    /// Rows the node produces.
    pub items: f64,
    /// Accumulated cost of the chain up to and including the node.
    pub cost: f64,
}

/// Rows assumed for an array whose length is unknown at planning time.
const DEFAULT_LIST_LENGTH: f64 = 100.0;

/// Cost estimator.
#[derive(Debug, Clone)]
pub struct CostEstimator {
    /// Statistics per collection.
    collection_stats: FastHashMap<String, CollectionStatistics>,
    /// Index selectivity per `(collection, path, operator)`.
    index_selectivity: FastHashMap<(String, String, String), f64>,
    /// Row count for collections without statistics.
    default_row_count: u64,
    /// Selectivity for predicates the estimator cannot classify.
    default_selectivity: f64,
    /// Edges per vertex for edge collections without statistics.
    avg_fanout: f64,
}

impl CostEstimator {
    /// Creates an estimator without statistics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collection_stats: fast_map(),
            index_selectivity: fast_map(),
            default_row_count: 1000,
            default_selectivity: 0.1,
            avg_fanout: 10.0,
        }
    }

    /// Adds statistics for a collection.
    pub fn add_collection_stats(&mut self, stats: CollectionStatistics) {
        self.collection_stats.insert(stats.name.clone(), stats);
    }

    /// Sets the fanout used for edge collections without statistics.
    pub fn set_avg_fanout(&mut self, fanout: f64) {
        self.avg_fanout = fanout;
    }

    /// Pulls statistics for every collection and index scan of `plan` from
    /// `storage`.
    pub fn observe(&mut self, plan: &ExecutionPlan, storage: &dyn StorageEngine) -> Result<()> {
        for id in plan.all_nodes()? {
            let kind = plan.kind(id)?;
            for collection in kind.collections() {
                if !self.collection_stats.contains_key(collection) {
                    if let Ok(stats) = storage.statistics(collection) {
                        self.add_collection_stats(stats);
                    }
                }
            }
            if let NodeKind::IndexScan(op) = kind {
                let answer = storage.can_answer(&op.collection, &op.path, op.op);
                if answer.supported {
                    self.index_selectivity
                        .insert(index_key(op), answer.selectivity);
                }
            }
        }
        Ok(())
    }

    /// Estimates the chain ending at `id`. Dependencies are read through the
    /// plan's cost cache.
    pub fn estimate(&self, plan: &ExecutionPlan, id: PlanNodeId) -> Result<CostEstimate> {
        let node = plan.node(id)?;
        let input = match node.dependency() {
            Some(dep) => plan.node_cost(dep, self)?,
            None => CostEstimate::default(),
        };
        let rows = input.items;
        let (items, own) = match &node.kind {
            NodeKind::Singleton => (1.0, 1.0),
            NodeKind::EnumerateCollection(op) => {
                let n = self.collection_rows(&op.collection, op.shard.is_some());
                (rows * n, rows * n)
            }
            NodeKind::IndexScan(op) => {
                let n = self.collection_rows(&op.collection, op.shard.is_some());
                let selectivity = self
                    .index_selectivity
                    .get(&index_key(op))
                    .copied()
                    .unwrap_or(self.default_selectivity);
                let items = rows * n * selectivity;
                // One lookup per input row plus the matches.
                (items, items + rows)
            }
            NodeKind::EnumerateList(op) => {
                let n = list_length(plan, op.in_variable).unwrap_or(DEFAULT_LIST_LENGTH);
                (rows * n, rows * n)
            }
            NodeKind::Calculation(_) | NodeKind::Return(_) | NodeKind::Gather(_) => (rows, rows),
            NodeKind::Insert(_) | NodeKind::Update(_) | NodeKind::Remove(_) => (rows, rows),
            NodeKind::Filter(op) => {
                let selectivity = self.filter_selectivity(plan, op.in_variable);
                (rows * selectivity, rows)
            }
            NodeKind::Sort(_) => {
                let n = rows.max(1.0);
                (rows, n * n.log2().max(1.0))
            }
            NodeKind::Limit(op) => {
                let items = (rows - op.offset as f64).max(0.0).min(op.count as f64);
                (items, items)
            }
            NodeKind::Collect(op) => {
                let items = if op.groups.is_empty() {
                    1.0
                } else {
                    let reduction = 10.0_f64.powi(op.groups.len() as i32);
                    (rows / reduction).max(1.0).min(rows)
                };
                (items, rows)
            }
            NodeKind::Traversal(op) => {
                let fanout = self
                    .collection_stats
                    .get(&op.edge_collection)
                    .map_or(self.avg_fanout, |s| s.average_degree.max(1.0));
                let per_start: f64 = (op.min_depth..=op.max_depth)
                    .map(|d| fanout.powi(d as i32))
                    .sum();
                (rows * per_start, rows * per_start)
            }
            NodeKind::Subquery(op) => {
                let nested = if op.count_only {
                    // Count-only subqueries never materialize through Return.
                    match plan.node(op.subquery)?.dependency() {
                        Some(dep) => plan.node_cost(dep, self)?,
                        None => plan.node_cost(op.subquery, self)?,
                    }
                } else {
                    plan.node_cost(op.subquery, self)?
                };
                (rows, rows * nested.cost)
            }
            NodeKind::NoResults => (0.0, 0.5),
        };
        Ok(CostEstimate {
            items,
            cost: input.cost + own,
        })
    }

    fn collection_rows(&self, collection: &str, single_shard: bool) -> f64 {
        match self.collection_stats.get(collection) {
            Some(stats) if single_shard => stats.document_count as f64 / stats.shard_count as f64,
            Some(stats) => stats.document_count as f64,
            None => self.default_row_count as f64,
        }
    }

    fn filter_selectivity(&self, plan: &ExecutionPlan, var: VariableId) -> f64 {
        let Some(setter) = plan.setter_of(var) else {
            return self.default_selectivity;
        };
        match plan.kind(setter) {
            Ok(NodeKind::Calculation(calc)) => self.expression_selectivity(&calc.expression),
            _ => self.default_selectivity,
        }
    }

    /// Estimates the fraction of rows for which `expr` is truthy.
    #[must_use]
    pub fn expression_selectivity(&self, expr: &Expression) -> f64 {
        match expr {
            Expression::Literal(value) => {
                if value.to_bool() {
                    1.0
                } else {
                    0.0
                }
            }
            Expression::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    self.expression_selectivity(left) * self.expression_selectivity(right)
                }
                BinaryOp::Or => {
                    let l = self.expression_selectivity(left);
                    let r = self.expression_selectivity(right);
                    1.0 - (1.0 - l) * (1.0 - r)
                }
                BinaryOp::Compare(cmp) => comparison_selectivity(*cmp),
                _ => self.default_selectivity,
            },
            Expression::Quantified { op, .. } => comparison_selectivity(*op),
            Expression::Unary {
                op: UnaryOp::Not,
                operand,
            } => 1.0 - self.expression_selectivity(operand),
            _ => self.default_selectivity,
        }
    }
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn comparison_selectivity(op: ComparisonOp) -> f64 {
    match op {
        // Equality is typically very selective
        ComparisonOp::Eq => 0.01,
        // Inequality is very unselective
        ComparisonOp::Ne => 0.99,
        ComparisonOp::Lt | ComparisonOp::Le | ComparisonOp::Gt | ComparisonOp::Ge => 0.33,
        ComparisonOp::In => 0.1,
        ComparisonOp::NotIn => 0.9,
    }
}

fn index_key(op: &IndexScanOp) -> (String, String, String) {
    (op.collection.clone(), op.path.to_string(), op.op.to_string())
}

/// Length of the array held by `var` when it is known at planning time.
fn list_length(plan: &ExecutionPlan, var: VariableId) -> Option<f64> {
    let setter = plan.setter_of(var)?;
    let NodeKind::Calculation(calc) = plan.kind(setter).ok()? else {
        return None;
    };
    match &calc.expression {
        Expression::Array(items) => Some(items.len() as f64),
        Expression::Literal(Value::List(items)) => Some(items.len() as f64),
        Expression::Range { low, high } => match (low.as_ref(), high.as_ref()) {
            (Expression::Literal(Value::Int64(l)), Expression::Literal(Value::Int64(h))) => {
                Some(h.abs_diff(*l) as f64 + 1.0)
            }
            _ => None,
        },
        _ => None,
    }
}
