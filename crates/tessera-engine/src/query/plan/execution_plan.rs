//! The execution plan arena.

use super::node::{Dependencies, NodeKind, NodeType, PlanNode};
use crate::query::optimizer::cardinality::{CostEstimate, CostEstimator};
use crate::query::traversal::TraversalOrder;
use crate::query::traversal::UniqueVertices;
use crate::query::variable::VariableRegistry;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use tessera_common::utils::hash::{FastHashMap, fast_map};
use tessera_common::{Error, PlanNodeId, Result, Value, VariableId};
use tessera_core::StorageEngine;
use tracing::debug;

/// An execution plan: all nodes of one query, including nested subquery
/// chains, in a single arena indexed by node id.
///
/// Dependencies are stored on the nodes; parents are derived on demand and
/// cached until the next mutation, as are per-node cost estimates.
pub struct ExecutionPlan {
    /// Arena slots; removed nodes leave `None`.
    nodes: Vec<Option<PlanNode>>,
    /// Top of the main chain (a Return node once built).
    root: Option<PlanNodeId>,
    /// Variables of the query.
    variables: VariableRegistry,
    /// Names of the rules that modified this plan, in order.
    applied_rules: Vec<&'static str>,
    /// Highest rule level this plan has been through.
    last_level: u32,
    /// Lazily derived parent links.
    parents: Mutex<Option<FastHashMap<PlanNodeId, SmallVec<[PlanNodeId; 1]>>>>,
    /// Lazily computed cost estimates.
    costs: Mutex<FastHashMap<PlanNodeId, CostEstimate>>,
}

impl ExecutionPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            variables: VariableRegistry::new(),
            applied_rules: Vec::new(),
            last_level: 0,
            parents: Mutex::new(None),
            costs: Mutex::new(fast_map()),
        }
    }

    fn invalidate(&mut self) {
        *self.parents.get_mut() = None;
        self.costs.get_mut().clear();
    }

    // === Variables ===

    /// The variable registry.
    #[must_use]
    pub fn variables(&self) -> &VariableRegistry {
        &self.variables
    }

    /// Mutable access to the variable registry.
    pub fn variables_mut(&mut self) -> &mut VariableRegistry {
        &mut self.variables
    }

    // === Rule bookkeeping ===

    /// Names of the rules that modified this plan.
    #[must_use]
    pub fn applied_rules(&self) -> &[&'static str] {
        &self.applied_rules
    }

    /// Records that `rule` modified this plan.
    pub fn record_rule(&mut self, rule: &'static str) {
        self.applied_rules.push(rule);
    }

    /// Returns true if `rule` has modified this plan.
    #[must_use]
    pub fn has_applied(&self, rule: &str) -> bool {
        self.applied_rules.contains(&rule)
    }

    /// Highest rule level this plan has been through.
    #[must_use]
    pub fn last_level(&self) -> u32 {
        self.last_level
    }

    /// Records that this plan has been through `level`.
    pub fn set_last_level(&mut self, level: u32) {
        self.last_level = self.last_level.max(level);
    }

    // === Nodes ===

    /// Creates a node depending on `dependencies`.
    ///
    /// Unknown dependencies and a dependency count that does not match the
    /// kind are contract violations.
    pub fn create_node(&mut self, kind: NodeKind, dependencies: &[PlanNodeId]) -> Result<PlanNodeId> {
        if dependencies.len() != kind.required_dependencies() {
            return Err(Error::Internal(format!(
                "{} requires {} dependencies, got {}",
                kind.node_type(),
                kind.required_dependencies(),
                dependencies.len()
            )));
        }
        for dep in dependencies {
            self.node(*dep)?;
        }
        let id = PlanNodeId::new(self.nodes.len() as u32);
        debug!(node = %id, kind = %kind.node_type(), "create node");
        self.nodes.push(Some(PlanNode {
            id,
            dependencies: dependencies.iter().copied().collect(),
            kind,
        }));
        self.invalidate();
        Ok(id)
    }

    /// Returns the node with `id`.
    pub fn node(&self, id: PlanNodeId) -> Result<&PlanNode> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Internal(format!("plan node {id} does not exist")))
    }

    /// Returns the node with `id` for modification.
    pub fn node_mut(&mut self, id: PlanNodeId) -> Result<&mut PlanNode> {
        self.invalidate();
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::Internal(format!("plan node {id} does not exist")))
    }

    /// Returns the kind of node `id`.
    pub fn kind(&self, id: PlanNodeId) -> Result<&NodeKind> {
        Ok(&self.node(id)?.kind)
    }

    /// Top of the main chain.
    pub fn root(&self) -> Result<PlanNodeId> {
        self.root
            .ok_or_else(|| Error::Internal("plan has no root".to_string()))
    }

    /// Sets the top of the main chain.
    pub fn set_root(&mut self, id: PlanNodeId) -> Result<()> {
        self.node(id)?;
        self.root = Some(id);
        self.invalidate();
        Ok(())
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// Iterates over live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.iter().flatten()
    }

    /// Copies node `id` under a new id. The copy has the same dependencies
    /// but no parents.
    pub fn clone_node(&mut self, id: PlanNodeId) -> Result<PlanNodeId> {
        let node = self.node(id)?.clone();
        self.create_node(node.kind, &node.dependencies)
    }

    // === Structure ===

    fn compute_parents(&self) -> FastHashMap<PlanNodeId, SmallVec<[PlanNodeId; 1]>> {
        let mut parents: FastHashMap<PlanNodeId, SmallVec<[PlanNodeId; 1]>> = fast_map();
        for node in self.nodes.iter().flatten() {
            for dep in &node.dependencies {
                parents.entry(*dep).or_default().push(node.id);
            }
        }
        parents
    }

    /// Nodes that read from `id`.
    #[must_use]
    pub fn parents(&self, id: PlanNodeId) -> Vec<PlanNodeId> {
        let mut cache = self.parents.lock();
        let parents = cache.get_or_insert_with(|| self.compute_parents());
        parents.get(&id).map(|p| p.to_vec()).unwrap_or_default()
    }

    /// The single node that reads from `id`, if any.
    #[must_use]
    pub fn parent(&self, id: PlanNodeId) -> Option<PlanNodeId> {
        self.parents(id).first().copied()
    }

    /// Ids of the chain ending at `top`, from its Singleton upwards.
    pub fn chain(&self, top: PlanNodeId) -> Result<Vec<PlanNodeId>> {
        let mut chain = Vec::new();
        let mut current = Some(top);
        while let Some(id) = current {
            if chain.len() > self.nodes.len() {
                return Err(Error::Internal("dependency cycle in plan".to_string()));
            }
            chain.push(id);
            current = self.node(id)?.dependency();
        }
        chain.reverse();
        Ok(chain)
    }

    /// Ids of the nodes of `node_type`, dependency-first. With
    /// `enter_subqueries`, nested chains are included, each before the
    /// Subquery node that owns it.
    pub fn nodes_of_type(&self, node_type: NodeType, enter_subqueries: bool) -> Result<Vec<PlanNodeId>> {
        let mut out = Vec::new();
        self.visit_chain(self.root()?, enter_subqueries, &mut |node| {
            if node.kind.node_type() == node_type {
                out.push(node.id);
            }
        })?;
        Ok(out)
    }

    /// Every reachable node id, dependency-first, nested chains included.
    pub fn all_nodes(&self) -> Result<Vec<PlanNodeId>> {
        let mut out = Vec::new();
        self.visit_chain(self.root()?, true, &mut |node| out.push(node.id))?;
        Ok(out)
    }

    fn visit_chain(
        &self,
        top: PlanNodeId,
        enter_subqueries: bool,
        f: &mut impl FnMut(&PlanNode),
    ) -> Result<()> {
        for id in self.chain(top)? {
            let node = self.node(id)?;
            if enter_subqueries {
                if let NodeKind::Subquery(op) = &node.kind {
                    self.visit_chain(op.subquery, true, f)?;
                }
            }
            f(node);
        }
        Ok(())
    }

    /// The Subquery node whose nested chain contains `id`, or `None` for
    /// nodes of the main chain.
    pub fn enclosing_subquery(&self, id: PlanNodeId) -> Result<Option<PlanNodeId>> {
        let mut top = id;
        while let Some(parent) = self.parent(top) {
            top = parent;
        }
        for node in self.nodes.iter().flatten() {
            if let NodeKind::Subquery(op) = &node.kind {
                if op.subquery == top {
                    return Ok(Some(node.id));
                }
            }
        }
        if Some(top) == self.root {
            Ok(None)
        } else {
            Err(Error::Internal(format!("node {id} is not reachable from the plan root")))
        }
    }

    /// Removes node `id`, connecting its parents to its dependency.
    pub fn remove_node(&mut self, id: PlanNodeId) -> Result<()> {
        let node = self.node(id)?;
        let Some(dependency) = node.dependency() else {
            return Err(Error::Internal(format!("cannot remove {} {id}", node.kind.node_type())));
        };
        self.replace_references(id, dependency);
        self.nodes[id.index()] = None;
        self.invalidate();
        debug!(node = %id, "remove node");
        Ok(())
    }

    /// Replaces node `id` by a new node of `kind` with the same dependencies.
    /// Returns the new node's id.
    pub fn replace_node(&mut self, id: PlanNodeId, kind: NodeKind) -> Result<PlanNodeId> {
        let dependencies: Dependencies = self.node(id)?.dependencies.clone();
        let new_id = self.create_node(kind, &dependencies)?;
        self.replace_references(id, new_id);
        self.nodes[id.index()] = None;
        self.invalidate();
        Ok(new_id)
    }

    /// Inserts a new node of `kind` between `node` and its dependency.
    pub fn insert_dependency(&mut self, node: PlanNodeId, kind: NodeKind) -> Result<PlanNodeId> {
        let dependency = self
            .node(node)?
            .dependency()
            .ok_or_else(|| Error::Internal(format!("node {node} has no dependency")))?;
        let new_id = self.create_node(kind, &[dependency])?;
        self.node_mut(node)?.dependencies = SmallVec::from_slice(&[new_id]);
        Ok(new_id)
    }

    /// Detaches `id` from its chain and re-inserts it directly above
    /// `target`, that is between `target` and the node reading from it.
    pub fn move_above(&mut self, id: PlanNodeId, target: PlanNodeId) -> Result<()> {
        if id == target {
            return Ok(());
        }
        let dependency = self
            .node(id)?
            .dependency()
            .ok_or_else(|| Error::Internal(format!("cannot move node {id}")))?;
        let above_target = self
            .parent(target)
            .ok_or_else(|| Error::Internal(format!("node {target} has no parent")))?;
        if above_target == id {
            return Ok(());
        }
        // Unlink, then relink.
        self.replace_references(id, dependency);
        self.invalidate();
        self.replace_dependency(above_target, target, id)?;
        self.node_mut(id)?.dependencies = SmallVec::from_slice(&[target]);
        Ok(())
    }

    /// Rewires a contiguous run of a chain into `order`. `below` is the
    /// dependency of the run's lowest node and `above` the node reading
    /// from its highest node.
    pub fn relink_run(
        &mut self,
        below: PlanNodeId,
        order: &[PlanNodeId],
        above: PlanNodeId,
        old_top: PlanNodeId,
    ) -> Result<()> {
        let mut dependency = below;
        for id in order {
            self.node_mut(*id)?.dependencies = SmallVec::from_slice(&[dependency]);
            dependency = *id;
        }
        self.replace_dependency(above, old_top, dependency)
    }

    fn replace_dependency(&mut self, node: PlanNodeId, old: PlanNodeId, new: PlanNodeId) -> Result<()> {
        let node = self.node_mut(node)?;
        for dep in &mut node.dependencies {
            if *dep == old {
                *dep = new;
            }
        }
        Ok(())
    }

    /// Points every reference to `old` (dependencies, subquery roots, the
    /// plan root) at `new`.
    fn replace_references(&mut self, old: PlanNodeId, new: PlanNodeId) {
        for node in self.nodes.iter_mut().flatten() {
            for dep in &mut node.dependencies {
                if *dep == old {
                    *dep = new;
                }
            }
            if let NodeKind::Subquery(op) = &mut node.kind {
                if op.subquery == old {
                    op.subquery = new;
                }
            }
        }
        if self.root == Some(old) {
            self.root = Some(new);
        }
    }

    // === Variable references ===

    /// The node producing `var`.
    #[must_use]
    pub fn setter_of(&self, var: VariableId) -> Option<PlanNodeId> {
        self.nodes
            .iter()
            .flatten()
            .find(|n| n.kind.variables_set().contains(&var))
            .map(|n| n.id)
    }

    /// Nodes reading `var`.
    #[must_use]
    pub fn users_of(&self, var: VariableId) -> Vec<PlanNodeId> {
        self.nodes
            .iter()
            .flatten()
            .filter(|n| n.kind.variables_used().contains(&var))
            .map(|n| n.id)
            .collect()
    }

    /// Total number of sites (reads and writes) referencing `var`.
    #[must_use]
    pub fn references(&self, var: VariableId) -> usize {
        self.nodes.iter().flatten().map(|n| n.kind.references(var)).sum()
    }

    /// Rewrites every reference to `old` into a reference to `new`, across
    /// all nodes and nested chains. Returns the number of rewritten sites.
    pub fn substitute(&mut self, old: VariableId, new: VariableId) -> Result<usize> {
        if self.variables.get(new).is_none() {
            return Err(Error::Internal(format!("unknown substitution target {new}")));
        }
        let mut count = 0;
        for node in self.nodes.iter_mut().flatten() {
            count += node.kind.replace_variable(old, new);
        }
        self.invalidate();
        debug!(%old, %new, count, "substitute variable");
        Ok(count)
    }

    /// Retires `var`. The variable must no longer be referenced anywhere.
    pub fn remove_variable(&mut self, var: VariableId) -> Result<()> {
        let remaining = self.references(var);
        if remaining > 0 {
            return Err(Error::Internal(format!(
                "variable {} still has {remaining} references",
                self.variables.name(var)
            )));
        }
        self.variables.retire(var)
    }

    // === Validation ===

    /// Replaces all bind parameters by their values.
    pub fn bind_parameters(&mut self, parameters: &BTreeMap<String, Value>) -> Result<()> {
        for node in self.nodes.iter_mut().flatten() {
            for expr in node.kind.expressions_mut() {
                expr.bind_parameters(parameters)?;
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Checks that referenced collections exist and node options are valid.
    pub fn validate(&self, storage: &dyn StorageEngine) -> Result<()> {
        for id in self.all_nodes()? {
            let node = self.node(id)?;
            for collection in node.kind.collections() {
                if !storage.collection_exists(collection) {
                    return Err(Error::CollectionNotFound(collection.to_string()));
                }
            }
            if let NodeKind::Traversal(op) = &node.kind {
                if op.options.unique_vertices == UniqueVertices::Global
                    && op.options.order != TraversalOrder::BreadthFirst
                {
                    return Err(Error::InvalidQuery(
                        "uniqueVertices 'global' requires breadth-first traversal".to_string(),
                    ));
                }
                if op.min_depth > op.max_depth {
                    return Err(Error::InvalidQuery(format!(
                        "invalid traversal depth {}..{}",
                        op.min_depth, op.max_depth
                    )));
                }
            }
        }
        Ok(())
    }

    // === Costs ===

    /// Estimated cost of the whole plan.
    pub fn estimated_cost(&self, estimator: &CostEstimator) -> Result<CostEstimate> {
        self.node_cost(self.root()?, estimator)
    }

    /// Estimated cost of the chain ending at `id`. Cached until the next
    /// mutation.
    pub fn node_cost(&self, id: PlanNodeId, estimator: &CostEstimator) -> Result<CostEstimate> {
        if let Some(cost) = self.costs.lock().get(&id) {
            return Ok(*cost);
        }
        let cost = estimator.estimate(self, id)?;
        self.costs.lock().insert(id, cost);
        Ok(cost)
    }
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ExecutionPlan {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            root: self.root,
            variables: self.variables.clone(),
            applied_rules: self.applied_rules.clone(),
            last_level: self.last_level,
            parents: Mutex::new(None),
            costs: Mutex::new(self.costs.lock().clone()),
        }
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("root", &self.root)
            .field("nodes", &self.node_count())
            .field("applied_rules", &self.applied_rules)
            .finish()
    }
}
