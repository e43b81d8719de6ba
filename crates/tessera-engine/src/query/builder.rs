//! Plan builder.
//!
//! Front-ends hand the engine an unoptimized plan. [`PlanBuilder`] is the
//! programmatic way to produce one: each call appends a node on top of the
//! chain under construction and declares the variables that node produces.
//!
//! ```
//! use tessera_engine::PlanBuilder;
//! use tessera_engine::query::Expression;
//!
//! let mut b = PlanBuilder::new();
//! let u = b.for_collection("u", "users")?;
//! b.filter(Expression::variable(u).attribute("age").equals(Expression::literal(30)))?;
//! b.return_(u)?;
//! let plan = b.build()?;
//! assert_eq!(plan.node_count(), 5);
//! # Ok::<(), tessera_common::Error>(())
//! ```

use crate::query::expr::Expression;
use crate::query::plan::{
    Aggregate, AggregateFunction, CalculationOp, CollectOp, EnumerateCollectionOp,
    EnumerateListOp, ExecutionPlan, FilterOp, GroupVariable, IntoVariable, LimitOp,
    ModificationOp, NodeKind, ReturnOp, SortElement, SortOp, SubqueryOp, TraversalOp,
};
use crate::query::traversal::TraversalOptions;
use tessera_common::{Error, PlanNodeId, Result, VariableId};
use tessera_core::Direction;

/// Where and how far a traversal walks.
#[derive(Debug, Clone)]
pub struct TraversalSpec {
    /// Start vertex expression.
    pub start: Expression,
    /// Edge collection.
    pub edge_collection: String,
    /// Direction.
    pub direction: Direction,
    /// Minimum emitted depth.
    pub min_depth: u32,
    /// Maximum explored depth.
    pub max_depth: u32,
    /// Order and uniqueness.
    pub options: TraversalOptions,
}

impl TraversalSpec {
    /// A `1..1` traversal with default options.
    pub fn new(start: Expression, edge_collection: &str, direction: Direction) -> Self {
        Self {
            start,
            edge_collection: edge_collection.to_string(),
            direction,
            min_depth: 1,
            max_depth: 1,
            options: TraversalOptions::default(),
        }
    }

    /// Sets the depth range.
    #[must_use]
    pub fn with_depth(mut self, min_depth: u32, max_depth: u32) -> Self {
        self.min_depth = min_depth;
        self.max_depth = max_depth;
        self
    }

    /// Sets the traversal options.
    #[must_use]
    pub fn with_options(mut self, options: TraversalOptions) -> Self {
        self.options = options;
        self
    }
}

/// Variables produced by a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalVariables {
    /// The traversal node.
    pub node: PlanNodeId,
    /// Vertex variable.
    pub vertex: VariableId,
    /// Edge variable, if requested.
    pub edge: Option<VariableId>,
    /// Path variable, if requested.
    pub path: Option<VariableId>,
}

/// Builds an unoptimized plan bottom-up.
pub struct PlanBuilder {
    plan: ExecutionPlan,
    /// Top of the chain under construction. `None` until the first node.
    current: Option<PlanNodeId>,
}

impl PlanBuilder {
    /// Creates a builder with an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self {
            plan: ExecutionPlan::new(),
            current: None,
        }
    }

    /// The plan built so far.
    #[must_use]
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Looks up a user variable by name.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<VariableId> {
        self.plan.variables().lookup(name)
    }

    fn top(&mut self) -> Result<PlanNodeId> {
        match self.current {
            Some(id) => Ok(id),
            None => {
                let id = self.plan.create_node(NodeKind::Singleton, &[])?;
                self.current = Some(id);
                Ok(id)
            }
        }
    }

    fn push(&mut self, kind: NodeKind) -> Result<PlanNodeId> {
        let top = self.top()?;
        let id = self.plan.create_node(kind, &[top])?;
        self.current = Some(id);
        Ok(id)
    }

    fn declare(&mut self, name: &str) -> Result<VariableId> {
        self.plan.variables_mut().declare(Some(name))
    }

    fn declare_optional(&mut self, name: Option<&str>) -> Result<Option<VariableId>> {
        name.map(|n| self.declare(n)).transpose()
    }

    /// `FOR name IN collection`
    pub fn for_collection(&mut self, name: &str, collection: &str) -> Result<VariableId> {
        let out_variable = self.declare(name)?;
        self.push(NodeKind::EnumerateCollection(EnumerateCollectionOp {
            collection: collection.to_string(),
            out_variable,
            random: false,
            shard: None,
        }))?;
        Ok(out_variable)
    }

    /// `FOR name IN list`
    pub fn for_list(&mut self, name: &str, list: VariableId) -> Result<VariableId> {
        let out_variable = self.declare(name)?;
        self.push(NodeKind::EnumerateList(EnumerateListOp {
            in_variable: list,
            out_variable,
        }))?;
        Ok(out_variable)
    }

    /// `FOR name IN <expression>`, computing the array into a synthetic
    /// variable first.
    pub fn for_expression(&mut self, name: &str, expression: Expression) -> Result<VariableId> {
        let list = self.calculate(expression)?;
        self.for_list(name, list)
    }

    /// `LET name = expression`
    pub fn let_(&mut self, name: &str, expression: Expression) -> Result<VariableId> {
        let out_variable = self.declare(name)?;
        self.push(NodeKind::Calculation(CalculationOp {
            out_variable,
            expression,
        }))?;
        Ok(out_variable)
    }

    /// Computes `expression` into a new synthetic variable.
    pub fn calculate(&mut self, expression: Expression) -> Result<VariableId> {
        let out_variable = self.plan.variables_mut().declare_synthetic()?;
        self.push(NodeKind::Calculation(CalculationOp {
            out_variable,
            expression,
        }))?;
        Ok(out_variable)
    }

    /// `FILTER condition`: a calculation into a synthetic variable followed by
    /// a filter on it. Returns the condition variable.
    pub fn filter(&mut self, condition: Expression) -> Result<VariableId> {
        let in_variable = self.calculate(condition)?;
        self.filter_on(in_variable)?;
        Ok(in_variable)
    }

    /// `FILTER var` on an already computed condition.
    pub fn filter_on(&mut self, condition: VariableId) -> Result<PlanNodeId> {
        self.push(NodeKind::Filter(FilterOp {
            in_variable: condition,
        }))
    }

    /// `SORT var [ASC|DESC], ...`
    pub fn sort(&mut self, keys: &[(VariableId, bool)]) -> Result<PlanNodeId> {
        let elements = keys
            .iter()
            .map(|&(variable, ascending)| SortElement {
                variable,
                ascending,
            })
            .collect();
        self.push(NodeKind::Sort(SortOp { elements }))
    }

    /// `SORT expression [ASC|DESC]`, computing the key first.
    pub fn sort_by(&mut self, key: Expression, ascending: bool) -> Result<VariableId> {
        let var = self.calculate(key)?;
        self.sort(&[(var, ascending)])?;
        Ok(var)
    }

    /// `LIMIT offset, count`
    pub fn limit(&mut self, offset: u64, count: u64) -> Result<PlanNodeId> {
        self.push(NodeKind::Limit(LimitOp { offset, count }))
    }

    /// `COLLECT groups AGGREGATE aggregates INTO into`. Returns the output
    /// variables in declaration order: groups, aggregates, then `into`.
    pub fn collect(
        &mut self,
        groups: &[(&str, VariableId)],
        aggregates: &[(&str, AggregateFunction, Option<VariableId>)],
        into: Option<(&str, VariableId)>,
    ) -> Result<Vec<VariableId>> {
        let mut outputs = Vec::new();
        let mut op = CollectOp {
            groups: Vec::new(),
            aggregates: Vec::new(),
            into: None,
        };
        for &(name, in_variable) in groups {
            let out_variable = self.declare(name)?;
            outputs.push(out_variable);
            op.groups.push(GroupVariable {
                out_variable,
                in_variable,
            });
        }
        for &(name, function, in_variable) in aggregates {
            if in_variable.is_none()
                && !matches!(function, AggregateFunction::Count | AggregateFunction::Length)
            {
                return Err(Error::InvalidQuery(format!(
                    "aggregate {} requires an input",
                    function.name()
                )));
            }
            let out_variable = self.declare(name)?;
            outputs.push(out_variable);
            op.aggregates.push(Aggregate {
                out_variable,
                function,
                in_variable,
            });
        }
        if let Some((name, in_variable)) = into {
            let out_variable = self.declare(name)?;
            outputs.push(out_variable);
            op.into = Some(IntoVariable {
                out_variable,
                in_variable,
            });
        }
        self.push(NodeKind::Collect(op))?;
        Ok(outputs)
    }

    /// `FOR vertex, edge, path IN min..max DIRECTION start edge_collection`
    pub fn traverse(
        &mut self,
        vertex: &str,
        edge: Option<&str>,
        path: Option<&str>,
        spec: TraversalSpec,
    ) -> Result<TraversalVariables> {
        let vertex_variable = self.declare(vertex)?;
        let edge_variable = self.declare_optional(edge)?;
        let path_variable = self.declare_optional(path)?;
        let node = self.push(NodeKind::Traversal(TraversalOp {
            start: spec.start,
            edge_collection: spec.edge_collection,
            direction: spec.direction,
            min_depth: spec.min_depth,
            max_depth: spec.max_depth,
            options: spec.options,
            vertex_variable,
            edge_variable,
            path_variable,
            prune: None,
            filter: None,
        }))?;
        Ok(TraversalVariables {
            node,
            vertex: vertex_variable,
            edge: edge_variable,
            path: path_variable,
        })
    }

    fn traversal_mut(&mut self, node: PlanNodeId) -> Result<&mut TraversalOp> {
        match &mut self.plan.node_mut(node)?.kind {
            NodeKind::Traversal(op) => Ok(op),
            other => Err(Error::Internal(format!("{} is not a traversal", other.node_type()))),
        }
    }

    /// `PRUNE condition` on a traversal.
    pub fn prune(&mut self, traversal: PlanNodeId, condition: Expression) -> Result<()> {
        self.traversal_mut(traversal)?.prune = Some(condition);
        Ok(())
    }

    /// Restricts which vertices a traversal emits.
    pub fn traversal_filter(&mut self, traversal: PlanNodeId, condition: Expression) -> Result<()> {
        self.traversal_mut(traversal)?.filter = Some(condition);
        Ok(())
    }

    /// `LET name = ( ... )`. The closure builds the nested chain on a fresh
    /// Singleton and returns the variable the subquery returns.
    pub fn subquery(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut PlanBuilder) -> Result<VariableId>,
    ) -> Result<VariableId> {
        let outer = self.top()?;
        self.current = None;
        let result = body(self);
        let returned = match result {
            Ok(var) => self.push(NodeKind::Return(ReturnOp { in_variable: var })),
            Err(e) => Err(e),
        };
        self.current = Some(outer);
        let subquery = returned?;
        let out_variable = self.declare(name)?;
        self.push(NodeKind::Subquery(SubqueryOp {
            subquery,
            out_variable,
            count_only: false,
        }))?;
        Ok(out_variable)
    }

    fn modification(
        &mut self,
        make: fn(ModificationOp) -> NodeKind,
        collection: &str,
        in_variable: VariableId,
        out: Option<&str>,
    ) -> Result<Option<VariableId>> {
        let out_variable = self.declare_optional(out)?;
        self.push(make(ModificationOp {
            collection: collection.to_string(),
            in_variable,
            out_variable,
        }))?;
        Ok(out_variable)
    }

    /// `INSERT document INTO collection [LET out = NEW]`
    pub fn insert(
        &mut self,
        collection: &str,
        document: VariableId,
        out: Option<&str>,
    ) -> Result<Option<VariableId>> {
        self.modification(NodeKind::Insert, collection, document, out)
    }

    /// `UPDATE document IN collection [LET out = NEW]`. The document must
    /// carry `_key`.
    pub fn update(
        &mut self,
        collection: &str,
        document: VariableId,
        out: Option<&str>,
    ) -> Result<Option<VariableId>> {
        self.modification(NodeKind::Update, collection, document, out)
    }

    /// `REMOVE key IN collection [LET out = OLD]`
    pub fn remove(
        &mut self,
        collection: &str,
        key: VariableId,
        out: Option<&str>,
    ) -> Result<Option<VariableId>> {
        self.modification(NodeKind::Remove, collection, key, out)
    }

    /// `RETURN var`, closing the main chain.
    pub fn return_(&mut self, var: VariableId) -> Result<PlanNodeId> {
        let id = self.push(NodeKind::Return(ReturnOp { in_variable: var }))?;
        self.plan.set_root(id)?;
        Ok(id)
    }

    /// Finishes the plan. The main chain must end in a Return.
    pub fn build(self) -> Result<ExecutionPlan> {
        let root = self.plan.root()?;
        if !matches!(self.plan.kind(root)?, NodeKind::Return(_)) {
            return Err(Error::Internal("plan root is not a Return node".to_string()));
        }
        Ok(self.plan)
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}
