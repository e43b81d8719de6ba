//! Plan nodes.
//!
//! A [`PlanNode`] is one operator of an execution plan: an id, the ids of the
//! nodes it reads from, and a per-kind payload in [`NodeKind`]. Every
//! operation that depends on the kind (variable use, substitution, rendering)
//! is an exhaustive `match`, so adding a kind forces every site to handle it.

use crate::query::expr::Expression;
use crate::query::traversal::TraversalOptions;
use crate::query::variable::VariableRegistry;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;
use tessera_common::{PlanNodeId, VariableId};
use tessera_core::{AttributePath, Direction, IndexOperator};

/// The dependency list of a node. No kind has more than one dependency.
pub type Dependencies = SmallVec<[PlanNodeId; 1]>;

/// A node in an execution plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    /// Unique id within the plan.
    pub id: PlanNodeId,
    /// Nodes this node reads its input rows from.
    pub dependencies: Dependencies,
    /// Kind-specific payload.
    pub kind: NodeKind,
}

impl PlanNode {
    /// Returns the single dependency, if any.
    #[must_use]
    pub fn dependency(&self) -> Option<PlanNodeId> {
        self.dependencies.first().copied()
    }
}

/// Operator kinds and their payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Produces exactly one empty row. Bottom of every chain.
    Singleton,
    /// Full scan of a collection.
    EnumerateCollection(EnumerateCollectionOp),
    /// Index-assisted scan of a collection.
    IndexScan(IndexScanOp),
    /// Iteration over an array value.
    EnumerateList(EnumerateListOp),
    /// Computes an expression into a variable.
    Calculation(CalculationOp),
    /// Drops rows whose input variable is falsy.
    Filter(FilterOp),
    /// Sorts rows.
    Sort(SortOp),
    /// Skips and limits rows.
    Limit(LimitOp),
    /// Groups and aggregates rows.
    Collect(CollectOp),
    /// Graph traversal from a start vertex.
    Traversal(TraversalOp),
    /// Executes a nested chain once per input row.
    Subquery(SubqueryOp),
    /// Marks the variable whose values form the (sub)query result.
    Return(ReturnOp),
    /// Produces no rows.
    NoResults,
    /// Merges the output of per-shard partitions of its dependency chain.
    Gather(GatherOp),
    /// Inserts documents.
    Insert(ModificationOp),
    /// Updates documents.
    Update(ModificationOp),
    /// Removes documents.
    Remove(ModificationOp),
}

/// Fieldless mirror of [`NodeKind`], used to query nodes by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeType {
    /// [`NodeKind::Singleton`]
    Singleton,
    /// [`NodeKind::EnumerateCollection`]
    EnumerateCollection,
    /// [`NodeKind::IndexScan`]
    IndexScan,
    /// [`NodeKind::EnumerateList`]
    EnumerateList,
    /// [`NodeKind::Calculation`]
    Calculation,
    /// [`NodeKind::Filter`]
    Filter,
    /// [`NodeKind::Sort`]
    Sort,
    /// [`NodeKind::Limit`]
    Limit,
    /// [`NodeKind::Collect`]
    Collect,
    /// [`NodeKind::Traversal`]
    Traversal,
    /// [`NodeKind::Subquery`]
    Subquery,
    /// [`NodeKind::Return`]
    Return,
    /// [`NodeKind::NoResults`]
    NoResults,
    /// [`NodeKind::Gather`]
    Gather,
    /// [`NodeKind::Insert`]
    Insert,
    /// [`NodeKind::Update`]
    Update,
    /// [`NodeKind::Remove`]
    Remove,
}

impl NodeType {
    /// Display name used in explain output.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            NodeType::Singleton => "SingletonNode",
            NodeType::EnumerateCollection => "EnumerateCollectionNode",
            NodeType::IndexScan => "IndexNode",
            NodeType::EnumerateList => "EnumerateListNode",
            NodeType::Calculation => "CalculationNode",
            NodeType::Filter => "FilterNode",
            NodeType::Sort => "SortNode",
            NodeType::Limit => "LimitNode",
            NodeType::Collect => "CollectNode",
            NodeType::Traversal => "TraversalNode",
            NodeType::Subquery => "SubqueryNode",
            NodeType::Return => "ReturnNode",
            NodeType::NoResults => "NoResultsNode",
            NodeType::Gather => "GatherNode",
            NodeType::Insert => "InsertNode",
            NodeType::Update => "UpdateNode",
            NodeType::Remove => "RemoveNode",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Full collection scan.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumerateCollectionOp {
    /// Collection to scan.
    pub collection: String,
    /// Variable receiving each document.
    pub out_variable: VariableId,
    /// Produce documents in random order.
    pub random: bool,
    /// Restricts the scan to one shard. Set only inside partitions.
    pub shard: Option<usize>,
}

/// Index-assisted collection scan: emits documents where `path op value`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexScanOp {
    /// Collection to scan.
    pub collection: String,
    /// Variable receiving each document.
    pub out_variable: VariableId,
    /// Indexed attribute path.
    pub path: AttributePath,
    /// Index operator.
    pub op: IndexOperator,
    /// Value compared with the indexed keys, evaluated per input row.
    pub value: Expression,
    /// The filter condition this scan was derived from.
    pub condition: Expression,
    /// Restricts the scan to one shard. Set only inside partitions.
    pub shard: Option<usize>,
}

/// Iteration over the elements of an array.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumerateListOp {
    /// Variable holding the array.
    pub in_variable: VariableId,
    /// Variable receiving each element.
    pub out_variable: VariableId,
}

/// Computes an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationOp {
    /// Variable receiving the result.
    pub out_variable: VariableId,
    /// Expression to evaluate.
    pub expression: Expression,
}

/// Keeps rows whose input variable is truthy.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOp {
    /// Variable holding the condition result.
    pub in_variable: VariableId,
}

/// One sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortElement {
    /// Variable to sort by.
    pub variable: VariableId,
    /// Ascending if true.
    pub ascending: bool,
}

/// Sorts rows by one or more keys.
#[derive(Debug, Clone, PartialEq)]
pub struct SortOp {
    /// Sort keys, most significant first.
    pub elements: Vec<SortElement>,
}

/// Skips `offset` rows, then passes at most `count` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitOp {
    /// Rows to skip.
    pub offset: u64,
    /// Rows to pass.
    pub count: u64,
}

/// Aggregate functions usable in COLLECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    /// Number of rows in the group.
    Count,
    /// Sum of the input values.
    Sum,
    /// Smallest non-null input value.
    Min,
    /// Largest non-null input value.
    Max,
    /// Same as [`AggregateFunction::Count`].
    Length,
}

impl AggregateFunction {
    /// Display name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Length => "LENGTH",
        }
    }
}

/// One aggregate of a COLLECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    /// Variable receiving the aggregate.
    pub out_variable: VariableId,
    /// Aggregate function.
    pub function: AggregateFunction,
    /// Input variable. `None` for COUNT.
    pub in_variable: Option<VariableId>,
}

/// Grouping: `out = in`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupVariable {
    /// Variable receiving the group key.
    pub out_variable: VariableId,
    /// Variable the key is read from.
    pub in_variable: VariableId,
}

/// `INTO out = in`: collects the values of `in` for each group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntoVariable {
    /// Variable receiving the array of captured values.
    pub out_variable: VariableId,
    /// Variable captured per input row.
    pub in_variable: VariableId,
}

/// Groups and aggregates rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectOp {
    /// Group keys.
    pub groups: Vec<GroupVariable>,
    /// Aggregates.
    pub aggregates: Vec<Aggregate>,
    /// Optional group capture.
    pub into: Option<IntoVariable>,
}

/// Graph traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalOp {
    /// Start vertex: an id string or a document with `_id`.
    pub start: Expression,
    /// Edge collection to follow.
    pub edge_collection: String,
    /// Edge direction.
    pub direction: Direction,
    /// Minimum depth of emitted vertices.
    pub min_depth: u32,
    /// Maximum depth explored.
    pub max_depth: u32,
    /// Visitation order and uniqueness.
    pub options: TraversalOptions,
    /// Variable receiving each vertex.
    pub vertex_variable: VariableId,
    /// Variable receiving the edge leading to the vertex.
    pub edge_variable: Option<VariableId>,
    /// Variable receiving `{vertices, edges}` from the start vertex.
    pub path_variable: Option<VariableId>,
    /// Stops descent below a vertex when true. Evaluated with the vertex,
    /// edge and path variables set.
    pub prune: Option<Expression>,
    /// Restricts which visited vertices are emitted without affecting
    /// descent.
    pub filter: Option<Expression>,
}

impl TraversalOp {
    /// Variables the traversal produces.
    #[must_use]
    pub fn produced(&self) -> Vec<VariableId> {
        let mut vars = vec![self.vertex_variable];
        vars.extend(self.edge_variable);
        vars.extend(self.path_variable);
        vars
    }
}

/// Executes a nested chain per input row.
#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryOp {
    /// Top node (a Return) of the nested chain.
    pub subquery: PlanNodeId,
    /// Variable receiving the array of results, or their count.
    pub out_variable: VariableId,
    /// Only count the nested results.
    pub count_only: bool,
}

/// Result marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnOp {
    /// Variable whose values are returned.
    pub in_variable: VariableId,
}

/// Merges per-shard partitions.
#[derive(Debug, Clone, PartialEq)]
pub struct GatherOp {
    /// Collection whose shards define the partitions.
    pub collection: String,
    /// Merge order. Empty for an unordered gather.
    pub elements: Vec<SortElement>,
}

/// Insert, update or remove.
#[derive(Debug, Clone, PartialEq)]
pub struct ModificationOp {
    /// Target collection.
    pub collection: String,
    /// Document (or key, for remove) to write.
    pub in_variable: VariableId,
    /// Variable receiving the written (or removed) document.
    pub out_variable: Option<VariableId>,
}

impl NodeKind {
    /// Fieldless type of this kind.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Singleton => NodeType::Singleton,
            NodeKind::EnumerateCollection(_) => NodeType::EnumerateCollection,
            NodeKind::IndexScan(_) => NodeType::IndexScan,
            NodeKind::EnumerateList(_) => NodeType::EnumerateList,
            NodeKind::Calculation(_) => NodeType::Calculation,
            NodeKind::Filter(_) => NodeType::Filter,
            NodeKind::Sort(_) => NodeType::Sort,
            NodeKind::Limit(_) => NodeType::Limit,
            NodeKind::Collect(_) => NodeType::Collect,
            NodeKind::Traversal(_) => NodeType::Traversal,
            NodeKind::Subquery(_) => NodeType::Subquery,
            NodeKind::Return(_) => NodeType::Return,
            NodeKind::NoResults => NodeType::NoResults,
            NodeKind::Gather(_) => NodeType::Gather,
            NodeKind::Insert(_) => NodeType::Insert,
            NodeKind::Update(_) => NodeType::Update,
            NodeKind::Remove(_) => NodeType::Remove,
        }
    }

    /// Number of dependencies a node of this kind must have.
    #[must_use]
    pub fn required_dependencies(&self) -> usize {
        match self {
            NodeKind::Singleton => 0,
            _ => 1,
        }
    }

    /// Returns true for kinds that write to storage.
    #[must_use]
    pub fn is_modification(&self) -> bool {
        matches!(
            self,
            NodeKind::Insert(_) | NodeKind::Update(_) | NodeKind::Remove(_)
        )
    }

    /// Returns true for kinds that emit several rows per input row.
    #[must_use]
    pub fn is_enumeration(&self) -> bool {
        matches!(
            self,
            NodeKind::EnumerateCollection(_)
                | NodeKind::IndexScan(_)
                | NodeKind::EnumerateList(_)
                | NodeKind::Traversal(_)
        )
    }

    /// Variables this node reads, excluding reads inside a subquery's nested
    /// chain.
    #[must_use]
    pub fn variables_used(&self) -> BTreeSet<VariableId> {
        let mut vars = BTreeSet::new();
        match self {
            NodeKind::Singleton | NodeKind::EnumerateCollection(_) | NodeKind::NoResults => {}
            NodeKind::Limit(_) | NodeKind::Subquery(_) => {}
            NodeKind::IndexScan(op) => vars.extend(op.value.variables()),
            NodeKind::EnumerateList(op) => {
                vars.insert(op.in_variable);
            }
            NodeKind::Calculation(op) => vars.extend(op.expression.variables()),
            NodeKind::Filter(op) => {
                vars.insert(op.in_variable);
            }
            NodeKind::Sort(op) => vars.extend(op.elements.iter().map(|e| e.variable)),
            NodeKind::Gather(op) => vars.extend(op.elements.iter().map(|e| e.variable)),
            NodeKind::Collect(op) => {
                vars.extend(op.groups.iter().map(|g| g.in_variable));
                vars.extend(op.aggregates.iter().filter_map(|a| a.in_variable));
                vars.extend(op.into.iter().map(|i| i.in_variable));
            }
            NodeKind::Traversal(op) => {
                vars.extend(op.start.variables());
                let own = op.produced();
                for expr in op.prune.iter().chain(op.filter.iter()) {
                    vars.extend(expr.variables().into_iter().filter(|v| !own.contains(v)));
                }
            }
            NodeKind::Return(op) => {
                vars.insert(op.in_variable);
            }
            NodeKind::Insert(op) | NodeKind::Update(op) | NodeKind::Remove(op) => {
                vars.insert(op.in_variable);
            }
        }
        vars
    }

    /// Variables this node produces.
    #[must_use]
    pub fn variables_set(&self) -> Vec<VariableId> {
        match self {
            NodeKind::Singleton
            | NodeKind::Filter(_)
            | NodeKind::Sort(_)
            | NodeKind::Limit(_)
            | NodeKind::Return(_)
            | NodeKind::NoResults
            | NodeKind::Gather(_) => Vec::new(),
            NodeKind::EnumerateCollection(op) => vec![op.out_variable],
            NodeKind::IndexScan(op) => vec![op.out_variable],
            NodeKind::EnumerateList(op) => vec![op.out_variable],
            NodeKind::Calculation(op) => vec![op.out_variable],
            NodeKind::Collect(op) => {
                let mut vars: Vec<VariableId> = op.groups.iter().map(|g| g.out_variable).collect();
                vars.extend(op.aggregates.iter().map(|a| a.out_variable));
                vars.extend(op.into.iter().map(|i| i.out_variable));
                vars
            }
            NodeKind::Traversal(op) => op.produced(),
            NodeKind::Subquery(op) => vec![op.out_variable],
            NodeKind::Insert(op) | NodeKind::Update(op) | NodeKind::Remove(op) => {
                op.out_variable.into_iter().collect()
            }
        }
    }

    /// Number of sites (reads and writes) referencing `var`.
    #[must_use]
    pub fn references(&self, var: VariableId) -> usize {
        let mut probe = self.clone();
        // Substituting into a scratch copy counts every site exactly once.
        probe.replace_variable(var, var)
    }

    /// Rewrites every read and write of `old` into `new`. Returns the number
    /// of rewritten sites.
    pub fn replace_variable(&mut self, old: VariableId, new: VariableId) -> usize {
        let mut count = 0;
        let mut swap = |v: &mut VariableId| {
            if *v == old {
                *v = new;
                count += 1;
            }
        };
        match self {
            NodeKind::Singleton | NodeKind::NoResults | NodeKind::Limit(_) => {}
            NodeKind::EnumerateCollection(op) => swap(&mut op.out_variable),
            NodeKind::IndexScan(op) => {
                swap(&mut op.out_variable);
                count += op.value.replace_variable(old, new);
                count += op.condition.replace_variable(old, new);
            }
            NodeKind::EnumerateList(op) => {
                swap(&mut op.in_variable);
                swap(&mut op.out_variable);
            }
            NodeKind::Calculation(op) => {
                swap(&mut op.out_variable);
                count += op.expression.replace_variable(old, new);
            }
            NodeKind::Filter(op) => swap(&mut op.in_variable),
            NodeKind::Sort(op) => op.elements.iter_mut().for_each(|e| swap(&mut e.variable)),
            NodeKind::Gather(op) => op.elements.iter_mut().for_each(|e| swap(&mut e.variable)),
            NodeKind::Collect(op) => {
                for g in &mut op.groups {
                    swap(&mut g.out_variable);
                    swap(&mut g.in_variable);
                }
                for a in &mut op.aggregates {
                    swap(&mut a.out_variable);
                    if let Some(v) = a.in_variable.as_mut() {
                        swap(v);
                    }
                }
                if let Some(into) = op.into.as_mut() {
                    swap(&mut into.out_variable);
                    swap(&mut into.in_variable);
                }
            }
            NodeKind::Traversal(op) => {
                swap(&mut op.vertex_variable);
                if let Some(v) = op.edge_variable.as_mut() {
                    swap(v);
                }
                if let Some(v) = op.path_variable.as_mut() {
                    swap(v);
                }
                count += op.start.replace_variable(old, new);
                if let Some(prune) = op.prune.as_mut() {
                    count += prune.replace_variable(old, new);
                }
                if let Some(filter) = op.filter.as_mut() {
                    count += filter.replace_variable(old, new);
                }
            }
            NodeKind::Subquery(op) => swap(&mut op.out_variable),
            NodeKind::Return(op) => swap(&mut op.in_variable),
            NodeKind::Insert(op) | NodeKind::Update(op) | NodeKind::Remove(op) => {
                swap(&mut op.in_variable);
                if let Some(v) = op.out_variable.as_mut() {
                    swap(v);
                }
            }
        }
        count
    }

    /// Mutable access to every expression held by this node.
    pub fn expressions_mut(&mut self) -> Vec<&mut Expression> {
        match self {
            NodeKind::IndexScan(op) => vec![&mut op.value, &mut op.condition],
            NodeKind::Calculation(op) => vec![&mut op.expression],
            NodeKind::Traversal(op) => {
                let mut exprs = vec![&mut op.start];
                exprs.extend(op.prune.as_mut());
                exprs.extend(op.filter.as_mut());
                exprs
            }
            _ => Vec::new(),
        }
    }

    /// Collection names this node reads or writes.
    #[must_use]
    pub fn collections(&self) -> Vec<&str> {
        match self {
            NodeKind::EnumerateCollection(op) => vec![op.collection.as_str()],
            NodeKind::IndexScan(op) => vec![op.collection.as_str()],
            NodeKind::Traversal(op) => vec![op.edge_collection.as_str()],
            NodeKind::Gather(op) => vec![op.collection.as_str()],
            NodeKind::Insert(op) | NodeKind::Update(op) | NodeKind::Remove(op) => {
                vec![op.collection.as_str()]
            }
            _ => Vec::new(),
        }
    }

    /// One-line human readable description for explain output.
    #[must_use]
    pub fn describe(&self, registry: &VariableRegistry) -> String {
        let name = |v: VariableId| registry.name(v);
        let sort_keys = |elements: &[SortElement]| {
            elements
                .iter()
                .map(|e| format!("{} {}", name(e.variable), if e.ascending { "ASC" } else { "DESC" }))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            NodeKind::Singleton => "ROOT".to_string(),
            NodeKind::EnumerateCollection(op) => format!(
                "FOR {} IN {}{}",
                name(op.out_variable),
                op.collection,
                if op.random { " /* random */" } else { "" }
            ),
            NodeKind::IndexScan(op) => format!(
                "FOR {} IN {} /* index: {} {} {} */",
                name(op.out_variable),
                op.collection,
                op.path,
                op.op,
                op.value.render(registry)
            ),
            NodeKind::EnumerateList(op) => {
                format!("FOR {} IN {}", name(op.out_variable), name(op.in_variable))
            }
            NodeKind::Calculation(op) => format!(
                "LET {} = {}",
                name(op.out_variable),
                op.expression.render(registry)
            ),
            NodeKind::Filter(op) => format!("FILTER {}", name(op.in_variable)),
            NodeKind::Sort(op) => format!("SORT {}", sort_keys(&op.elements)),
            NodeKind::Limit(op) => format!("LIMIT {}, {}", op.offset, op.count),
            NodeKind::Collect(op) => {
                let mut parts: Vec<String> = op
                    .groups
                    .iter()
                    .map(|g| format!("{} = {}", name(g.out_variable), name(g.in_variable)))
                    .collect();
                for a in &op.aggregates {
                    let input = a.in_variable.map(&name).unwrap_or_default();
                    parts.push(format!(
                        "AGGREGATE {} = {}({input})",
                        name(a.out_variable),
                        a.function.name()
                    ));
                }
                if let Some(into) = op.into {
                    parts.push(format!(
                        "INTO {} = {}",
                        name(into.out_variable),
                        name(into.in_variable)
                    ));
                }
                format!("COLLECT {}", parts.join(" "))
            }
            NodeKind::Traversal(op) => {
                let mut text = format!(
                    "FOR {} IN {}..{} {} {} {}",
                    name(op.vertex_variable),
                    op.min_depth,
                    op.max_depth,
                    op.direction,
                    op.start.render(registry),
                    op.edge_collection
                );
                if let Some(prune) = &op.prune {
                    text.push_str(&format!(" PRUNE {}", prune.render(registry)));
                }
                text
            }
            NodeKind::Subquery(op) => format!(
                "LET {} = ( /* subquery {}{} */ )",
                name(op.out_variable),
                op.subquery,
                if op.count_only { ", count only" } else { "" }
            ),
            NodeKind::Return(op) => format!("RETURN {}", name(op.in_variable)),
            NodeKind::NoResults => "/* empty result set */".to_string(),
            NodeKind::Gather(op) => {
                if op.elements.is_empty() {
                    format!("GATHER /* {} shards, unordered */", op.collection)
                } else {
                    format!(
                        "GATHER /* {} shards, sorted by {} */",
                        op.collection,
                        sort_keys(&op.elements)
                    )
                }
            }
            NodeKind::Insert(op) => format!("INSERT {} INTO {}", name(op.in_variable), op.collection),
            NodeKind::Update(op) => format!("UPDATE {} IN {}", name(op.in_variable), op.collection),
            NodeKind::Remove(op) => format!("REMOVE {} IN {}", name(op.in_variable), op.collection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: u32) -> VariableId {
        VariableId::new(id)
    }

    #[test]
    fn test_required_dependencies() {
        assert_eq!(NodeKind::Singleton.required_dependencies(), 0);
        assert_eq!(NodeKind::NoResults.required_dependencies(), 1);
    }

    #[test]
    fn test_variables_used_and_set() {
        let collect = NodeKind::Collect(CollectOp {
            groups: vec![GroupVariable {
                out_variable: v(3),
                in_variable: v(1),
            }],
            aggregates: vec![Aggregate {
                out_variable: v(4),
                function: AggregateFunction::Count,
                in_variable: None,
            }],
            into: None,
        });
        assert_eq!(collect.variables_used().into_iter().collect::<Vec<_>>(), vec![v(1)]);
        assert_eq!(collect.variables_set(), vec![v(3), v(4)]);
    }

    #[test]
    fn test_replace_variable_counts_sites() {
        let mut calc = NodeKind::Calculation(CalculationOp {
            out_variable: v(2),
            expression: Expression::variable(v(1)).equals(Expression::variable(v(1))),
        });
        assert_eq!(calc.references(v(1)), 2);
        assert_eq!(calc.replace_variable(v(1), v(5)), 2);
        assert_eq!(calc.references(v(1)), 0);
        assert_eq!(calc.variables_used().into_iter().collect::<Vec<_>>(), vec![v(5)]);
    }

    #[test]
    fn test_describe() {
        let mut registry = VariableRegistry::new();
        let d = registry.declare(Some("d")).unwrap();
        let kind = NodeKind::EnumerateCollection(EnumerateCollectionOp {
            collection: "users".to_string(),
            out_variable: d,
            random: false,
            shard: None,
        });
        assert_eq!(kind.describe(&registry), "FOR d IN users");
        assert_eq!(kind.node_type().name(), "EnumerateCollectionNode");
    }
}
