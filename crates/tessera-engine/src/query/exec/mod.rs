//! Pull-based plan execution.
//!
//! Every plan node becomes an [`ExecutionBlock`]. A block pulls [`Batch`]es
//! from its input and hands batches to its consumer; the consumer at the top
//! is the [`Cursor`](crate::query::cursor::Cursor). A row is a register file
//! indexed by [`VariableId`](tessera_common::VariableId), so every block of a
//! query, nested subqueries included, works on rows of the same width.
//!
//! Most node kinds transform one input row into zero or more output rows and
//! are written as [`RowTransform`]s driven by a [`StreamingBlock`]. Sort,
//! limit, collect and gather need their own buffering.
//!
//! ## Submodules
//!
//! - `blocks` - Streaming transforms, sort and limit
//! - `collect` - Grouping and aggregation
//! - `gather` - Per-shard partitions and their merge
//! - `subquery` - Nested chain execution

mod blocks;
mod collect;
mod gather;
mod subquery;

use crate::config::Config;
use crate::query::plan::{ExecutionPlan, NodeKind, SortElement};
use crate::query::registry::KillSwitch;
use crossbeam::channel::{self, Receiver};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use tessera_common::{Error, PlanNodeId, QueryId, Result, Value};
use tessera_core::StorageEngine;
use tracing::{debug, warn};

/// A register file.
pub type Row = Vec<Value>;

/// A group of rows passed between blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    rows: Vec<Row>,
}

impl Batch {
    /// Creates a batch from rows.
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the batch has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The rows.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consumes the batch, returning its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// Counters collected while executing one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    /// Documents read by full collection scans.
    pub scanned_full: u64,
    /// Documents read through indexes.
    pub scanned_index: u64,
    /// Rows dropped by filters.
    pub filtered: u64,
    /// Documents inserted, updated or removed.
    pub writes_executed: u64,
    /// Partitions that ran to completion.
    pub partitions: u64,
}

impl ExecutionStats {
    /// Adds `other` to these counters.
    pub fn merge(&mut self, other: &ExecutionStats) {
        self.scanned_full += other.scanned_full;
        self.scanned_index += other.scanned_index;
        self.filtered += other.filtered;
        self.writes_executed += other.writes_executed;
        self.partitions += other.partitions;
    }
}

/// State shared by the blocks of one pipeline.
pub struct ExecContext {
    storage: Arc<dyn StorageEngine>,
    batch_size: usize,
    fail_on_warning: bool,
    kill: Option<(QueryId, Arc<KillSwitch>)>,
    warnings: Vec<String>,
    /// Counters.
    pub stats: ExecutionStats,
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("batch_size", &self.batch_size)
            .field("fail_on_warning", &self.fail_on_warning)
            .field("warnings", &self.warnings)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ExecContext {
    /// Creates a context using the execution settings of `config`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageEngine>, config: &Config) -> Self {
        Self {
            storage,
            batch_size: config.batch_size.max(1),
            fail_on_warning: config.fail_on_warning,
            kill: None,
            warnings: Vec::new(),
            stats: ExecutionStats::default(),
        }
    }

    /// Attaches the kill switch of query `id`.
    #[must_use]
    pub fn with_kill_switch(mut self, id: QueryId, switch: Arc<KillSwitch>) -> Self {
        self.kill = Some((id, switch));
        self
    }

    /// A context for a partition worker: same settings and kill switch,
    /// fresh counters and warnings.
    #[must_use]
    pub fn partition(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            batch_size: self.batch_size,
            fail_on_warning: self.fail_on_warning,
            kill: self.kill.clone(),
            warnings: Vec::new(),
            stats: ExecutionStats::default(),
        }
    }

    /// The storage layer.
    #[must_use]
    pub fn storage(&self) -> &dyn StorageEngine {
        self.storage.as_ref()
    }

    /// A shared handle to the storage layer.
    #[must_use]
    pub fn storage_handle(&self) -> Arc<dyn StorageEngine> {
        Arc::clone(&self.storage)
    }

    /// Rows per batch.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fails with [`Error::QueryKilled`] once the query was killed.
    pub fn check_killed(&self) -> Result<()> {
        match &self.kill {
            Some((id, switch)) if switch.is_killed() => Err(Error::QueryKilled(*id)),
            _ => Ok(()),
        }
    }

    /// The error reported after a kill notification.
    #[must_use]
    pub fn kill_error(&self) -> Error {
        match &self.kill {
            Some((id, _)) => Error::QueryKilled(*id),
            None => Error::Internal("kill notification without a kill switch".to_string()),
        }
    }

    /// A receiver that becomes ready when the query is killed, or never.
    #[must_use]
    pub fn kill_listener(&self) -> Receiver<()> {
        match &self.kill {
            Some((_, switch)) => switch.listener(),
            None => channel::never(),
        }
    }

    /// Records a warning, or fails if warnings are errors.
    pub fn warn(&mut self, message: String) -> Result<()> {
        if self.fail_on_warning {
            return Err(Error::runtime(message));
        }
        warn!(%message, "execution warning");
        self.warnings.push(message);
        Ok(())
    }

    /// Warnings recorded so far.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

/// A pull-based operator.
pub trait ExecutionBlock: Send {
    /// Returns the next batch, or `None` once exhausted.
    fn next_batch(&mut self, ctx: &mut ExecContext) -> Result<Option<Batch>>;

    /// Block name for logging.
    fn name(&self) -> &'static str;
}

/// Maps one input row to zero or more output rows.
pub trait RowTransform: Send {
    /// Appends the output rows for `row` to `out`.
    fn apply(&mut self, ctx: &mut ExecContext, row: Row, out: &mut Vec<Row>) -> Result<()>;

    /// Block name for logging.
    fn name(&self) -> &'static str;
}

/// Drives a [`RowTransform`] over the batches of its input.
pub struct StreamingBlock<T> {
    node: PlanNodeId,
    input: Box<dyn ExecutionBlock>,
    transform: T,
    pending: VecDeque<Row>,
    scratch: Vec<Row>,
    exhausted: bool,
}

impl<T: RowTransform> StreamingBlock<T> {
    /// Wraps `transform` for node `node`.
    pub fn new(node: PlanNodeId, input: Box<dyn ExecutionBlock>, transform: T) -> Self {
        Self {
            node,
            input,
            transform,
            pending: VecDeque::new(),
            scratch: Vec::new(),
            exhausted: false,
        }
    }
}

impl<T: RowTransform> ExecutionBlock for StreamingBlock<T> {
    fn next_batch(&mut self, ctx: &mut ExecContext) -> Result<Option<Batch>> {
        let size = ctx.batch_size();
        loop {
            if self.pending.len() >= size || (self.exhausted && !self.pending.is_empty()) {
                let take = size.min(self.pending.len());
                return Ok(Some(Batch::new(self.pending.drain(..take).collect())));
            }
            if self.exhausted {
                return Ok(None);
            }
            ctx.check_killed()?;
            match self.input.next_batch(ctx)? {
                Some(batch) => {
                    for row in batch.into_rows() {
                        self.transform
                            .apply(ctx, row, &mut self.scratch)
                            .map_err(|e| e.at_node(self.node))?;
                        self.pending.extend(self.scratch.drain(..));
                    }
                }
                None => self.exhausted = true,
            }
        }
    }

    fn name(&self) -> &'static str {
        self.transform.name()
    }
}

/// Orders two rows by sort keys.
pub(crate) fn compare_rows(a: &[Value], b: &[Value], elements: &[SortElement]) -> Ordering {
    for element in elements {
        let i = element.variable.index();
        let ordering = a[i].cmp(&b[i]);
        let ordering = if element.ascending { ordering } else { ordering.reverse() };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Builds the pipeline for the chain ending at `top`. The chain's singleton
/// emits `seed` once.
pub fn build_pipeline(
    plan: &Arc<ExecutionPlan>,
    top: PlanNodeId,
    seed: Row,
    ctx: &ExecContext,
) -> Result<Box<dyn ExecutionBlock>> {
    let node = plan.node(top)?;
    let width = seed.len();
    let input = match (&node.kind, node.dependency()) {
        (NodeKind::Singleton, _) => return Ok(Box::new(blocks::SingletonBlock::new(seed))),
        (NodeKind::NoResults, _) => return Ok(Box::new(blocks::NoResultsBlock)),
        (NodeKind::Gather(op), Some(snippet)) => {
            let shards = ctx.storage().statistics(&op.collection)?.shard_count;
            return Ok(Box::new(gather::GatherBlock::new(
                Arc::clone(plan),
                top,
                snippet,
                op.elements.clone(),
                shards,
                seed,
            )));
        }
        (_, Some(dependency)) => build_pipeline(plan, dependency, seed, ctx)?,
        (kind, None) => {
            return Err(Error::Internal(format!("{} {top} has no input", kind.node_type())));
        }
    };
    debug!(node = %top, kind = %node.kind.node_type(), "build block");

    let block: Box<dyn ExecutionBlock> = match &node.kind {
        NodeKind::EnumerateCollection(op) => Box::new(StreamingBlock::new(
            top,
            input,
            blocks::EnumerateCollection::new(op.clone()),
        )),
        NodeKind::IndexScan(op) => {
            Box::new(StreamingBlock::new(top, input, blocks::IndexScan::new(op.clone())))
        }
        NodeKind::EnumerateList(op) => {
            Box::new(StreamingBlock::new(top, input, blocks::EnumerateList::new(op.clone())))
        }
        NodeKind::Calculation(op) => {
            Box::new(StreamingBlock::new(top, input, blocks::Calculation::new(op.clone())))
        }
        NodeKind::Filter(op) => Box::new(StreamingBlock::new(top, input, blocks::Filter::new(op.clone()))),
        NodeKind::Traversal(op) => {
            Box::new(StreamingBlock::new(top, input, blocks::Traversal::new(op.clone())))
        }
        NodeKind::Subquery(op) => Box::new(StreamingBlock::new(
            top,
            input,
            subquery::SubqueryTransform::new(Arc::clone(plan), op.clone())?,
        )),
        NodeKind::Insert(op) => Box::new(StreamingBlock::new(
            top,
            input,
            blocks::Modification::new(blocks::WriteKind::Insert, op.clone()),
        )),
        NodeKind::Update(op) => Box::new(StreamingBlock::new(
            top,
            input,
            blocks::Modification::new(blocks::WriteKind::Update, op.clone()),
        )),
        NodeKind::Remove(op) => Box::new(StreamingBlock::new(
            top,
            input,
            blocks::Modification::new(blocks::WriteKind::Remove, op.clone()),
        )),
        NodeKind::Return(_) => Box::new(StreamingBlock::new(top, input, blocks::Passthrough)),
        NodeKind::Sort(op) => Box::new(blocks::SortBlock::new(input, op.elements.clone())),
        NodeKind::Limit(op) => Box::new(blocks::LimitBlock::new(input, op.offset, op.count)),
        NodeKind::Collect(op) => Box::new(collect::CollectBlock::new(top, input, op.clone(), width)),
        NodeKind::Singleton | NodeKind::NoResults | NodeKind::Gather(_) => {
            return Err(Error::Internal(format!("unexpected {} {top}", node.kind.node_type())));
        }
    };
    Ok(block)
}

/// Runs the whole chain ending at `top` and returns its rows.
pub fn run_to_end(plan: &Arc<ExecutionPlan>, top: PlanNodeId, ctx: &mut ExecContext) -> Result<Vec<Row>> {
    let seed = vec![Value::Null; plan.variables().register_count()];
    let mut block = build_pipeline(plan, top, seed, ctx)?;
    let mut rows = Vec::new();
    while let Some(batch) = block.next_batch(ctx)? {
        rows.extend(batch.into_rows());
    }
    Ok(rows)
}
