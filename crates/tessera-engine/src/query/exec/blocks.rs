//! Streaming transforms, sort and limit.

use super::{Batch, ExecContext, ExecutionBlock, Row, RowTransform, compare_rows};
use crate::query::plan::{
    CalculationOp, EnumerateCollectionOp, EnumerateListOp, FilterOp, IndexScanOp, ModificationOp,
    SortElement, TraversalOp,
};
use crate::query::traversal::{Decision, Step, Traverser, start_vertex_id};
use rand::seq::SliceRandom;
use tessera_common::{Error, Result, Value, VariableId};

/// Emits the seed row once.
pub(super) struct SingletonBlock {
    seed: Option<Row>,
}

impl SingletonBlock {
    pub(super) fn new(seed: Row) -> Self {
        Self { seed: Some(seed) }
    }
}

impl ExecutionBlock for SingletonBlock {
    fn next_batch(&mut self, _ctx: &mut ExecContext) -> Result<Option<Batch>> {
        Ok(self.seed.take().map(|row| Batch::new(vec![row])))
    }

    fn name(&self) -> &'static str {
        "SingletonBlock"
    }
}

/// Produces nothing and never pulls its input.
pub(super) struct NoResultsBlock;

impl ExecutionBlock for NoResultsBlock {
    fn next_batch(&mut self, _ctx: &mut ExecContext) -> Result<Option<Batch>> {
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "NoResultsBlock"
    }
}

/// Forwards rows unchanged.
pub(super) struct Passthrough;

impl RowTransform for Passthrough {
    fn apply(&mut self, _ctx: &mut ExecContext, row: Row, out: &mut Vec<Row>) -> Result<()> {
        out.push(row);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ReturnBlock"
    }
}

fn with_value(row: &Row, var: VariableId, value: Value) -> Row {
    let mut next = row.clone();
    next[var.index()] = value;
    next
}

pub(super) struct EnumerateCollection {
    op: EnumerateCollectionOp,
}

impl EnumerateCollection {
    pub(super) fn new(op: EnumerateCollectionOp) -> Self {
        Self { op }
    }
}

impl RowTransform for EnumerateCollection {
    fn apply(&mut self, ctx: &mut ExecContext, row: Row, out: &mut Vec<Row>) -> Result<()> {
        let mut documents = ctx.storage().scan(&self.op.collection, self.op.shard)?;
        if self.op.random {
            documents.shuffle(&mut rand::thread_rng());
        }
        ctx.stats.scanned_full += documents.len() as u64;
        out.extend(documents.into_iter().map(|doc| with_value(&row, self.op.out_variable, doc)));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EnumerateCollectionBlock"
    }
}

pub(super) struct IndexScan {
    op: IndexScanOp,
}

impl IndexScan {
    pub(super) fn new(op: IndexScanOp) -> Self {
        Self { op }
    }
}

impl RowTransform for IndexScan {
    fn apply(&mut self, ctx: &mut ExecContext, row: Row, out: &mut Vec<Row>) -> Result<()> {
        let value = self.op.value.evaluate(&row)?;
        let documents = ctx.storage().index_lookup(
            &self.op.collection,
            self.op.shard,
            &self.op.path,
            self.op.op,
            &value,
        )?;
        ctx.stats.scanned_index += documents.len() as u64;
        out.extend(documents.into_iter().map(|doc| with_value(&row, self.op.out_variable, doc)));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "IndexBlock"
    }
}

pub(super) struct EnumerateList {
    op: EnumerateListOp,
}

impl EnumerateList {
    pub(super) fn new(op: EnumerateListOp) -> Self {
        Self { op }
    }
}

impl RowTransform for EnumerateList {
    fn apply(&mut self, ctx: &mut ExecContext, row: Row, out: &mut Vec<Row>) -> Result<()> {
        let list = match &row[self.op.in_variable.index()] {
            Value::List(items) => items.clone(),
            other => {
                let found = other.type_name();
                return ctx.warn(format!("collection or array expected as operand to FOR loop, got {found}"));
            }
        };
        out.extend(list.into_iter().map(|item| with_value(&row, self.op.out_variable, item)));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EnumerateListBlock"
    }
}

pub(super) struct Calculation {
    op: CalculationOp,
}

impl Calculation {
    pub(super) fn new(op: CalculationOp) -> Self {
        Self { op }
    }
}

impl RowTransform for Calculation {
    fn apply(&mut self, _ctx: &mut ExecContext, mut row: Row, out: &mut Vec<Row>) -> Result<()> {
        row[self.op.out_variable.index()] = self.op.expression.evaluate(&row)?;
        out.push(row);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CalculationBlock"
    }
}

pub(super) struct Filter {
    op: FilterOp,
}

impl Filter {
    pub(super) fn new(op: FilterOp) -> Self {
        Self { op }
    }
}

impl RowTransform for Filter {
    fn apply(&mut self, ctx: &mut ExecContext, row: Row, out: &mut Vec<Row>) -> Result<()> {
        if row[self.op.in_variable.index()].to_bool() {
            out.push(row);
        } else {
            ctx.stats.filtered += 1;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "FilterBlock"
    }
}

pub(super) struct Traversal {
    op: TraversalOp,
}

impl Traversal {
    pub(super) fn new(op: TraversalOp) -> Self {
        Self { op }
    }

    fn bind(&self, row: &mut Row, step: &Step) {
        row[self.op.vertex_variable.index()] = step.vertex.clone();
        if let Some(edge) = self.op.edge_variable {
            row[edge.index()] = step.edge.clone();
        }
        if let Some(path) = self.op.path_variable {
            row[path.index()] = step.path();
        }
    }
}

impl RowTransform for Traversal {
    fn apply(&mut self, ctx: &mut ExecContext, row: Row, out: &mut Vec<Row>) -> Result<()> {
        let start = self.op.start.evaluate(&row)?;
        let Some(start_id) = start_vertex_id(&start) else {
            return ctx.warn(format!("invalid traversal start vertex of type {}", start.type_name()));
        };
        let traverser = Traverser::new(
            ctx.storage(),
            &self.op.edge_collection,
            self.op.direction,
            self.op.min_depth,
            self.op.max_depth,
            self.op.options,
        )?;

        let mut scratch = row.clone();
        let steps = traverser.run(&start_id, |step| {
            if self.op.prune.is_none() && self.op.filter.is_none() {
                return Ok(Decision { emit: true, prune: false });
            }
            self.bind(&mut scratch, step);
            let prune = match &self.op.prune {
                Some(condition) => condition.evaluate(&scratch)?.to_bool(),
                None => false,
            };
            let emit = match &self.op.filter {
                Some(condition) => condition.evaluate(&scratch)?.to_bool(),
                None => true,
            };
            Ok(Decision { emit, prune })
        })?;

        for step in &steps {
            let mut next = row.clone();
            self.bind(&mut next, step);
            out.push(next);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TraversalBlock"
    }
}

/// Which document write a [`Modification`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WriteKind {
    Insert,
    Update,
    Remove,
}

pub(super) struct Modification {
    kind: WriteKind,
    op: ModificationOp,
}

impl Modification {
    pub(super) fn new(kind: WriteKind, op: ModificationOp) -> Self {
        Self { kind, op }
    }

    fn key(value: &Value) -> Result<String> {
        let key = match value {
            Value::String(key) => Some(key.as_str()),
            Value::Map(_) => return Self::key(&value.attribute("_key")),
            _ => None,
        };
        key.map(str::to_string)
            .ok_or_else(|| Error::type_mismatch("document key", value.type_name()))
    }
}

impl RowTransform for Modification {
    fn apply(&mut self, ctx: &mut ExecContext, mut row: Row, out: &mut Vec<Row>) -> Result<()> {
        let input = row[self.op.in_variable.index()].clone();
        let collection = &self.op.collection;
        let written = match self.kind {
            WriteKind::Insert => ctx.storage().insert(collection, input)?,
            WriteKind::Update => {
                let key = Self::key(&input.attribute("_key"))?;
                ctx.storage().update(collection, &key, input)?
            }
            WriteKind::Remove => {
                let key = Self::key(&input)?;
                ctx.storage().remove(collection, &key)?
            }
        };
        ctx.stats.writes_executed += 1;
        if let Some(var) = self.op.out_variable {
            row[var.index()] = written;
        }
        out.push(row);
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self.kind {
            WriteKind::Insert => "InsertBlock",
            WriteKind::Update => "UpdateBlock",
            WriteKind::Remove => "RemoveBlock",
        }
    }
}

/// Materializes its input and emits it stably sorted.
pub(super) struct SortBlock {
    input: Box<dyn ExecutionBlock>,
    elements: Vec<SortElement>,
    sorted: Option<std::vec::IntoIter<Row>>,
}

impl SortBlock {
    pub(super) fn new(input: Box<dyn ExecutionBlock>, elements: Vec<SortElement>) -> Self {
        Self {
            input,
            elements,
            sorted: None,
        }
    }
}

impl ExecutionBlock for SortBlock {
    fn next_batch(&mut self, ctx: &mut ExecContext) -> Result<Option<Batch>> {
        if self.sorted.is_none() {
            let mut rows = Vec::new();
            while let Some(batch) = self.input.next_batch(ctx)? {
                ctx.check_killed()?;
                rows.extend(batch.into_rows());
            }
            rows.sort_by(|a, b| compare_rows(a, b, &self.elements));
            self.sorted = Some(rows.into_iter());
        }
        let size = ctx.batch_size();
        let Some(sorted) = self.sorted.as_mut() else {
            return Ok(None);
        };
        let rows: Vec<Row> = sorted.by_ref().take(size).collect();
        Ok((!rows.is_empty()).then(|| Batch::new(rows)))
    }

    fn name(&self) -> &'static str {
        "SortBlock"
    }
}

/// Skips `offset` rows, then passes at most `count`.
pub(super) struct LimitBlock {
    input: Box<dyn ExecutionBlock>,
    skip: u64,
    remaining: u64,
}

impl LimitBlock {
    pub(super) fn new(input: Box<dyn ExecutionBlock>, offset: u64, count: u64) -> Self {
        Self {
            input,
            skip: offset,
            remaining: count,
        }
    }
}

impl ExecutionBlock for LimitBlock {
    fn next_batch(&mut self, ctx: &mut ExecContext) -> Result<Option<Batch>> {
        while self.remaining > 0 {
            let Some(batch) = self.input.next_batch(ctx)? else {
                return Ok(None);
            };
            let mut rows = batch.into_rows();
            let skipped = rows.len().min(usize::try_from(self.skip).unwrap_or(usize::MAX));
            rows.drain(..skipped);
            self.skip -= skipped as u64;
            rows.truncate(usize::try_from(self.remaining).unwrap_or(usize::MAX));
            self.remaining -= rows.len() as u64;
            if !rows.is_empty() {
                return Ok(Some(Batch::new(rows)));
            }
        }
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "LimitBlock"
    }
}
