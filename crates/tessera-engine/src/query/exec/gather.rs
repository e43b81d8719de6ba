//! Per-shard partitions and their merge.
//!
//! A Gather node runs the chain below it once per shard of the scanned
//! collection. Each partition is a worker thread with its own pipeline and
//! counters, connected to the gather block by a channel of capacity one, so
//! a worker is at most one batch ahead of the consumer.
//!
//! Without sort elements, batches are forwarded in whatever order partitions
//! produce them. With sort elements every partition is sorted and the block
//! merges partition heads. Waits on partitions also wait on the query's kill
//! switch, so a kill wakes the consumer and aborts pending sends.

use super::{Batch, ExecContext, ExecutionBlock, ExecutionStats, Row, build_pipeline};
use crate::query::plan::{ExecutionPlan, NodeKind, SortElement};
use crossbeam::channel::{self, Receiver, Select, Sender};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use tessera_common::{Error, PlanNodeId, Result, Value};
use tracing::{debug, warn};

enum PartitionMessage {
    Batch(Batch),
    Done {
        stats: ExecutionStats,
        warnings: Vec<String>,
    },
    Failed(Error),
}

/// A partition head in the merge heap.
struct HeapEntry {
    key: Vec<(Value, bool)>,
    partition: usize,
    row: Row,
}

impl HeapEntry {
    fn new(row: Row, partition: usize, elements: &[SortElement]) -> Self {
        let key = elements
            .iter()
            .map(|e| (row[e.variable.index()].clone(), e.ascending))
            .collect();
        Self { key, partition, row }
    }
}

impl Ord for HeapEntry {
    // Max-heap: the row that sorts first compares greatest. Equal keys
    // prefer the lower partition.
    fn cmp(&self, other: &Self) -> Ordering {
        for ((a, ascending), (b, _)) in self.key.iter().zip(&other.key) {
            let ordering = if *ascending { a.cmp(b) } else { b.cmp(a) };
            if ordering != Ordering::Equal {
                return ordering.reverse();
            }
        }
        other.partition.cmp(&self.partition)
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Restricts the scan at the bottom of `snippet` to one shard.
fn partition_plan(plan: &ExecutionPlan, snippet: PlanNodeId, shard: usize) -> Result<ExecutionPlan> {
    let mut plan = plan.clone();
    let chain = plan.chain(snippet)?;
    let Some(&scan) = chain.get(1) else {
        return Err(Error::Internal(format!("gather input {snippet} has no scan")));
    };
    match &mut plan.node_mut(scan)?.kind {
        NodeKind::EnumerateCollection(op) => op.shard = Some(shard),
        NodeKind::IndexScan(op) => op.shard = Some(shard),
        other => {
            return Err(Error::Internal(format!("cannot partition a {}", other.node_type())));
        }
    }
    Ok(plan)
}

/// Sends `message` unless the consumer is gone or the query was killed.
fn deliver(tx: &Sender<PartitionMessage>, kill: &Receiver<()>, message: PartitionMessage) -> bool {
    channel::select! {
        send(tx, message) -> sent => sent.is_ok(),
        recv(kill) -> _ => false,
    }
}

fn run_partition(
    plan: &Arc<ExecutionPlan>,
    snippet: PlanNodeId,
    seed: Row,
    mut ctx: ExecContext,
    tx: &Sender<PartitionMessage>,
) {
    let kill = ctx.kill_listener();
    let produce = || -> Result<bool> {
        let mut block = build_pipeline(plan, snippet, seed, &ctx)?;
        while let Some(batch) = block.next_batch(&mut ctx)? {
            if !deliver(tx, &kill, PartitionMessage::Batch(batch)) {
                return Ok(false);
            }
        }
        Ok(true)
    };
    let message = match produce() {
        Ok(true) => PartitionMessage::Done {
            stats: ctx.stats,
            warnings: ctx.take_warnings(),
        },
        Ok(false) => return,
        Err(err) => PartitionMessage::Failed(err),
    };
    deliver(tx, &kill, message);
}

struct Partitions {
    receivers: Vec<Option<Receiver<PartitionMessage>>>,
    workers: Vec<JoinHandle<()>>,
    buffers: Vec<VecDeque<Row>>,
    heap: Option<BinaryHeap<HeapEntry>>,
}

/// Merges the output of one pipeline per shard.
pub(super) struct GatherBlock {
    plan: Arc<ExecutionPlan>,
    node: PlanNodeId,
    snippet: PlanNodeId,
    elements: Vec<SortElement>,
    shards: usize,
    seed: Row,
    partitions: Option<Partitions>,
}

impl GatherBlock {
    pub(super) fn new(
        plan: Arc<ExecutionPlan>,
        node: PlanNodeId,
        snippet: PlanNodeId,
        elements: Vec<SortElement>,
        shards: usize,
        seed: Row,
    ) -> Self {
        Self {
            plan,
            node,
            snippet,
            elements,
            shards: shards.max(1),
            seed,
            partitions: None,
        }
    }

    fn start(&self, ctx: &ExecContext) -> Result<Partitions> {
        let mut receivers = Vec::with_capacity(self.shards);
        let mut workers = Vec::with_capacity(self.shards);
        for shard in 0..self.shards {
            let plan = Arc::new(partition_plan(&self.plan, self.snippet, shard)?);
            let (tx, rx) = channel::bounded(1);
            let snippet = self.snippet;
            let seed = self.seed.clone();
            let partition_ctx = ctx.partition();
            let worker = std::thread::Builder::new()
                .name(format!("gather-{shard}"))
                .spawn(move || run_partition(&plan, snippet, seed, partition_ctx, &tx))
                .map_err(|e| Error::Internal(format!("failed to start partition {shard}: {e}")))?;
            receivers.push(Some(rx));
            workers.push(worker);
        }
        debug!(node = %self.node, partitions = self.shards, sorted = !self.elements.is_empty(), "gather started");
        Ok(Partitions {
            receivers,
            workers,
            buffers: vec![VecDeque::new(); self.shards],
            heap: None,
        })
    }

    /// Handles one message from partition `index`. Returns the rows of a
    /// batch message.
    fn accept(
        partitions: &mut Partitions,
        index: usize,
        message: std::result::Result<PartitionMessage, channel::RecvError>,
        ctx: &mut ExecContext,
    ) -> Result<Option<Vec<Row>>> {
        match message {
            Ok(PartitionMessage::Batch(batch)) => Ok(Some(batch.into_rows())),
            Ok(PartitionMessage::Done { mut stats, warnings }) => {
                stats.partitions += 1;
                ctx.stats.merge(&stats);
                ctx.warnings.extend(warnings);
                partitions.receivers[index] = None;
                Ok(None)
            }
            Ok(PartitionMessage::Failed(err)) => {
                warn!(partition = index, error = %err, "partition failed");
                Err(err)
            }
            Err(_) => {
                ctx.check_killed()?;
                Err(Error::Internal(format!("partition {index} terminated without a result")))
            }
        }
    }

    fn next_unordered(partitions: &mut Partitions, ctx: &mut ExecContext) -> Result<Option<Batch>> {
        let kill = ctx.kill_listener();
        loop {
            let live: Vec<usize> = (0..partitions.receivers.len())
                .filter(|i| partitions.receivers[*i].is_some())
                .collect();
            if live.is_empty() {
                return Ok(None);
            }
            let (index, message) = {
                let receivers: Vec<&Receiver<PartitionMessage>> =
                    live.iter().filter_map(|i| partitions.receivers[*i].as_ref()).collect();
                let mut select = Select::new();
                for receiver in &receivers {
                    select.recv(receiver);
                }
                let kill_index = select.recv(&kill);
                let operation = select.select();
                if operation.index() == kill_index {
                    let _ = operation.recv(&kill);
                    return Err(ctx.kill_error());
                }
                let position = operation.index();
                (live[position], operation.recv(receivers[position]))
            };
            if let Some(rows) = Self::accept(partitions, index, message, ctx)? {
                if !rows.is_empty() {
                    return Ok(Some(Batch::new(rows)));
                }
            }
        }
    }

    /// Blocks until partition `index` has a buffered row or is finished.
    fn refill(partitions: &mut Partitions, index: usize, ctx: &mut ExecContext) -> Result<()> {
        let kill = ctx.kill_listener();
        while partitions.buffers[index].is_empty() {
            let Some(receiver) = partitions.receivers[index].as_ref() else {
                return Ok(());
            };
            let message = channel::select! {
                recv(receiver) -> message => message,
                recv(kill) -> _ => return Err(ctx.kill_error()),
            };
            if let Some(rows) = Self::accept(partitions, index, message, ctx)? {
                partitions.buffers[index].extend(rows);
            }
        }
        Ok(())
    }

    fn pop_head(
        partitions: &mut Partitions,
        index: usize,
        elements: &[SortElement],
        ctx: &mut ExecContext,
    ) -> Result<Option<HeapEntry>> {
        Self::refill(partitions, index, ctx)?;
        Ok(partitions.buffers[index]
            .pop_front()
            .map(|row| HeapEntry::new(row, index, elements)))
    }

    fn next_sorted(
        partitions: &mut Partitions,
        elements: &[SortElement],
        ctx: &mut ExecContext,
    ) -> Result<Option<Batch>> {
        let mut heap = match partitions.heap.take() {
            Some(heap) => heap,
            None => {
                let mut heap = BinaryHeap::with_capacity(partitions.receivers.len());
                for index in 0..partitions.receivers.len() {
                    if let Some(entry) = Self::pop_head(partitions, index, elements, ctx)? {
                        heap.push(entry);
                    }
                }
                heap
            }
        };

        let mut rows = Vec::new();
        while rows.len() < ctx.batch_size() {
            let Some(entry) = heap.pop() else {
                break;
            };
            if let Some(next) = Self::pop_head(partitions, entry.partition, elements, ctx)? {
                heap.push(next);
            }
            rows.push(entry.row);
        }
        partitions.heap = Some(heap);
        Ok((!rows.is_empty()).then(|| Batch::new(rows)))
    }
}

impl ExecutionBlock for GatherBlock {
    fn next_batch(&mut self, ctx: &mut ExecContext) -> Result<Option<Batch>> {
        ctx.check_killed()?;
        if self.partitions.is_none() {
            self.partitions = Some(self.start(ctx)?);
        }
        let Some(partitions) = self.partitions.as_mut() else {
            return Ok(None);
        };
        let result = if self.elements.is_empty() {
            Self::next_unordered(partitions, ctx)
        } else {
            Self::next_sorted(partitions, &self.elements, ctx)
        };
        result.map_err(|e| e.at_node(self.node))
    }

    fn name(&self) -> &'static str {
        "GatherBlock"
    }
}

impl Drop for GatherBlock {
    fn drop(&mut self) {
        if let Some(partitions) = self.partitions.take() {
            // Disconnecting the receivers makes blocked workers give up.
            drop(partitions.receivers);
            for worker in partitions.workers {
                if worker.join().is_err() {
                    warn!(node = %self.node, "partition worker panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::VariableId;

    fn entry(n: i64, partition: usize, ascending: bool) -> HeapEntry {
        let elements = [SortElement {
            variable: VariableId::new(0),
            ascending,
        }];
        HeapEntry::new(vec![Value::Int64(n)], partition, &elements)
    }

    fn drain(mut heap: BinaryHeap<HeapEntry>) -> Vec<(i64, usize)> {
        let mut out = Vec::new();
        while let Some(e) = heap.pop() {
            out.push((e.row[0].as_i64().unwrap_or_default(), e.partition));
        }
        out
    }

    #[test]
    fn test_heap_pops_smallest_first() {
        let heap: BinaryHeap<_> = [entry(3, 0, true), entry(1, 1, true), entry(2, 2, true)].into();
        assert_eq!(drain(heap), vec![(1, 1), (2, 2), (3, 0)]);
    }

    #[test]
    fn test_heap_descending_and_tie_break() {
        let heap: BinaryHeap<_> = [entry(1, 0, false), entry(5, 2, false), entry(5, 1, false)].into();
        assert_eq!(drain(heap), vec![(5, 1), (5, 2), (1, 0)]);
    }
}
