//! Grouping and aggregation.
//!
//! Collect consumes its whole input before it emits anything. Groups come
//! out in ascending group-key order. Every output row starts as a copy of
//! the first input row of its group; the group, aggregate and `INTO`
//! registers are then overwritten.

use super::{Batch, ExecContext, ExecutionBlock, Row};
use crate::query::plan::{AggregateFunction, CollectOp};
use std::collections::BTreeMap;
use tessera_common::{PlanNodeId, Result, Value};

#[derive(Debug, Clone)]
enum AggregateState {
    Count(i64),
    IntSum(i64),
    FloatSum(f64),
    NullSum,
    Extreme(Option<Value>),
}

impl AggregateState {
    fn new(function: AggregateFunction) -> Self {
        match function {
            AggregateFunction::Count | AggregateFunction::Length => AggregateState::Count(0),
            AggregateFunction::Sum => AggregateState::IntSum(0),
            AggregateFunction::Min | AggregateFunction::Max => AggregateState::Extreme(None),
        }
    }

    fn update(&mut self, function: AggregateFunction, input: Option<&Value>) {
        match self {
            AggregateState::Count(n) => {
                if input.is_none_or(|v| !v.is_null()) {
                    *n += 1;
                }
            }
            AggregateState::IntSum(_) | AggregateState::FloatSum(_) | AggregateState::NullSum => {
                if let Some(value) = input {
                    self.add(value);
                }
            }
            AggregateState::Extreme(current) => {
                let Some(value) = input.filter(|v| !v.is_null()) else {
                    return;
                };
                let replace = match current.as_ref() {
                    None => true,
                    Some(best) if function == AggregateFunction::Min => value < best,
                    Some(best) => value > best,
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn add(&mut self, value: &Value) {
        let next = match (&*self, value) {
            (_, Value::Null) | (AggregateState::NullSum, _) => return,
            (AggregateState::IntSum(sum), Value::Int64(n)) => match sum.checked_add(*n) {
                Some(total) => AggregateState::IntSum(total),
                None => AggregateState::FloatSum(*sum as f64 + *n as f64),
            },
            (AggregateState::IntSum(sum), Value::Float64(f)) => AggregateState::FloatSum(*sum as f64 + f),
            (AggregateState::FloatSum(sum), Value::Int64(n)) => AggregateState::FloatSum(sum + *n as f64),
            (AggregateState::FloatSum(sum), Value::Float64(f)) => AggregateState::FloatSum(sum + f),
            // A non-numeric input makes the sum null.
            _ => AggregateState::NullSum,
        };
        *self = next;
    }

    fn finish(self) -> Value {
        match self {
            AggregateState::Count(n) | AggregateState::IntSum(n) => Value::Int64(n),
            AggregateState::FloatSum(f) => Value::Float64(f),
            AggregateState::NullSum => Value::Null,
            AggregateState::Extreme(value) => value.unwrap_or(Value::Null),
        }
    }
}

struct Group {
    base: Row,
    aggregates: Vec<AggregateState>,
    into: Vec<Value>,
}

/// Groups rows and computes aggregates.
pub(super) struct CollectBlock {
    node: PlanNodeId,
    input: Box<dyn ExecutionBlock>,
    op: CollectOp,
    width: usize,
    output: Option<std::vec::IntoIter<Row>>,
}

impl CollectBlock {
    pub(super) fn new(node: PlanNodeId, input: Box<dyn ExecutionBlock>, op: CollectOp, width: usize) -> Self {
        Self {
            node,
            input,
            op,
            width,
            output: None,
        }
    }

    fn group(&mut self, ctx: &mut ExecContext) -> Result<Vec<Row>> {
        let mut groups: BTreeMap<Vec<Value>, Group> = BTreeMap::new();
        while let Some(batch) = self.input.next_batch(ctx)? {
            ctx.check_killed()?;
            for row in batch.into_rows() {
                let key: Vec<Value> = self
                    .op
                    .groups
                    .iter()
                    .map(|g| row[g.in_variable.index()].clone())
                    .collect();
                let group = groups.entry(key).or_insert_with(|| Group {
                    base: row.clone(),
                    aggregates: self
                        .op
                        .aggregates
                        .iter()
                        .map(|a| AggregateState::new(a.function))
                        .collect(),
                    into: Vec::new(),
                });
                for (state, aggregate) in group.aggregates.iter_mut().zip(&self.op.aggregates) {
                    state.update(aggregate.function, aggregate.in_variable.map(|v| &row[v.index()]));
                }
                if let Some(into) = &self.op.into {
                    group.into.push(row[into.in_variable.index()].clone());
                }
            }
        }

        // Without group variables there is exactly one group, even for an
        // empty input.
        if self.op.groups.is_empty() && groups.is_empty() {
            groups.insert(
                Vec::new(),
                Group {
                    base: vec![Value::Null; self.width],
                    aggregates: self
                        .op
                        .aggregates
                        .iter()
                        .map(|a| AggregateState::new(a.function))
                        .collect(),
                    into: Vec::new(),
                },
            );
        }

        let mut rows = Vec::with_capacity(groups.len());
        for (key, group) in groups {
            let mut row = group.base;
            for (value, g) in key.into_iter().zip(&self.op.groups) {
                row[g.out_variable.index()] = value;
            }
            for (state, aggregate) in group.aggregates.into_iter().zip(&self.op.aggregates) {
                row[aggregate.out_variable.index()] = state.finish();
            }
            if let Some(into) = &self.op.into {
                row[into.out_variable.index()] = Value::List(group.into);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

impl ExecutionBlock for CollectBlock {
    fn next_batch(&mut self, ctx: &mut ExecContext) -> Result<Option<Batch>> {
        if self.output.is_none() {
            let rows = self.group(ctx).map_err(|e| e.at_node(self.node))?;
            self.output = Some(rows.into_iter());
        }
        let size = ctx.batch_size();
        let Some(output) = self.output.as_mut() else {
            return Ok(None);
        };
        let rows: Vec<Row> = output.by_ref().take(size).collect();
        Ok((!rows.is_empty()).then(|| Batch::new(rows)))
    }

    fn name(&self) -> &'static str {
        "CollectBlock"
    }
}
