//! Nested chain execution.

use super::{ExecContext, Row, RowTransform, build_pipeline};
use crate::query::plan::{ExecutionPlan, NodeKind, SubqueryOp};
use std::sync::Arc;
use tessera_common::{Error, Result, Value, VariableId};

/// Runs the nested chain once per input row, seeded with that row.
pub(super) struct SubqueryTransform {
    plan: Arc<ExecutionPlan>,
    op: SubqueryOp,
    returned: VariableId,
}

impl SubqueryTransform {
    pub(super) fn new(plan: Arc<ExecutionPlan>, op: SubqueryOp) -> Result<Self> {
        let returned = match plan.kind(op.subquery)? {
            NodeKind::Return(ret) => ret.in_variable,
            other => {
                return Err(Error::Internal(format!(
                    "subquery chain ends in {} instead of a Return",
                    other.node_type()
                )));
            }
        };
        Ok(Self { plan, op, returned })
    }
}

impl RowTransform for SubqueryTransform {
    fn apply(&mut self, ctx: &mut ExecContext, mut row: Row, out: &mut Vec<Row>) -> Result<()> {
        let mut nested = build_pipeline(&self.plan, self.op.subquery, row.clone(), ctx)?;
        let mut count: i64 = 0;
        let mut values = Vec::new();
        while let Some(batch) = nested.next_batch(ctx)? {
            if self.op.count_only {
                count += i64::try_from(batch.len()).unwrap_or(i64::MAX);
            } else {
                values.extend(batch.into_rows().into_iter().map(|mut r| {
                    std::mem::take(&mut r[self.returned.index()])
                }));
            }
        }
        row[self.op.out_variable.index()] = if self.op.count_only {
            Value::Int64(count)
        } else {
            Value::List(values)
        };
        out.push(row);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SubqueryBlock"
    }
}
