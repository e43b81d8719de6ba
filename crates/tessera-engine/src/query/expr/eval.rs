//! Expression evaluation.

use super::quantifier::{compare_values, evaluate_quantified};
use super::{BinaryOp, Expression, UnaryOp};
use std::collections::BTreeMap;
use tessera_common::{Error, Result, Value};

/// Upper bound on the number of elements a range may produce.
const MAX_RANGE_LENGTH: u64 = 10_000_000;

pub(super) fn evaluate(expr: &Expression, row: &[Value]) -> Result<Value> {
    match expr {
        Expression::Literal(v) => Ok(v.clone()),
        Expression::Variable(id) => Ok(row.get(id.index()).cloned().unwrap_or_default()),
        Expression::Parameter(name) => Err(Error::BindParameterMissing(name.clone())),
        Expression::Attribute { base, name } => Ok(evaluate(base, row)?.attribute(name)),
        Expression::Index { base, index } => {
            let base = evaluate(base, row)?;
            let index = evaluate(index, row)?;
            Ok(match (&base, &index) {
                (Value::List(_), Value::Int64(i)) => base.at(*i),
                (Value::List(_), Value::Float64(f)) => base.at(f.trunc() as i64),
                (Value::Map(_), Value::String(name)) => base.attribute(name),
                _ => Value::Null,
            })
        }
        Expression::Expansion { base, path } => match evaluate(base, row)? {
            Value::List(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(|item| path.iter().fold(item, |v, name| v.attribute(name)))
                    .collect(),
            )),
            _ => Ok(Value::List(Vec::new())),
        },
        Expression::Array(items) => Ok(Value::List(
            items
                .iter()
                .map(|i| evaluate(i, row))
                .collect::<Result<Vec<_>>>()?,
        )),
        Expression::Object(fields) => {
            let mut map = BTreeMap::new();
            for (name, value) in fields {
                map.insert(name.clone(), evaluate(value, row)?);
            }
            Ok(Value::Map(map))
        }
        Expression::Range { low, high } => {
            let low = range_bound(&evaluate(low, row)?);
            let high = range_bound(&evaluate(high, row)?);
            if high.abs_diff(low) >= MAX_RANGE_LENGTH {
                return Err(Error::runtime(format!("range {low}..{high} is too large")));
            }
            let values: Vec<Value> = if low <= high {
                (low..=high).map(Value::Int64).collect()
            } else {
                (high..=low).rev().map(Value::Int64).collect()
            };
            Ok(Value::List(values))
        }
        Expression::Unary { op, operand } => {
            let value = evaluate(operand, row)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.to_bool())),
                UnaryOp::Neg => match value {
                    Value::Int64(i) => Ok(i
                        .checked_neg()
                        .map_or(Value::Float64(-(i as f64)), Value::Int64)),
                    Value::Float64(f) => Ok(Value::Float64(-f)),
                    other => Err(Error::type_mismatch("number", other.type_name())),
                },
            }
        }
        Expression::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let l = evaluate(left, row)?;
                if l.to_bool() { evaluate(right, row) } else { Ok(l) }
            }
            BinaryOp::Or => {
                let l = evaluate(left, row)?;
                if l.to_bool() { Ok(l) } else { evaluate(right, row) }
            }
            BinaryOp::Compare(cmp) => {
                let l = evaluate(left, row)?;
                let r = evaluate(right, row)?;
                Ok(Value::Bool(compare_values(*cmp, &l, &r)))
            }
            arithmetic => {
                let l = evaluate(left, row)?;
                let r = evaluate(right, row)?;
                arithmetic_op(*arithmetic, &l, &r)
            }
        },
        Expression::Quantified {
            quantifier,
            op,
            left,
            right,
        } => {
            let l = evaluate(left, row)?;
            let r = evaluate(right, row)?;
            Ok(Value::Bool(evaluate_quantified(*quantifier, *op, &l, &r)))
        }
        Expression::Function { function, args } => {
            let args = args
                .iter()
                .map(|a| evaluate(a, row))
                .collect::<Result<Vec<_>>>()?;
            function.call(args)
        }
    }
}

fn range_bound(value: &Value) -> i64 {
    match value.to_number() {
        Value::Int64(i) => i,
        Value::Float64(f) => f.trunc() as i64,
        _ => 0,
    }
}

fn arithmetic_op(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    for operand in [left, right] {
        if !operand.is_number() {
            return Err(Error::type_mismatch("number", operand.type_name()));
        }
    }
    if let (Value::Int64(a), Value::Int64(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div if b == 0 => return Ok(Value::Null),
            BinaryOp::Div if a.checked_rem(b) == Some(0) => a.checked_div(b),
            BinaryOp::Div => None,
            BinaryOp::Mod if b == 0 => return Ok(Value::Null),
            BinaryOp::Mod => a.checked_rem(b),
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(Value::Int64(v));
        }
    }
    let a = left.as_f64().unwrap_or(0.0);
    let b = right.as_f64().unwrap_or(0.0);
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => return Ok(Value::Null),
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => return Err(Error::Internal(format!("{op} is not arithmetic"))),
    };
    if result.is_finite() {
        Ok(Value::Float64(result))
    } else {
        Ok(Value::Null)
    }
}
