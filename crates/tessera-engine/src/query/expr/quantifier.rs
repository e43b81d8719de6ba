//! Comparison and quantified comparison semantics.

use super::ComparisonOp;
use std::fmt;
use tessera_common::Value;

/// How per-element comparison results are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    /// Every element matches. True for an empty array.
    All,
    /// At least one element matches. False for an empty array.
    Any,
    /// No element matches. True for an empty array.
    None,
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantifier::All => write!(f, "ALL"),
            Quantifier::Any => write!(f, "ANY"),
            Quantifier::None => write!(f, "NONE"),
        }
    }
}

/// Compares two values with `op` using the total value order.
///
/// `IN` against a non-array is false and `NOT IN` against a non-array is
/// true.
#[must_use]
pub fn compare_values(op: ComparisonOp, left: &Value, right: &Value) -> bool {
    match op {
        ComparisonOp::Eq => left == right,
        ComparisonOp::Ne => left != right,
        ComparisonOp::Lt => left < right,
        ComparisonOp::Le => left <= right,
        ComparisonOp::Gt => left > right,
        ComparisonOp::Ge => left >= right,
        ComparisonOp::In => right.as_list().is_some_and(|l| l.contains(left)),
        ComparisonOp::NotIn => !right.as_list().is_some_and(|l| l.contains(left)),
    }
}

/// Evaluates `left QUANT op right`.
///
/// A non-array left-hand side is false for every quantifier.
#[must_use]
pub fn evaluate_quantified(
    quantifier: Quantifier,
    op: ComparisonOp,
    left: &Value,
    right: &Value,
) -> bool {
    let Some(elements) = left.as_list() else {
        return false;
    };
    let mut matches = elements.iter().map(|e| compare_values(op, e, right));
    match quantifier {
        Quantifier::All => matches.all(|m| m),
        Quantifier::Any => matches.any(|m| m),
        Quantifier::None => !matches.any(|m| m),
    }
}
