//! Index operators and capability answers.

use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_common::Value;

/// A comparison an index may be able to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexOperator {
    /// `key == value`
    Eq,
    /// `key < value`
    Lt,
    /// `key <= value`
    Le,
    /// `key > value`
    Gt,
    /// `key >= value`
    Ge,
    /// `key IN value` (value must be an array)
    In,
}

impl IndexOperator {
    /// Evaluates the operator against one key.
    #[must_use]
    pub fn matches(&self, key: &Value, value: &Value) -> bool {
        match self {
            IndexOperator::Eq => key == value,
            IndexOperator::Lt => key < value,
            IndexOperator::Le => key <= value,
            IndexOperator::Gt => key > value,
            IndexOperator::Ge => key >= value,
            IndexOperator::In => value.as_list().is_some_and(|l| l.contains(key)),
        }
    }

    /// Swaps sides: `value op key` is `key op.reversed() value`.
    ///
    /// `In` has no mirror image and returns `None`.
    #[must_use]
    pub fn reversed(&self) -> Option<IndexOperator> {
        match self {
            IndexOperator::Eq => Some(IndexOperator::Eq),
            IndexOperator::Lt => Some(IndexOperator::Gt),
            IndexOperator::Le => Some(IndexOperator::Ge),
            IndexOperator::Gt => Some(IndexOperator::Lt),
            IndexOperator::Ge => Some(IndexOperator::Le),
            IndexOperator::In => None,
        }
    }
}

impl fmt::Display for IndexOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexOperator::Eq => "==",
            IndexOperator::Lt => "<",
            IndexOperator::Le => "<=",
            IndexOperator::Gt => ">",
            IndexOperator::Ge => ">=",
            IndexOperator::In => "IN",
        };
        write!(f, "{s}")
    }
}

/// Answer to "can you evaluate this condition with an index?".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexAnswer {
    /// Whether an index supports the condition.
    pub supported: bool,
    /// Estimated fraction of documents the condition selects (0..=1).
    pub selectivity: f64,
}

impl IndexAnswer {
    /// No index can answer the condition.
    #[must_use]
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            selectivity: 1.0,
        }
    }

    /// An index can answer the condition with the given selectivity.
    #[must_use]
    pub fn supported(selectivity: f64) -> Self {
        Self {
            supported: true,
            selectivity: selectivity.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches() {
        let two = Value::Int64(2);
        assert!(IndexOperator::Eq.matches(&two, &Value::Float64(2.0)));
        assert!(IndexOperator::Lt.matches(&Value::Null, &two));
        assert!(IndexOperator::Ge.matches(&two, &two));
        assert!(IndexOperator::In.matches(&two, &Value::List(vec![Value::Int64(1), two.clone()])));
        assert!(!IndexOperator::In.matches(&two, &two));
    }

    #[test]
    fn test_reversed() {
        assert_eq!(IndexOperator::Lt.reversed(), Some(IndexOperator::Gt));
        assert_eq!(IndexOperator::In.reversed(), None);
    }
}
