//! The document value model.
//!
//! Every register, document, attribute and expression result is a [`Value`].
//! Values have a total order so they can be sorted, grouped and used as keys
//! of ordered indexes:
//!
//! `null < bool < number < string < list < map`
//!
//! Integers and floats are both "numbers" and compare numerically.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A dynamically typed document value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent or null value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Object with attributes sorted by name.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the name of this value's type as used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int64(_) | Value::Float64(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "array",
            Value::Map(_) => "object",
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int64(_) | Value::Float64(_) => 2,
            Value::String(_) => 3,
            Value::List(_) => 4,
            Value::Map(_) => 5,
        }
    }

    /// Returns true if this is `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this is an integer or a float.
    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int64(_) | Value::Float64(_))
    }

    /// Truthiness used by filters and logical operators.
    ///
    /// `null`, `false`, `0` and `""` are false. Lists and maps are always true.
    #[must_use]
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int64(i) => *i != 0,
            Value::Float64(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::List(_) | Value::Map(_) => true,
        }
    }

    /// Returns the boolean payload, if any.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the numeric payload as a float, if this is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(i) => Some(*i as f64),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list payload, if any.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the map payload, if any.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Attribute access. Non-maps and missing attributes yield `null`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Value {
        match self {
            Value::Map(m) => m.get(name).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Positional access. Negative positions count from the end; anything out
    /// of range (or a non-list) yields `null`.
    #[must_use]
    pub fn at(&self, position: i64) -> Value {
        let Value::List(items) = self else {
            return Value::Null;
        };
        let len = items.len() as i64;
        let idx = if position < 0 { len + position } else { position };
        if idx < 0 || idx >= len {
            return Value::Null;
        }
        items[idx as usize].clone()
    }

    /// Numeric conversion used by `TO_NUMBER` and arithmetic on mixed input.
    ///
    /// Unparseable strings, lists with more than one element and maps become
    /// `0`.
    #[must_use]
    pub fn to_number(&self) -> Value {
        match self {
            Value::Null => Value::Int64(0),
            Value::Bool(b) => Value::Int64(i64::from(*b)),
            Value::Int64(_) | Value::Float64(_) => self.clone(),
            Value::String(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    Value::Int64(i)
                } else if let Ok(f) = trimmed.parse::<f64>() {
                    if f.is_finite() {
                        Value::Float64(f)
                    } else {
                        Value::Int64(0)
                    }
                } else {
                    Value::Int64(0)
                }
            }
            Value::List(items) => match items.as_slice() {
                [] => Value::Int64(0),
                [single] => single.to_number(),
                _ => Value::Int64(0),
            },
            Value::Map(_) => Value::Int64(0),
        }
    }

    /// Converts this value into a `serde_json::Value`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int64(i) => serde_json::Value::from(*i),
            Value::Float64(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Builds a map value from `(name, value)` pairs.
    pub fn map<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// `-0.0` orders as `0.0`.
fn normalize_zero(f: f64) -> f64 {
    if f == 0.0 { 0.0 } else { f }
}

/// Exact comparison of an integer with a float, without rounding the
/// integer. NaN orders like `total_cmp` does: above everything when
/// positive, below everything when negative.
fn compare_int_float(i: i64, f: f64) -> Ordering {
    // 2^63, the first float above every i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return if f.is_sign_negative() { Ordering::Greater } else { Ordering::Less };
    }
    if f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    // In range, so the cast is exact.
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => normalize_zero(whole).total_cmp(&normalize_zero(f)),
        other => other,
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => x.cmp(y),
        (Value::Int64(x), Value::Float64(y)) => compare_int_float(*x, *y),
        (Value::Float64(x), Value::Int64(y)) => compare_int_float(*y, *x).reverse(),
        _ => {
            let x = normalize_zero(a.as_f64().unwrap_or(0.0));
            let y = normalize_zero(b.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => a.iter().cmp(b.iter()),
            _ => compare_numbers(self, other),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int64(_) | Value::Float64(_) => {
                // Equal numbers must hash equally regardless of representation.
                normalize_zero(self.as_f64().unwrap_or(0.0)).to_bits().hash(state);
            }
            Value::String(s) => s.hash(state),
            Value::List(items) => items.hash(state),
            Value::Map(m) => m.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int64(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int64(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int64(i),
                None => Value::Float64(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Map(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_order() {
        let ordered = [
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::Int64(-5),
            Value::Float64(0.5),
            Value::Int64(1),
            Value::from("a"),
            Value::from("b"),
            Value::List(vec![]),
            Value::List(vec![Value::Int64(1)]),
            Value::map([("a", Value::Int64(1))]),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_numbers_compare_across_representations() {
        assert_eq!(Value::Int64(2), Value::Float64(2.0));
        assert!(Value::Float64(1.5) < Value::Int64(2));

        use std::collections::hash_map::DefaultHasher;
        let hash = |v: &Value| {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&Value::Int64(3)), hash(&Value::Float64(3.0)));
    }

    #[test]
    fn test_large_integers_compare_exactly_with_floats() {
        let two_pow_63 = Value::Float64(9_223_372_036_854_775_808.0);
        assert!(Value::Int64(i64::MAX) < two_pow_63);
        assert!(Value::Int64(i64::MAX - 1) < Value::Int64(i64::MAX));
        assert!(Value::Int64(i64::MIN) == Value::Float64(-9_223_372_036_854_775_808.0));

        // 2^53 + 1 has no exact float; it must not collapse onto 2^53.
        let exact = 9_007_199_254_740_993_i64;
        assert!(Value::Int64(exact) > Value::Float64(9_007_199_254_740_992.0));
        assert!(Value::Float64(9_007_199_254_740_992.0) < Value::Int64(exact));
        assert!(Value::Int64(-3) > Value::Float64(-3.5));
        assert!(Value::Int64(3) < Value::Float64(f64::NAN));
    }

    #[test]
    fn test_signed_zeros_are_equal() {
        assert_eq!(Value::Float64(-0.0), Value::Float64(0.0));
        assert_eq!(Value::Float64(-0.0), Value::Int64(0));
        assert!(Value::Float64(-0.5) < Value::Int64(0));

        let mut keys = std::collections::BTreeMap::new();
        keys.insert(Value::Float64(0.0), 1);
        keys.insert(Value::Float64(-0.0), 2);
        assert_eq!(keys.len(), 1);
    }

    proptest::proptest! {
        #[test]
        fn mixed_number_order_is_transitive(
            a in proptest::prelude::any::<i64>(),
            b in proptest::prelude::any::<f64>(),
            c in proptest::prelude::any::<i64>(),
        ) {
            let values = [Value::Int64(a), Value::Float64(b), Value::Int64(c)];
            for x in &values {
                for y in &values {
                    proptest::prop_assert_eq!(x.cmp(y), y.cmp(x).reverse());
                    for z in &values {
                        if x <= y && y <= z {
                            proptest::prop_assert!(x <= z, "{} <= {} <= {}", x, y, z);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.to_bool());
        assert!(!Value::Int64(0).to_bool());
        assert!(!Value::from("").to_bool());
        assert!(Value::List(vec![]).to_bool());
        assert!(Value::from("x").to_bool());
    }

    #[test]
    fn test_attribute_and_index_access() {
        let doc = Value::from(json!({"a": {"b": 1}, "list": [1, 2, 3]}));
        assert_eq!(doc.attribute("a").attribute("b"), Value::Int64(1));
        assert_eq!(doc.attribute("missing"), Value::Null);
        assert_eq!(Value::Int64(3).attribute("a"), Value::Null);

        let list = doc.attribute("list");
        assert_eq!(list.at(0), Value::Int64(1));
        assert_eq!(list.at(-1), Value::Int64(3));
        assert_eq!(list.at(7), Value::Null);
    }

    #[test]
    fn test_json_round_trip() {
        let json = json!({"name": "x", "n": 1.5, "tags": [null, true]});
        let value = Value::from(json.clone());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_to_number() {
        assert_eq!(Value::from(" 12 ").to_number(), Value::Int64(12));
        assert_eq!(Value::from("1.5").to_number(), Value::Float64(1.5));
        assert_eq!(Value::from("abc").to_number(), Value::Int64(0));
        assert_eq!(Value::Bool(true).to_number(), Value::Int64(1));
    }
}
