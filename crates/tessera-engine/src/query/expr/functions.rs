//! Built-in functions.

use std::fmt;
use tessera_common::{Error, Result, Value};

/// A built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    /// Number of elements, attributes or characters.
    Length,
    /// String concatenation.
    Concat,
    /// Lower-cases a string.
    Lower,
    /// Upper-cases a string.
    Upper,
    /// Numeric conversion.
    ToNumber,
    /// Sum of an array of numbers.
    Sum,
    /// Smallest non-null array element.
    Min,
    /// Largest non-null array element.
    Max,
    /// Random float in `[0, 1)`.
    Rand,
    /// Raises a runtime error.
    Fail,
}

impl Function {
    /// Resolves a function by its (case-insensitive) name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Function> {
        let f = match name.to_ascii_uppercase().as_str() {
            "LENGTH" | "COUNT" => Function::Length,
            "CONCAT" => Function::Concat,
            "LOWER" => Function::Lower,
            "UPPER" => Function::Upper,
            "TO_NUMBER" => Function::ToNumber,
            "SUM" => Function::Sum,
            "MIN" => Function::Min,
            "MAX" => Function::Max,
            "RAND" => Function::Rand,
            "FAIL" => Function::Fail,
            _ => return None,
        };
        Some(f)
    }

    /// Canonical name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Function::Length => "LENGTH",
            Function::Concat => "CONCAT",
            Function::Lower => "LOWER",
            Function::Upper => "UPPER",
            Function::ToNumber => "TO_NUMBER",
            Function::Sum => "SUM",
            Function::Min => "MIN",
            Function::Max => "MAX",
            Function::Rand => "RAND",
            Function::Fail => "FAIL",
        }
    }

    /// Returns false for functions whose result may differ between calls.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, Function::Rand)
    }

    /// Returns true for functions that may raise an error.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        matches!(self, Function::Fail)
    }

    /// Calls the function with evaluated arguments.
    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        match self {
            Function::Length => Ok(length(&first(args))),
            Function::Concat => Ok(concat(args)),
            Function::Lower => Ok(Value::String(text(&first(args)).to_lowercase())),
            Function::Upper => Ok(Value::String(text(&first(args)).to_uppercase())),
            Function::ToNumber => Ok(first(args).to_number()),
            Function::Sum => Ok(sum(&first(args))),
            Function::Min => Ok(extreme(&first(args), |a, b| b < a)),
            Function::Max => Ok(extreme(&first(args), |a, b| b > a)),
            Function::Rand => Ok(Value::Float64(rand::random::<f64>())),
            Function::Fail => {
                let message = args
                    .first()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "FAIL() called".to_string());
                Err(Error::runtime(message))
            }
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn first(args: Vec<Value>) -> Value {
    args.into_iter().next().unwrap_or_default()
}

/// String form used by string functions: strings unquoted, null empty,
/// everything else as JSON.
fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn length(value: &Value) -> Value {
    let len = match value {
        Value::Null => 0,
        Value::Bool(b) => usize::from(*b),
        Value::Int64(_) | Value::Float64(_) => value.to_string().len(),
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(m) => m.len(),
    };
    Value::from(len)
}

fn concat(args: Vec<Value>) -> Value {
    let mut out = String::new();
    for arg in args {
        match arg {
            Value::List(items) => items.iter().for_each(|i| out.push_str(&text(i))),
            other => out.push_str(&text(&other)),
        }
    }
    Value::String(out)
}

fn sum(value: &Value) -> Value {
    let Some(items) = value.as_list() else {
        return Value::Null;
    };
    let mut int_sum: Option<i64> = Some(0);
    let mut float_sum = 0.0;
    for item in items {
        match item {
            Value::Null => {}
            Value::Int64(i) => {
                int_sum = int_sum.and_then(|s| s.checked_add(*i));
                float_sum += *i as f64;
            }
            Value::Float64(f) => {
                int_sum = None;
                float_sum += f;
            }
            _ => return Value::Null,
        }
    }
    match int_sum {
        Some(i) => Value::Int64(i),
        None => Value::Float64(float_sum),
    }
}

fn extreme(value: &Value, better: impl Fn(&Value, &Value) -> bool) -> Value {
    let Some(items) = value.as_list() else {
        return Value::Null;
    };
    let mut best: Option<&Value> = None;
    for item in items.iter().filter(|i| !i.is_null()) {
        if best.is_none_or(|b| better(b, item)) {
            best = Some(item);
        }
    }
    best.cloned().unwrap_or_default()
}
