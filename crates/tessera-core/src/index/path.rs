//! Attribute paths.

use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_common::{Error, Result, Value};

/// One step of an attribute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Named attribute access.
    Attribute(String),
    /// Array expansion (`[*]`): continue the path on every element.
    Expand,
}

/// A path into a document, such as `address.city` or `tags[*].name`.
///
/// A path without expansion yields exactly one key per document; a missing
/// attribute yields `null`. A path with expansion yields one key per array
/// element, deduplicated per document, and no keys at all when the expanded
/// value is not an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributePath {
    segments: Vec<PathSegment>,
}

impl AttributePath {
    /// Creates a path from segments.
    #[must_use]
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Creates a plain attribute path from names.
    #[must_use]
    pub fn attributes<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            segments: names
                .into_iter()
                .map(|n| PathSegment::Attribute(n.into()))
                .collect(),
        }
    }

    /// Parses the textual form, e.g. `tags[*].name`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for part in text.split('.') {
            let mut name = part;
            let mut expansions = 0;
            while let Some(stripped) = name.strip_suffix("[*]") {
                name = stripped;
                expansions += 1;
            }
            if name.is_empty() || name.contains(['[', ']']) {
                return Err(Error::InvalidQuery(format!("invalid attribute path: {text}")));
            }
            segments.push(PathSegment::Attribute(name.to_string()));
            segments.extend(std::iter::repeat_n(PathSegment::Expand, expansions));
        }
        Ok(Self { segments })
    }

    /// Returns the segments.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns true if the path contains an array expansion.
    #[must_use]
    pub fn is_expanded(&self) -> bool {
        self.segments.iter().any(|s| *s == PathSegment::Expand)
    }

    /// Appends a segment.
    #[must_use]
    pub fn with(mut self, segment: PathSegment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Returns the index keys `document` contributes under this path.
    #[must_use]
    pub fn keys(&self, document: &Value) -> Vec<Value> {
        let mut out = Vec::new();
        collect_keys(&self.segments, document.clone(), &mut out);
        if self.is_expanded() {
            out.sort();
            out.dedup();
        }
        out
    }

    /// Resolves the path the way an expression would: attribute access on
    /// non-objects gives `null` and expansion of a non-array gives `[]`.
    #[must_use]
    pub fn resolve(&self, document: &Value) -> Value {
        resolve(&self.segments, document.clone())
    }
}

fn collect_keys(segments: &[PathSegment], current: Value, out: &mut Vec<Value>) {
    match segments.split_first() {
        None => out.push(current),
        Some((PathSegment::Attribute(name), rest)) => {
            collect_keys(rest, current.attribute(name), out);
        }
        Some((PathSegment::Expand, rest)) => {
            if let Value::List(items) = current {
                for item in items {
                    collect_keys(rest, item, out);
                }
            }
        }
    }
}

fn resolve(segments: &[PathSegment], current: Value) -> Value {
    match segments.split_first() {
        None => current,
        Some((PathSegment::Attribute(name), rest)) => resolve(rest, current.attribute(name)),
        Some((PathSegment::Expand, rest)) => match current {
            Value::List(items) => {
                Value::List(items.into_iter().map(|i| resolve(rest, i)).collect())
            }
            _ => Value::List(Vec::new()),
        },
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            match segment {
                PathSegment::Attribute(name) => {
                    if !first {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                PathSegment::Expand => write!(f, "[*]")?,
            }
            first = false;
        }
        Ok(())
    }
}
