//! Ordered secondary index.

use super::{AttributePath, IndexOperator};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::ops::Bound;
use tessera_common::Value;

/// An ordered (non-sparse) index over one attribute path.
///
/// Keys are [`Value`]s in their total order, so range lookups return exactly
/// the documents a filter using the same comparison would keep. Documents
/// missing the attribute are indexed under `null`. Entries point at document
/// slots of the owning collection.
#[derive(Debug, Clone)]
pub struct SecondaryIndex {
    path: AttributePath,
    entries: BTreeMap<Value, SmallVec<[usize; 4]>>,
    documents: usize,
}

impl SecondaryIndex {
    /// Creates an empty index over `path`.
    #[must_use]
    pub fn new(path: AttributePath) -> Self {
        Self {
            path,
            entries: BTreeMap::new(),
            documents: 0,
        }
    }

    /// The indexed path.
    #[must_use]
    pub fn path(&self) -> &AttributePath {
        &self.path
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn distinct_keys(&self) -> usize {
        self.entries.len()
    }

    /// Indexes the document stored at `slot`.
    pub fn insert(&mut self, slot: usize, document: &Value) {
        for key in self.path.keys(document) {
            self.entries.entry(key).or_default().push(slot);
        }
        self.documents += 1;
    }

    /// Removes the document stored at `slot`.
    pub fn remove(&mut self, slot: usize, document: &Value) {
        for key in self.path.keys(document) {
            if let Some(slots) = self.entries.get_mut(&key) {
                slots.retain(|s| *s != slot);
                if slots.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
        self.documents = self.documents.saturating_sub(1);
    }

    /// Returns the matching document slots in ascending order, without
    /// duplicates.
    #[must_use]
    pub fn lookup(&self, op: IndexOperator, value: &Value) -> Vec<usize> {
        let mut slots: Vec<usize> = match op {
            IndexOperator::Eq => self
                .entries
                .get(value)
                .map(|s| s.to_vec())
                .unwrap_or_default(),
            IndexOperator::In => match value.as_list() {
                Some(candidates) => candidates
                    .iter()
                    .filter_map(|c| self.entries.get(c))
                    .flat_map(|s| s.iter().copied())
                    .collect(),
                None => Vec::new(),
            },
            IndexOperator::Lt => self.range((Bound::Unbounded, Bound::Excluded(value))),
            IndexOperator::Le => self.range((Bound::Unbounded, Bound::Included(value))),
            IndexOperator::Gt => self.range((Bound::Excluded(value), Bound::Unbounded)),
            IndexOperator::Ge => self.range((Bound::Included(value), Bound::Unbounded)),
        };
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    fn range(&self, bounds: (Bound<&Value>, Bound<&Value>)) -> Vec<usize> {
        self.entries
            .range::<Value, _>(bounds)
            .flat_map(|(_, s)| s.iter().copied())
            .collect()
    }

    /// Estimated fraction of documents selected by `op`.
    #[must_use]
    pub fn selectivity(&self, op: IndexOperator) -> f64 {
        if self.documents == 0 || self.entries.is_empty() {
            return 1.0;
        }
        let per_key = 1.0 / self.entries.len() as f64;
        match op {
            IndexOperator::Eq => per_key,
            IndexOperator::In => (per_key * 3.0).min(1.0),
            IndexOperator::Lt | IndexOperator::Le | IndexOperator::Gt | IndexOperator::Ge => 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index_with(docs: &[serde_json::Value], path: &str) -> SecondaryIndex {
        let mut index = SecondaryIndex::new(AttributePath::parse(path).unwrap());
        for (slot, doc) in docs.iter().enumerate() {
            index.insert(slot, &Value::from(doc.clone()));
        }
        index
    }

    #[test]
    fn test_equality_and_ranges() {
        let docs = [json!({"a": 1}), json!({"a": 2}), json!({"b": 1}), json!({"a": 3})];
        let index = index_with(&docs, "a");

        assert_eq!(index.lookup(IndexOperator::Eq, &Value::Int64(2)), vec![1]);
        assert_eq!(index.lookup(IndexOperator::Eq, &Value::Null), vec![2]);
        // null sorts before numbers, same as the comparison operators
        assert_eq!(index.lookup(IndexOperator::Lt, &Value::Int64(2)), vec![0, 2]);
        assert_eq!(index.lookup(IndexOperator::Ge, &Value::Int64(2)), vec![1, 3]);
        assert_eq!(
            index.lookup(IndexOperator::In, &Value::from(json!([3, 1, 9]))),
            vec![0, 3]
        );
        assert!(index.lookup(IndexOperator::In, &Value::Int64(3)).is_empty());
    }

    #[test]
    fn test_expanded_path_dedups_per_document() {
        let docs = [json!({"t": [1, 1, 2]}), json!({"t": [2]}), json!({"t": 1})];
        let index = index_with(&docs, "t[*]");
        assert_eq!(index.lookup(IndexOperator::Eq, &Value::Int64(1)), vec![0]);
        assert_eq!(index.lookup(IndexOperator::Ge, &Value::Int64(1)), vec![0, 1]);
    }

    #[test]
    fn test_remove() {
        let docs = [json!({"a": 1}), json!({"a": 1})];
        let mut index = index_with(&docs, "a");
        index.remove(0, &Value::from(docs[0].clone()));
        assert_eq!(index.lookup(IndexOperator::Eq, &Value::Int64(1)), vec![1]);
        assert_eq!(index.distinct_keys(), 1);
    }

    #[test]
    fn test_selectivity() {
        let docs = [json!({"a": 1}), json!({"a": 2}), json!({"a": 3}), json!({"a": 4})];
        let index = index_with(&docs, "a");
        assert!((index.selectivity(IndexOperator::Eq) - 0.25).abs() < 1e-9);
        assert!(index.selectivity(IndexOperator::Lt) <= 1.0);
    }

    proptest::proptest! {
        #[test]
        fn range_lookup_matches_comparison(
            values in proptest::collection::vec(proptest::option::of(0i64..5), 0..16),
            probe in 0i64..5,
        ) {
            let mut index = SecondaryIndex::new(AttributePath::parse("a").unwrap());
            let keys: Vec<Value> = values.iter().map(|v| v.map_or(Value::Null, Value::Int64)).collect();
            for (slot, value) in values.iter().enumerate() {
                let doc = match value {
                    Some(v) => Value::map([("a", Value::Int64(*v))]),
                    None => Value::map([("b", Value::Int64(0))]),
                };
                index.insert(slot, &doc);
            }
            let probe = Value::Int64(probe);
            let expect = |keep: fn(&Value, &Value) -> bool| -> Vec<usize> {
                keys.iter().enumerate().filter(|(_, k)| keep(k, &probe)).map(|(slot, _)| slot).collect()
            };
            proptest::prop_assert_eq!(index.lookup(IndexOperator::Eq, &probe), expect(|k, p| k == p));
            proptest::prop_assert_eq!(index.lookup(IndexOperator::Lt, &probe), expect(|k, p| k < p));
            proptest::prop_assert_eq!(index.lookup(IndexOperator::Le, &probe), expect(|k, p| k <= p));
            proptest::prop_assert_eq!(index.lookup(IndexOperator::Gt, &probe), expect(|k, p| k > p));
            proptest::prop_assert_eq!(index.lookup(IndexOperator::Ge, &probe), expect(|k, p| k >= p));
        }
    }
}
