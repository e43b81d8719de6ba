//! Hash container aliases.
//!
//! All hot-path maps and sets use `hashbrown` with `ahash`, which is
//! considerably faster than SipHash for the short keys the engine uses.

use ahash::RandomState;

/// Hash map used throughout the engine.
pub type FastHashMap<K, V> = hashbrown::HashMap<K, V, RandomState>;

/// Hash set used throughout the engine.
pub type FastHashSet<T> = hashbrown::HashSet<T, RandomState>;

/// Creates an empty [`FastHashMap`].
#[must_use]
pub fn fast_map<K, V>() -> FastHashMap<K, V> {
    FastHashMap::with_hasher(RandomState::new())
}

/// Creates an empty [`FastHashSet`].
#[must_use]
pub fn fast_set<T>() -> FastHashSet<T> {
    FastHashSet::with_hasher(RandomState::new())
}
