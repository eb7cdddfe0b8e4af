#[cfg(feature = "ahash")]
use ahash::{AHashMap, AHashSet};
#[cfg(feature = "fxhash")]
use fxhash::{FxHashMap, FxHashSet};

#[cfg(any(feature = "ahash", feature = "fxhash"))]
use crate::adapter::{MapAdapter, SequenceAdapter};
#[cfg(any(feature = "ahash", feature = "fxhash"))]
use crate::value::Value;

// --- FxHashSet / FxHashMap ---
#[cfg(feature = "fxhash")]
impl SequenceAdapter for FxHashSet<Value> {
    fn with_len(len: usize) -> Self {
        FxHashSet::with_capacity_and_hasher(len, Default::default())
    }

    fn len(&self) -> usize {
        std::collections::HashSet::len(self)
    }

    fn elements(&self) -> impl Iterator<Item = &Value> + '_ {
        self.iter()
    }

    fn insert(&mut self, value: Value) {
        std::collections::HashSet::insert(self, value);
    }
}

#[cfg(feature = "fxhash")]
impl MapAdapter for FxHashMap<Value, Value> {
    fn with_len(len: usize) -> Self {
        FxHashMap::with_capacity_and_hasher(len, Default::default())
    }

    fn len(&self) -> usize {
        std::collections::HashMap::len(self)
    }

    fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> + '_ {
        self.iter()
    }

    fn insert(&mut self, key: Value, value: Value) {
        std::collections::HashMap::insert(self, key, value);
    }
}

// --- AHashSet / AHashMap ---
#[cfg(feature = "ahash")]
impl SequenceAdapter for AHashSet<Value> {
    fn with_len(len: usize) -> Self {
        AHashSet::with_capacity(len)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn elements(&self) -> impl Iterator<Item = &Value> + '_ {
        self.iter()
    }

    fn insert(&mut self, value: Value) {
        (**self).insert(value);
    }
}

#[cfg(feature = "ahash")]
impl MapAdapter for AHashMap<Value, Value> {
    fn with_len(len: usize) -> Self {
        AHashMap::with_capacity(len)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> + '_ {
        self.iter()
    }

    fn insert(&mut self, key: Value, value: Value) {
        (**self).insert(key, value);
    }
}
