//! Container adapters.
//!
//! The sequence and map codecs never see a concrete container type. They
//! talk to these two small capability traits, implemented here for the
//! standard collections and `indexmap`, and in `features.rs` for the
//! optional hash-map crates.

use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, LinkedList, VecDeque};

/// A container of elements the sequence codec can write and rebuild.
pub trait SequenceAdapter {
    /// An empty container with room for `len` elements.
    fn with_len(len: usize) -> Self;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Elements in iteration order.
    fn elements(&self) -> impl Iterator<Item = &Value> + '_;
    fn insert(&mut self, value: Value);
}

/// A container of key/value entries the map codec can write and rebuild.
pub trait MapAdapter {
    fn with_len(len: usize) -> Self;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> + '_;
    fn insert(&mut self, key: Value, value: Value);
}

impl SequenceAdapter for Vec<Value> {
    fn with_len(len: usize) -> Self {
        Vec::with_capacity(len)
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn elements(&self) -> impl Iterator<Item = &Value> + '_ {
        self.iter()
    }

    fn insert(&mut self, value: Value) {
        self.push(value);
    }
}

impl SequenceAdapter for VecDeque<Value> {
    fn with_len(len: usize) -> Self {
        VecDeque::with_capacity(len)
    }

    fn len(&self) -> usize {
        VecDeque::len(self)
    }

    fn elements(&self) -> impl Iterator<Item = &Value> + '_ {
        self.iter()
    }

    fn insert(&mut self, value: Value) {
        self.push_back(value);
    }
}

impl SequenceAdapter for LinkedList<Value> {
    fn with_len(_len: usize) -> Self {
        LinkedList::new()
    }

    fn len(&self) -> usize {
        LinkedList::len(self)
    }

    fn elements(&self) -> impl Iterator<Item = &Value> + '_ {
        self.iter()
    }

    fn insert(&mut self, value: Value) {
        self.push_back(value);
    }
}

impl SequenceAdapter for HashSet<Value> {
    fn with_len(len: usize) -> Self {
        HashSet::with_capacity(len)
    }

    fn len(&self) -> usize {
        HashSet::len(self)
    }

    fn elements(&self) -> impl Iterator<Item = &Value> + '_ {
        self.iter()
    }

    fn insert(&mut self, value: Value) {
        HashSet::insert(self, value);
    }
}

impl SequenceAdapter for BTreeSet<Value> {
    fn with_len(_len: usize) -> Self {
        BTreeSet::new()
    }

    fn len(&self) -> usize {
        BTreeSet::len(self)
    }

    fn elements(&self) -> impl Iterator<Item = &Value> + '_ {
        self.iter()
    }

    fn insert(&mut self, value: Value) {
        BTreeSet::insert(self, value);
    }
}

impl SequenceAdapter for IndexSet<Value> {
    fn with_len(len: usize) -> Self {
        IndexSet::with_capacity(len)
    }

    fn len(&self) -> usize {
        IndexSet::len(self)
    }

    fn elements(&self) -> impl Iterator<Item = &Value> + '_ {
        self.iter()
    }

    fn insert(&mut self, value: Value) {
        IndexSet::insert(self, value);
    }
}

impl MapAdapter for HashMap<Value, Value> {
    fn with_len(len: usize) -> Self {
        HashMap::with_capacity(len)
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> + '_ {
        self.iter()
    }

    fn insert(&mut self, key: Value, value: Value) {
        HashMap::insert(self, key, value);
    }
}

impl MapAdapter for BTreeMap<Value, Value> {
    fn with_len(_len: usize) -> Self {
        BTreeMap::new()
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> + '_ {
        self.iter()
    }

    fn insert(&mut self, key: Value, value: Value) {
        BTreeMap::insert(self, key, value);
    }
}

impl MapAdapter for IndexMap<Value, Value> {
    fn with_len(len: usize) -> Self {
        IndexMap::with_capacity(len)
    }

    fn len(&self) -> usize {
        IndexMap::len(self)
    }

    fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> + '_ {
        self.iter()
    }

    fn insert(&mut self, key: Value, value: Value) {
        IndexMap::insert(self, key, value);
    }
}
