//! Mutex-guarded collections shared between concurrent workers.
//!
//! The lock never escapes these types: callers only insert/push and take
//! snapshots, so every mutation is a single critical section.

use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct GuardedMap<K, V> {
    inner: Mutex<BTreeMap<K, V>>,
}

impl<K: Ord + Clone, V: Clone> GuardedMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Insert a value, replacing (and returning) any previous value for the key.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.lock().insert(key, value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<K, V> {
        self.inner.lock().clone()
    }
}

impl<K: Ord + Clone, V: Clone> Default for GuardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct GuardedList<T> {
    inner: Mutex<Vec<T>>,
}

impl<T: Clone> GuardedList<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, item: T) {
        self.inner.lock().push(item);
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        self.inner.lock().extend(items);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().clone()
    }
}

impl<T: Clone> Default for GuardedList<T> {
    fn default() -> Self {
        Self::new()
    }
}
