//! Key/value context bag carried from a request to its response and children

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared, mutable key/value bag
///
/// Cloning a `Context` yields a handle to the same bag: values put by a
/// response callback are visible to requests spawned from it with
/// `Request::visit`.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, replacing any previous value for the key
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Returns the value for a key, or `None` if it was never put
    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Removes a key, returning its value
    pub fn remove(&self, key: &str) -> Option<String> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Calls `f` for every entry
    ///
    /// The bag is read-locked for the duration; `f` must not write to it.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &str),
    {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        for (k, v) in values.iter() {
            f(k, v);
        }
    }

    /// Returns a detached copy of the bag
    pub fn to_map(&self) -> HashMap<String, String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
