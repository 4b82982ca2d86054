//! In-memory storage implementation
//!
//! The default store of every collector. Nothing survives the process.

use crate::storage::traits::{Storage, StorageResult};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use url::Url;

/// Storage backend keeping fingerprints and cookies in memory
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    visited: RwLock<HashSet<u64>>,
    cookies: RwLock<HashMap<String, String>>,
}

impl InMemoryStorage {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of recorded fingerprints
    pub fn visited_count(&self) -> usize {
        self.visited
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Storage for InMemoryStorage {
    fn init(&self) -> StorageResult<()> {
        Ok(())
    }

    fn visited(&self, fingerprint: u64) -> StorageResult<()> {
        self.visited
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fingerprint);
        Ok(())
    }

    fn is_visited(&self, fingerprint: u64) -> StorageResult<bool> {
        Ok(self
            .visited
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&fingerprint))
    }

    fn cookies(&self, url: &Url) -> String {
        let host = url.host_str().unwrap_or_default();
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    fn set_cookies(&self, url: &Url, cookies: &str) {
        let host = url.host_str().unwrap_or_default().to_string();
        self.cookies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host, cookies.to_string());
    }
}
