//! Per-host robots.txt cache
//!
//! Rulesets are cached for the lifetime of the cache and never refreshed.
//! The cache is shared between a collector and its forks.

use crate::robots::ParsedRobots;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared map from `host[:port]` to its parsed robots.txt
#[derive(Debug, Clone, Default)]
pub struct RobotsCache {
    entries: Arc<RwLock<HashMap<String, ParsedRobots>>>,
}

impl RobotsCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached ruleset for a host, if one was stored
    pub fn get(&self, host: &str) -> Option<ParsedRobots> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
    }

    /// Stores the ruleset for a host
    ///
    /// Two tasks that missed the cache for the same host may both fetch and
    /// insert; the last writer wins and the rulesets are equivalent.
    pub fn insert(&self, host: &str, robots: ParsedRobots) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.to_string(), robots);
    }

    /// Returns the number of cached hosts
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no host has been cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
