//! Storage module for crawl state
//!
//! This module holds the pluggable store a collector deduplicates against and
//! persists cookies in:
//! - The `Storage` capability trait
//! - An in-memory default backend
//! - A SQLite backend for crawls that resume across runs
//! - A cookie jar adapter for the HTTP client

mod cookies;
mod memory;
mod schema;
mod sqlite;
mod traits;

pub use cookies::{parse_cookie_lines, serialize_cookies, Cookie, StorageCookieJar};
pub use memory::InMemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use std::path::Path;
use std::sync::Arc;

/// Opens the store described by an optional database path
///
/// Without a path the store lives in memory.
pub fn open_storage(database_path: Option<&Path>) -> StorageResult<Arc<dyn Storage>> {
    let store: Arc<dyn Storage> = match database_path {
        Some(path) => Arc::new(SqliteStorage::new(path)?),
        None => Arc::new(InMemoryStorage::new()),
    };
    store.init()?;
    Ok(store)
}
