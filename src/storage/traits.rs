//! Storage traits and error types
//!
//! This module defines the capability interface the collector needs from a
//! storage backend: a fingerprint set for deduplication and per-host cookie
//! persistence.

use thiserror::Error;
use url::Url;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// A single store may be shared by many concurrently running fetches and by
/// forked collectors, so implementations synchronize internally. The
/// collector runs `is_visited` then `visited` without holding a lock across
/// the two calls.
pub trait Storage: Send + Sync {
    /// Prepares the backend; called once before the store is used
    fn init(&self) -> StorageResult<()>;

    /// Records a request fingerprint as visited
    fn visited(&self, fingerprint: u64) -> StorageResult<()>;

    /// Returns true if the fingerprint was recorded before
    fn is_visited(&self, fingerprint: u64) -> StorageResult<bool>;

    /// Returns the serialized cookies stored for the host of `url`
    ///
    /// The format is one `Set-Cookie` style line per cookie; an empty string
    /// means no cookies.
    fn cookies(&self, url: &Url) -> String;

    /// Replaces the serialized cookies stored for the host of `url`
    fn set_cookies(&self, url: &Url, cookies: &str);
}
