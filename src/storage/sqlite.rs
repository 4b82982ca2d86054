//! SQLite storage implementation
//!
//! This module provides a persistent implementation of the Storage trait, so
//! a crawl can be stopped and resumed without revisiting pages.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use url::Url;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens (or creates) a database file
    ///
    /// The schema is created by `Storage::init`.
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Returns the number of recorded fingerprints
    pub fn visited_count(&self) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM visited", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// SQLite integers are signed; fingerprints are stored bit-for-bit
fn to_db(fingerprint: u64) -> i64 {
    fingerprint as i64
}

impl Storage for SqliteStorage {
    fn init(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        initialize_schema(&conn)?;
        Ok(())
    }

    fn visited(&self, fingerprint: u64) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT OR IGNORE INTO visited (fingerprint, visited_at) VALUES (?1, ?2)",
            params![to_db(fingerprint), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn is_visited(&self, fingerprint: u64) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let found: Option<i64> = conn
            .query_row(
                "SELECT fingerprint FROM visited WHERE fingerprint = ?1",
                params![to_db(fingerprint)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn cookies(&self, url: &Url) -> String {
        let host = url.host_str().unwrap_or_default();
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let result: Result<Option<String>, rusqlite::Error> = conn
            .query_row(
                "SELECT cookies FROM cookies WHERE host = ?1",
                params![host],
                |row| row.get(0),
            )
            .optional();

        match result {
            Ok(cookies) => cookies.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to load cookies for {}: {}", host, e);
                String::new()
            }
        }
    }

    fn set_cookies(&self, url: &Url, cookies: &str) {
        let host = url.host_str().unwrap_or_default();
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let result = conn.execute(
            "INSERT INTO cookies (host, cookies, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(host) DO UPDATE SET cookies = excluded.cookies, updated_at = excluded.updated_at",
            params![host, cookies, Utc::now().to_rfc3339()],
        );

        if let Err(e) = result {
            tracing::warn!("Failed to store cookies for {}: {}", host, e);
        }
    }
}
