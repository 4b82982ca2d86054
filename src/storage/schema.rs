//! Database schema definitions
//!
//! This module contains the SQL schema for the SQLite storage backend.

use rusqlite::Connection;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Request fingerprints that have been admitted for fetching
CREATE TABLE IF NOT EXISTS visited (
    fingerprint INTEGER PRIMARY KEY,
    visited_at TEXT NOT NULL
);

-- Serialized cookies per host
CREATE TABLE IF NOT EXISTS cookies (
    host TEXT PRIMARY KEY,
    cookies TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
