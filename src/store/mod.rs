//! SQLite persistence layer.
//!
//! A single [`Store`] owns the `rusqlite::Connection` behind an `Arc<Mutex<…>>`
//! so it is `Send + Sync` while respecting SQLite's single-writer requirement.
//! Each entity module adds its repository methods in its own `impl Store`
//! block; all multi-field updates to a single row are single statements and
//! therefore atomic.

pub mod activity;
pub mod agents;
pub mod approvals;
pub mod checkpoints;
pub mod collab;
pub mod contacts;
pub mod jobs;
pub mod messaging;
pub mod notifications;
pub mod schedules;
pub mod schema;
pub mod skills;
pub mod tasks;
pub mod usage;

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store lock error: {0}")]
    Lock(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Shared handle to the runtime database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and initialise the schema.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // WAL keeps readers unblocked while a write is in flight.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::bootstrap(conn)
    }

    /// Create an in-memory database — used throughout the test suite.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the connection lock, mapping the poison-error to a `StoreError`.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

/// Current UTC timestamp in the RFC-3339 form every table stores.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Fresh opaque identifier.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_schema_initialises() {
        let store = Store::in_memory().unwrap();
        let conn = store.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(count >= 15, "expected the full table set, got {count}");
    }
}
