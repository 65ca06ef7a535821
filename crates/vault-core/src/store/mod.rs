//! Local encrypted store with change outbox, spec §4.E.
//!
//! Follows the teacher's `db.rs` shape: a `Mutex<Connection>`, WAL pragmas,
//! prepared statements, and small row-mapping helper functions per table.

pub mod entries;
pub mod outbox;
pub mod sync_state;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::StoreError;

pub use entries::{Entry, EntryMeta};
pub use outbox::OutboxChange;

/// Current time in ms since the epoch, spec §3 `createdAt`/`updatedAt`.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    pub fn default_db_path() -> PathBuf {
        let dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("CardVault");
        std::fs::create_dir_all(&dir).ok();
        dir.join("vault.db")
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = LocalStore {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = LocalStore {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                url TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                ciphertext BLOB,
                iv BLOB,
                auth_tag BLOB,
                deleted INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS outbox (
                id TEXT PRIMARY KEY,
                updated_at INTEGER NOT NULL,
                deleted INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_updated ON entries(updated_at)",
            [],
        )?;

        conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }
}
