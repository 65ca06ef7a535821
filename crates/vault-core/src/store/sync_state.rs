//! `sync_state` table: small key/value bag for sync bookkeeping, spec
//! §4.E/§4.H — `cursor`, `lastSyncAt`, `lastSyncAttemptAt`,
//! `lastSyncError`, `initialSeedDone`.

use rusqlite::{params, OptionalExtension};

use crate::error::StoreError;

use super::LocalStore;

pub const KEY_CURSOR: &str = "cursor";
pub const KEY_LAST_SYNC_AT: &str = "lastSyncAt";
pub const KEY_LAST_SYNC_ATTEMPT_AT: &str = "lastSyncAttemptAt";
pub const KEY_LAST_SYNC_ERROR: &str = "lastSyncError";
pub const KEY_INITIAL_SEED_DONE: &str = "initialSeedDone";

impl LocalStore {
    pub fn get_sync_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row("SELECT value FROM sync_state WHERE key=?1", params![key], |r| r.get(0))
            .optional()?)
    }

    pub fn set_sync_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sync_state (key, value) VALUES (?1,?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn clear_sync_state(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sync_state WHERE key=?1", params![key])?;
        Ok(())
    }

    pub fn get_cursor(&self) -> Result<i64, StoreError> {
        Ok(self
            .get_sync_state(KEY_CURSOR)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub fn set_cursor(&self, cursor: i64) -> Result<(), StoreError> {
        self.set_sync_state(KEY_CURSOR, &cursor.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_defaults_to_zero_and_persists() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.get_cursor().unwrap(), 0);

        store.set_cursor(42).unwrap();
        assert_eq!(store.get_cursor().unwrap(), 42);

        store.set_cursor(43).unwrap();
        assert_eq!(store.get_cursor().unwrap(), 43);
    }

    #[test]
    fn arbitrary_keys_round_trip() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.get_sync_state(KEY_LAST_SYNC_ERROR).unwrap(), None);

        store.set_sync_state(KEY_LAST_SYNC_ERROR, "network unreachable").unwrap();
        assert_eq!(
            store.get_sync_state(KEY_LAST_SYNC_ERROR).unwrap().as_deref(),
            Some("network unreachable")
        );

        store.clear_sync_state(KEY_LAST_SYNC_ERROR).unwrap();
        assert_eq!(store.get_sync_state(KEY_LAST_SYNC_ERROR).unwrap(), None);
    }
}
