//! `outbox` table: local mutations awaiting push to the sync server,
//! spec §4.E / §4.H.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

use super::LocalStore;

/// One pending local change. `deleted` distinguishes an upsert from a
/// tombstone; the sync client fetches the full row for upserts and only
/// the id/timestamp for deletes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboxChange {
    pub id: uuid::Uuid,
    pub updated_at: i64,
    pub deleted: bool,
}

impl LocalStore {
    /// Outstanding changes, oldest first, capped at `limit` (spec §4.H
    /// `push(limit=500)`).
    pub fn outbox_pending(&self, limit: i64) -> Result<Vec<OutboxChange>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, updated_at, deleted FROM outbox ORDER BY updated_at ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                let id_str: String = row.get(0)?;
                Ok(OutboxChange {
                    id: uuid::Uuid::parse_str(&id_str).unwrap_or_default(),
                    updated_at: row.get(1)?,
                    deleted: row.get::<_, i64>(2)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn outbox_len(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM outbox", [], |r| r.get(0))?)
    }

    /// Drops an outbox row once the server has accepted it. A stale row
    /// (one whose `updated_at` no longer matches, because the entry was
    /// mutated again after the push batch was read) is left behind so the
    /// next `push` picks up the newer change.
    pub fn outbox_remove_if_unchanged(&self, id: uuid::Uuid, pushed_updated_at: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM outbox WHERE id=?1 AND updated_at=?2",
            params![id.to_string(), pushed_updated_at],
        )?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::codec::EncryptedEntry;

    fn sample_enc() -> EncryptedEntry {
        EncryptedEntry {
            ciphertext: vec![1, 2, 3],
            iv: [0u8; 12],
            auth_tag: [0u8; 16],
        }
    }

    #[test]
    fn insert_populates_outbox_and_removal_respects_staleness() {
        let store = LocalStore::open_in_memory().unwrap();
        let id = uuid::Uuid::new_v4();
        store.insert_entry(id, "a", "u", "c", &sample_enc()).unwrap();

        let pending = store.outbox_pending(500).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);

        // Removing with the timestamp the push actually saw succeeds.
        assert!(store.outbox_remove_if_unchanged(id, pending[0].updated_at).unwrap());
        assert_eq!(store.outbox_len().unwrap(), 0);

        // A subsequent update re-populates the outbox; removing against a
        // stale (already-superseded) timestamp is a no-op.
        store.update_entry(id, "b", "u", "c", &sample_enc()).unwrap();
        let stale_ts = store.outbox_pending(500).unwrap()[0].updated_at - 1;
        assert!(!store.outbox_remove_if_unchanged(id, stale_ts).unwrap());
        assert_eq!(store.outbox_len().unwrap(), 1);
    }
}
