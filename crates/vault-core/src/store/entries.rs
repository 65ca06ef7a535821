//! `entries` table: the encrypted credential rows, spec §3 / §4.E.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::crypto::codec::EncryptedEntry;
use crate::error::StoreError;

use super::{now_ms, LocalStore};

/// Full persisted row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    pub id: uuid::Uuid,
    pub label: String,
    pub url: String,
    pub category: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub ciphertext: Option<Vec<u8>>,
    pub iv: Option<[u8; 12]>,
    pub auth_tag: Option<[u8; 16]>,
    pub deleted: bool,
}

/// Metadata-only projection returned by `listEntries` (no card tap
/// required, no ciphertext exposed).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryMeta {
    pub id: uuid::Uuid,
    pub label: String,
    pub url: String,
    pub category: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Entry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
        let id_str: String = row.get(0)?;
        let ciphertext: Option<Vec<u8>> = row.get(6)?;
        let iv: Option<Vec<u8>> = row.get(7)?;
        let auth_tag: Option<Vec<u8>> = row.get(8)?;
        Ok(Entry {
            id: uuid::Uuid::parse_str(&id_str).unwrap_or_default(),
            label: row.get(1)?,
            url: row.get(2)?,
            category: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            ciphertext,
            iv: iv.and_then(|v| v.try_into().ok()),
            auth_tag: auth_tag.and_then(|v| v.try_into().ok()),
            deleted: row.get::<_, i64>(9)? != 0,
        })
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            id: self.id,
            label: self.label.clone(),
            url: self.url.clone(),
            category: self.category.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn encrypted(&self) -> Option<EncryptedEntry> {
        Some(EncryptedEntry {
            ciphertext: self.ciphertext.clone()?,
            iv: self.iv?,
            auth_tag: self.auth_tag?,
        })
    }
}

const ENTRY_COLS: &str = "id,label,url,category,created_at,updated_at,ciphertext,iv,auth_tag,deleted";

impl LocalStore {
    /// Insert a brand-new entry plus its outbox row, in one transaction.
    /// Rejects a duplicate `id`.
    pub fn insert_entry(
        &self,
        id: uuid::Uuid,
        label: &str,
        url: &str,
        category: &str,
        enc: &EncryptedEntry,
    ) -> Result<Entry, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM entries WHERE id=?1", params![id.to_string()], |r| r.get(0))
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::Duplicate(id.to_string()));
        }

        let now = now_ms();
        tx.execute(
            &format!("INSERT INTO entries ({ENTRY_COLS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,0)"),
            params![
                id.to_string(),
                label,
                url,
                category,
                now,
                now,
                enc.ciphertext,
                enc.iv.to_vec(),
                enc.auth_tag.to_vec(),
            ],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO outbox (id, updated_at, deleted) VALUES (?1,?2,0)",
            params![id.to_string(), now],
        )?;
        tx.commit()?;

        Ok(Entry {
            id,
            label: label.to_string(),
            url: url.to_string(),
            category: category.to_string(),
            created_at: now,
            updated_at: now,
            ciphertext: Some(enc.ciphertext.clone()),
            iv: Some(enc.iv),
            auth_tag: Some(enc.auth_tag),
            deleted: false,
        })
    }

    /// Requires the row to exist; sets `updatedAt = now()`.
    pub fn update_entry(
        &self,
        id: uuid::Uuid,
        label: &str,
        url: &str,
        category: &str,
        enc: &EncryptedEntry,
    ) -> Result<Entry, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM entries WHERE id=?1", params![id.to_string()], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let now = now_ms();
        let changed = tx.execute(
            "UPDATE entries SET label=?2, url=?3, category=?4, updated_at=?5,
                ciphertext=?6, iv=?7, auth_tag=?8, deleted=0
             WHERE id=?1",
            params![
                id.to_string(),
                label,
                url,
                category,
                now,
                enc.ciphertext,
                enc.iv.to_vec(),
                enc.auth_tag.to_vec(),
            ],
        )?;
        if changed == 0 {
            // The row vanished between the existence check and the update.
            return Err(StoreError::RaceCondition(id.to_string()));
        }
        tx.execute(
            "INSERT OR REPLACE INTO outbox (id, updated_at, deleted) VALUES (?1,?2,0)",
            params![id.to_string(), now],
        )?;
        tx.commit()?;

        self.get_entry_row_locked(id)
    }

    /// Tombstone: nulls the ciphertext columns, stamps `updatedAt`.
    /// Idempotent: returns `false` if the row was already absent.
    pub fn delete_entry(&self, id: uuid::Uuid) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM entries WHERE id=?1", params![id.to_string()], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Ok(false);
        }

        let now = now_ms();
        tx.execute(
            "UPDATE entries SET ciphertext=NULL, iv=NULL, auth_tag=NULL, deleted=1, updated_at=?2 WHERE id=?1",
            params![id.to_string(), now],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO outbox (id, updated_at, deleted) VALUES (?1,?2,1)",
            params![id.to_string(), now],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn list_entries(&self, limit: i64, offset: i64, query: Option<&str>) -> Result<Vec<EntryMeta>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLS} FROM entries
             WHERE deleted=0 AND (?1 IS NULL OR label LIKE '%'||?1||'%' OR url LIKE '%'||?1||'%')
             ORDER BY updated_at DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt
            .query_map(params![query, limit, offset], Entry::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().map(|e| e.meta()).collect())
    }

    pub fn get_entry_row(&self, id: uuid::Uuid) -> Result<Entry, StoreError> {
        self.get_entry_row_locked(id)
    }

    fn get_entry_row_locked(&self, id: uuid::Uuid) -> Result<Entry, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {ENTRY_COLS} FROM entries WHERE id=?1"),
            params![id.to_string()],
            Entry::from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn export_all(&self) -> Result<Vec<Entry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {ENTRY_COLS} FROM entries WHERE deleted=0"))?;
        let rows = stmt.query_map([], Entry::from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Bulk insert for `import`; skips rows whose id already exists.
    /// Does not touch the outbox — imported rows are not "new local
    /// mutations" for replication purposes until they diverge locally.
    pub fn import_entries(&self, rows: &[Entry]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for e in rows {
            let exists: Option<i64> = tx
                .query_row("SELECT 1 FROM entries WHERE id=?1", params![e.id.to_string()], |r| r.get(0))
                .optional()?;
            if exists.is_some() {
                continue;
            }
            tx.execute(
                &format!("INSERT INTO entries ({ENTRY_COLS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)"),
                params![
                    e.id.to_string(),
                    e.label,
                    e.url,
                    e.category,
                    e.created_at,
                    e.updated_at,
                    e.ciphertext,
                    e.iv.map(|v| v.to_vec()),
                    e.auth_tag.map(|v| v.to_vec()),
                    e.deleted as i64,
                ],
            )?;
            inserted += 1;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Remote-apply helper: write iff `row.updatedAt > local.updatedAt` (or
    /// row missing). Does **not** append to the outbox.
    pub fn apply_remote_upsert(&self, row: &Entry) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let local_updated_at: Option<i64> = tx
            .query_row(
                "SELECT updated_at FROM entries WHERE id=?1",
                params![row.id.to_string()],
                |r| r.get(0),
            )
            .optional()?;

        if local_updated_at.is_some_and(|u| u >= row.updated_at) {
            return Ok(());
        }

        tx.execute(
            &format!(
                "INSERT INTO entries ({ENTRY_COLS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
                 ON CONFLICT(id) DO UPDATE SET
                    label=excluded.label, url=excluded.url, category=excluded.category,
                    updated_at=excluded.updated_at, ciphertext=excluded.ciphertext,
                    iv=excluded.iv, auth_tag=excluded.auth_tag, deleted=excluded.deleted"
            ),
            params![
                row.id.to_string(),
                row.label,
                row.url,
                row.category,
                row.created_at,
                row.updated_at,
                row.ciphertext,
                row.iv.map(|v| v.to_vec()),
                row.auth_tag.map(|v| v.to_vec()),
                row.deleted as i64,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remote-apply helper: tombstone iff the timestamp is strictly newer.
    /// Does not append to the outbox.
    pub fn apply_remote_delete(&self, id: uuid::Uuid, updated_at: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let local_updated_at: Option<i64> = tx
            .query_row("SELECT updated_at FROM entries WHERE id=?1", params![id.to_string()], |r| {
                r.get(0)
            })
            .optional()?;

        match local_updated_at {
            Some(u) if u >= updated_at => return Ok(()),
            Some(_) => {
                tx.execute(
                    "UPDATE entries SET ciphertext=NULL, iv=NULL, auth_tag=NULL, deleted=1, updated_at=?2 WHERE id=?1",
                    params![id.to_string(), updated_at],
                )?;
            }
            None => {
                tx.execute(
                    &format!(
                        "INSERT INTO entries ({ENTRY_COLS}) VALUES (?1,'','','',?2,?2,NULL,NULL,NULL,1)"
                    ),
                    params![id.to_string(), updated_at],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Inserts one outbox record per current entry, guarded by
    /// `initialSeedDone`.
    pub fn seed_outbox_from_entries(&self) -> Result<(), StoreError> {
        if self.get_sync_state("initialSeedDone")?.as_deref() == Some("true") {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let outbox_empty: i64 = tx.query_row("SELECT COUNT(*) FROM outbox", [], |r| r.get(0))?;
        if outbox_empty == 0 {
            tx.execute(
                "INSERT INTO outbox (id, updated_at, deleted)
                 SELECT id, updated_at, deleted FROM entries",
                [],
            )?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES ('initialSeedDone', 'true')",
            [],
        )?;
        tx.commit()?;
        Ok(())
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
    fn insert_then_get_round_trips() {
        let store = LocalStore::open_in_memory().unwrap();
        let id = uuid::Uuid::new_v4();
        store.insert_entry(id, "GH", "https://github.com/x", "dev", &sample_enc()).unwrap();

        let row = store.get_entry_row(id).unwrap();
        assert_eq!(row.label, "GH");
        assert!(!row.deleted);
        assert!(row.ciphertext.is_some());
    }

    #[test]
    fn insert_duplicate_id_rejected() {
        let store = LocalStore::open_in_memory().unwrap();
        let id = uuid::Uuid::new_v4();
        store.insert_entry(id, "a", "u", "c", &sample_enc()).unwrap();
        let err = store.insert_entry(id, "a", "u", "c", &sample_enc()).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn delete_tombstones_and_nulls_ciphertext() {
        let store = LocalStore::open_in_memory().unwrap();
        let id = uuid::Uuid::new_v4();
        store.insert_entry(id, "a", "u", "c", &sample_enc()).unwrap();
        assert!(store.delete_entry(id).unwrap());

        let row = store.get_entry_row(id).unwrap();
        assert!(row.deleted);
        assert!(row.ciphertext.is_none());
        assert!(row.iv.is_none());
        assert!(row.auth_tag.is_none());

        // Idempotent on an already-deleted (but still present) row: the
        // row still exists so this returns true again.
        assert!(store.delete_entry(id).unwrap());
        // Deleting an id that was never created returns false.
        assert!(!store.delete_entry(uuid::Uuid::new_v4()).unwrap());
    }

    #[test]
    fn update_missing_row_not_found() {
        let store = LocalStore::open_in_memory().unwrap();
        let err = store
            .update_entry(uuid::Uuid::new_v4(), "a", "u", "c", &sample_enc())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn remote_upsert_respects_lww() {
        let store = LocalStore::open_in_memory().unwrap();
        let id = uuid::Uuid::new_v4();
        let mut row = Entry {
            id,
            label: "old".into(),
            url: "u".into(),
            category: "c".into(),
            created_at: 100,
            updated_at: 100,
            ciphertext: Some(vec![1]),
            iv: Some([0u8; 12]),
            auth_tag: Some([0u8; 16]),
            deleted: false,
        };
        store.apply_remote_upsert(&row).unwrap();

        // Older write is a no-op.
        let mut stale = row.clone();
        stale.label = "stale".into();
        stale.updated_at = 50;
        store.apply_remote_upsert(&stale).unwrap();
        assert_eq!(store.get_entry_row(id).unwrap().label, "old");

        // Newer write wins.
        row.label = "new".into();
        row.updated_at = 200;
        store.apply_remote_upsert(&row).unwrap();
        assert_eq!(store.get_entry_row(id).unwrap().label, "new");
    }
}
