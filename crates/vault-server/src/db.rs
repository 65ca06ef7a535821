//! `ServerStore`: persistence for accounts, devices, refresh tokens,
//! vault items, the append-only change log, and key envelopes, spec
//! §4.I. Schema mirrors the Postgres column layout; storage engine here
//! is `rusqlite`, an injectable concrete implementation behind the
//! `ServerStore` trait.

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vault_core::sync::WireChange;

use crate::error::ServerError;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub mfa_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub id: String,
    pub user_id: String,
    pub device_name: String,
}

#[derive(Debug, Clone)]
pub struct RefreshTokenRow {
    pub token_hash: String,
    pub user_id: String,
    pub device_id: String,
    pub expires_at: i64,
    pub revoked: bool,
}

#[derive(Debug, Clone)]
pub struct ChangeRow {
    pub seq: i64,
    pub item: WireChange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeRow {
    pub key_version: u32,
    pub kdf: String,
    pub kdf_params: serde_json::Value,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
    pub auth_tag: String,
}

pub struct ServerStore {
    conn: Mutex<Connection>,
}

impl ServerStore {
    pub fn open(path: &std::path::Path) -> Result<Self, ServerError> {
        let conn = Connection::open(path)?;
        let store = ServerStore { conn: Mutex::new(conn) };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, ServerError> {
        let conn = Connection::open_in_memory()?;
        let store = ServerStore { conn: Mutex::new(conn) };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<(), ServerError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;

             CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                mfa_secret TEXT,
                created_at INTEGER NOT NULL
             );

             CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                device_name TEXT NOT NULL,
                created_at INTEGER NOT NULL
             );

             CREATE TABLE IF NOT EXISTS refresh_tokens (
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                device_id TEXT NOT NULL REFERENCES devices(id),
                expires_at INTEGER NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0
             );

             -- Short-TTL bearer tokens, spec §4.I \"access token short TTL\".
             -- Unlike refresh_tokens these are not single-use; they just expire.
             CREATE TABLE IF NOT EXISTS access_tokens (
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                device_id TEXT NOT NULL REFERENCES devices(id),
                expires_at INTEGER NOT NULL
             );

             CREATE TABLE IF NOT EXISTS vault_items (
                user_id TEXT NOT NULL REFERENCES users(id),
                item_id TEXT NOT NULL,
                label TEXT,
                url TEXT,
                category TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                ciphertext TEXT,
                iv TEXT,
                auth_tag TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, item_id)
             );

             CREATE TABLE IF NOT EXISTS sync_changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL REFERENCES users(id),
                item_id TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_changes_user_seq ON sync_changes(user_id, seq);

             CREATE TABLE IF NOT EXISTS key_envelopes (
                user_id TEXT PRIMARY KEY REFERENCES users(id),
                key_version INTEGER NOT NULL,
                kdf TEXT NOT NULL,
                kdf_params TEXT NOT NULL,
                salt TEXT NOT NULL,
                nonce TEXT NOT NULL,
                ciphertext TEXT NOT NULL,
                auth_tag TEXT NOT NULL
             );",
        )?;
        Ok(())
    }

    // -- accounts -----------------------------------------------------

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<(), ServerError> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM users WHERE username=?1", params![username], |r| r.get(0))
            .optional()?;
        if exists.is_some() {
            return Err(ServerError::UsernameTaken);
        }
        conn.execute(
            "INSERT INTO users (id, username, password_hash, mfa_secret, created_at) VALUES (?1,?2,?3,NULL,?4)",
            params![id, username, password_hash, now_ms()],
        )?;
        Ok(())
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, ServerError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, username, password_hash, mfa_secret FROM users WHERE username=?1",
                params![username],
                |r| {
                    Ok(UserRow {
                        id: r.get(0)?,
                        username: r.get(1)?,
                        password_hash: r.get(2)?,
                        mfa_secret: r.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn create_device(&self, id: &str, user_id: &str, device_name: &str) -> Result<(), ServerError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO devices (id, user_id, device_name, created_at) VALUES (?1,?2,?3,?4)",
            params![id, user_id, device_name, now_ms()],
        )?;
        Ok(())
    }

    // -- refresh tokens -------------------------------------------------

    /// Issues a fresh refresh token row and revokes `previous_hash` (if
    /// any) in the same transaction, spec §4.I single-use rotation.
    pub fn rotate_refresh_token(
        &self,
        new_hash: &str,
        user_id: &str,
        device_id: &str,
        expires_at: i64,
        previous_hash: Option<&str>,
    ) -> Result<(), ServerError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        if let Some(prev) = previous_hash {
            tx.execute("UPDATE refresh_tokens SET revoked=1 WHERE token_hash=?1", params![prev])?;
        }
        tx.execute(
            "INSERT INTO refresh_tokens (token_hash, user_id, device_id, expires_at, revoked)
             VALUES (?1,?2,?3,?4,0)",
            params![new_hash, user_id, device_id, expires_at],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRow>, ServerError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT token_hash, user_id, device_id, expires_at, revoked FROM refresh_tokens WHERE token_hash=?1",
                params![token_hash],
                |r| {
                    Ok(RefreshTokenRow {
                        token_hash: r.get(0)?,
                        user_id: r.get(1)?,
                        device_id: r.get(2)?,
                        expires_at: r.get(3)?,
                        revoked: r.get::<_, i64>(4)? != 0,
                    })
                },
            )
            .optional()?)
    }

    pub fn revoke_refresh_token(&self, token_hash: &str) -> Result<(), ServerError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE refresh_tokens SET revoked=1 WHERE token_hash=?1", params![token_hash])?;
        Ok(())
    }

    pub fn create_access_token(&self, token_hash: &str, user_id: &str, device_id: &str, expires_at: i64) -> Result<(), ServerError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO access_tokens (token_hash, user_id, device_id, expires_at) VALUES (?1,?2,?3,?4)",
            params![token_hash, user_id, device_id, expires_at],
        )?;
        Ok(())
    }

    /// Returns the owning `user_id` iff the token exists and has not
    /// expired.
    pub fn check_access_token(&self, token_hash: &str) -> Result<Option<String>, ServerError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT user_id, expires_at FROM access_tokens WHERE token_hash=?1",
                params![token_hash],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((user_id, expires_at)) if expires_at > now_ms() => Some(user_id),
            _ => None,
        })
    }

    pub fn revoke_access_tokens_for_device(&self, device_id: &str) -> Result<(), ServerError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM access_tokens WHERE device_id=?1", params![device_id])?;
        Ok(())
    }

    // -- sync -----------------------------------------------------------

    /// Upserts into `vault_items` guarded by `updated_at <
    /// EXCLUDED.updated_at`; appends a `sync_changes` row in the same
    /// transaction iff the upsert actually applied. Returns `true` if
    /// applied, `false` if skipped as stale/duplicate.
    pub fn apply_change(&self, user_id: &str, item: &WireChange) -> Result<bool, ServerError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let item_id = item.item_id.to_string();
        let created_at = item.created_at.unwrap_or(item.updated_at);

        let changed = tx.execute(
            "INSERT INTO vault_items (user_id, item_id, label, url, category, created_at, updated_at,
                ciphertext, iv, auth_tag, deleted)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT(user_id, item_id) DO UPDATE SET
                label=excluded.label, url=excluded.url, category=excluded.category,
                updated_at=excluded.updated_at, ciphertext=excluded.ciphertext,
                iv=excluded.iv, auth_tag=excluded.auth_tag, deleted=excluded.deleted
             WHERE vault_items.updated_at < excluded.updated_at",
            params![
                user_id,
                item_id,
                item.label,
                item.url,
                item.category,
                created_at,
                item.updated_at,
                item.ciphertext,
                item.iv,
                item.auth_tag,
                item.deleted as i64,
            ],
        )?;

        if changed == 0 {
            tx.commit()?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO sync_changes (user_id, item_id, updated_at, deleted) VALUES (?1,?2,?3,?4)",
            params![user_id, item_id, item.updated_at, item.deleted as i64],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn current_cursor(&self, user_id: &str) -> Result<i64, ServerError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM sync_changes WHERE user_id=?1",
            params![user_id],
            |r| r.get(0),
        )?)
    }

    /// Changes with `seq > cursor`, ordered ascending, joined to the
    /// current `vault_items` row, capped at `limit`.
    pub fn changes_since(&self, user_id: &str, cursor: i64, limit: i64) -> Result<Vec<ChangeRow>, ServerError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.seq, c.item_id, c.updated_at, c.deleted,
                    v.label, v.url, v.category, v.created_at, v.ciphertext, v.iv, v.auth_tag
             FROM sync_changes c
             JOIN vault_items v ON v.user_id = c.user_id AND v.item_id = c.item_id
             WHERE c.user_id = ?1 AND c.seq > ?2
             ORDER BY c.seq ASC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![user_id, cursor, limit], |r| {
                let item_id_str: String = r.get(1)?;
                let item_id = Uuid::parse_str(&item_id_str).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                })?;
                Ok(ChangeRow {
                    seq: r.get(0)?,
                    item: WireChange {
                        item_id,
                        updated_at: r.get(2)?,
                        deleted: r.get::<_, i64>(3)? != 0,
                        label: r.get(4)?,
                        url: r.get(5)?,
                        category: r.get(6)?,
                        created_at: r.get(7)?,
                        ciphertext: r.get(8)?,
                        iv: r.get(9)?,
                        auth_tag: r.get(10)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -- key envelope -----------------------------------------------------

    pub fn get_envelope(&self, user_id: &str) -> Result<Option<EnvelopeRow>, ServerError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT key_version, kdf, kdf_params, salt, nonce, ciphertext, auth_tag
                 FROM key_envelopes WHERE user_id=?1",
                params![user_id],
                |r| {
                    let kdf_params_str: String = r.get(2)?;
                    Ok(EnvelopeRow {
                        key_version: r.get(0)?,
                        kdf: r.get(1)?,
                        kdf_params: serde_json::from_str(&kdf_params_str).unwrap_or(serde_json::Value::Null),
                        salt: r.get(3)?,
                        nonce: r.get(4)?,
                        ciphertext: r.get(5)?,
                        auth_tag: r.get(6)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn put_envelope(&self, user_id: &str, envelope: &EnvelopeRow) -> Result<(), ServerError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO key_envelopes (user_id, key_version, kdf, kdf_params, salt, nonce, ciphertext, auth_tag)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
             ON CONFLICT(user_id) DO UPDATE SET
                key_version=excluded.key_version, kdf=excluded.kdf, kdf_params=excluded.kdf_params,
                salt=excluded.salt, nonce=excluded.nonce, ciphertext=excluded.ciphertext, auth_tag=excluded.auth_tag",
            params![
                user_id,
                envelope.key_version,
                envelope.kdf,
                envelope.kdf_params.to_string(),
                envelope.salt,
                envelope.nonce,
                envelope.ciphertext,
                envelope.auth_tag,
            ],
        )?;
        Ok(())
    }
}
