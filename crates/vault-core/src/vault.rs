//! Vault API, spec §4.F — the card-gated facade over the local store.
//!
//! Every operation that touches plaintext routes through the
//! [`CardGatedExecutor`]; metadata-only operations (`list_entries`,
//! `export` of metadata) never require a card tap.

use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::card::CardProtocol;
use crate::crypto::{decrypt_entry, encrypt_entry, EntryPayload};
use crate::error::{StoreError, VaultError};
use crate::executor::CardGatedExecutor;
use crate::store::{now_ms, Entry, EntryMeta, LocalStore};

/// A decrypted entry as handed back to a caller after a successful
/// card-gated read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEntry {
    pub meta: EntryMeta,
    pub payload: EntryPayload,
}

const BACKUP_VERSION: u32 = 1;

/// Vault JSON backup (v1), spec §6: `{version, appVersion, exportedAt,
/// entries:[...]}`, ciphertext/iv/authTag base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultBackup {
    pub version: u32,
    #[serde(rename = "appVersion")]
    pub app_version: String,
    #[serde(rename = "exportedAt")]
    pub exported_at: i64,
    pub entries: Vec<BackupEntry>,
}

/// One backup row. Fields are optional/defaulted on the way in so a
/// malformed row can be skipped individually during import rather than
/// failing JSON parsing for the whole file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub id: Option<Uuid>,
    pub label: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub category: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: i64,
    #[serde(default)]
    pub ciphertext: String,
    #[serde(default)]
    pub iv: String,
    #[serde(rename = "authTag", default)]
    pub auth_tag: String,
}

pub struct Vault<D: CardProtocol> {
    store: Arc<LocalStore>,
    executor: Arc<CardGatedExecutor<D>>,
}

impl<D: CardProtocol> Vault<D> {
    pub fn new(store: Arc<LocalStore>, executor: Arc<CardGatedExecutor<D>>) -> Self {
        Vault { store, executor }
    }

    /// Metadata-only listing; no card required.
    pub fn list_entries(&self, limit: i64, offset: i64, query: Option<&str>) -> Result<Vec<EntryMeta>, VaultError> {
        Ok(self.store.list_entries(limit, offset, query)?)
    }

    /// Card-gated decrypt of a single entry.
    #[instrument(skip(self), fields(entry_id = %id))]
    pub async fn get_entry(&self, id: Uuid) -> Result<VaultEntry, VaultError> {
        let row = lookup_row(&self.store, id)?;
        if row.deleted {
            return Err(VaultError::NotFound);
        }
        let encrypted = row.encrypted().ok_or(VaultError::NotFound)?;

        let payload = self
            .executor
            .with_entry_key(id, move |entry_key| decrypt_entry(entry_key, &encrypted))
            .await?
            .map_err(VaultError::from)?;

        Ok(VaultEntry { meta: row.meta(), payload })
    }

    /// Pre-allocates the entry id before the card tap (spec §4.D note:
    /// entry key derivation binds the id, so the id must exist first).
    #[instrument(skip(self, payload))]
    pub async fn create_entry(
        &self,
        label: &str,
        url: &str,
        category: &str,
        payload: EntryPayload,
    ) -> Result<EntryMeta, VaultError> {
        let id = Uuid::new_v4();

        let encrypted = self
            .executor
            .with_entry_key(id, move |entry_key| encrypt_entry(entry_key, &payload))
            .await?
            .map_err(VaultError::from)?;

        let row = self.store.insert_entry(id, label, url, category, &encrypted)?;
        Ok(row.meta())
    }

    #[instrument(skip(self, payload))]
    pub async fn update_entry(
        &self,
        id: Uuid,
        label: &str,
        url: &str,
        category: &str,
        payload: EntryPayload,
    ) -> Result<EntryMeta, VaultError> {
        let existing = lookup_row(&self.store, id)?;
        if existing.deleted {
            return Err(VaultError::NotFound);
        }

        let encrypted = self
            .executor
            .with_entry_key(id, move |entry_key| encrypt_entry(entry_key, &payload))
            .await?
            .map_err(VaultError::from)?;

        let row = self.store.update_entry(id, label, url, category, &encrypted)?;
        Ok(row.meta())
    }

    /// Tombstones the entry; no card tap required.
    pub fn delete_entry(&self, id: Uuid) -> Result<(), VaultError> {
        if !self.store.delete_entry(id)? {
            return Err(VaultError::NotFound);
        }
        Ok(())
    }

    /// Reads every live row to a JSON v1 backup; no card tap and no
    /// decryption — the ciphertext is carried opaque, base64-encoded.
    pub fn export(&self) -> Result<VaultBackup, VaultError> {
        let rows = self.store.export_all()?;
        let entries = rows
            .into_iter()
            .filter_map(|row| {
                let enc = row.encrypted()?;
                Some(BackupEntry {
                    id: Some(row.id),
                    label: Some(row.label),
                    url: row.url,
                    category: row.category,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                    ciphertext: base64::engine::general_purpose::STANDARD.encode(enc.ciphertext),
                    iv: base64::engine::general_purpose::STANDARD.encode(enc.iv),
                    auth_tag: base64::engine::general_purpose::STANDARD.encode(enc.auth_tag),
                })
            })
            .collect();

        Ok(VaultBackup {
            version: BACKUP_VERSION,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: now_ms(),
            entries,
        })
    }

    /// Bulk-inserts a JSON v1 backup; no card tap. Rejects unknown
    /// versions outright; skips rows missing `id`/`label`/`ciphertext`
    /// or carrying a malformed `iv`/`authTag`, then defers to
    /// `LocalStore::import_entries` for the id-preserving, skip-on-
    /// duplicate bulk insert.
    pub fn import(&self, backup: &VaultBackup) -> Result<usize, VaultError> {
        if backup.version != BACKUP_VERSION {
            return Err(VaultError::UnsupportedBackupVersion(backup.version));
        }

        let rows: Vec<Entry> = backup
            .entries
            .iter()
            .filter_map(|e| backup_entry_to_row(e))
            .collect();

        Ok(self.store.import_entries(&rows)?)
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn raw_row(&self, id: Uuid) -> Result<Entry, VaultError> {
        Ok(self.store.get_entry_row(id)?)
    }
}

/// Looks up a row, mapping a never-existed id to the top-level
/// `VaultError::NotFound` spec.md:346 calls for, instead of the nested
/// `VaultError::Store(StoreError::NotFound(_))` a bare `?` would produce.
fn lookup_row(store: &LocalStore, id: Uuid) -> Result<Entry, VaultError> {
    store.get_entry_row(id).map_err(|e| match e {
        StoreError::NotFound(_) => VaultError::NotFound,
        other => VaultError::from(other),
    })
}

/// Validates and base64-decodes one backup row. Returns `None` (skip,
/// not fail the whole import) on a missing id/label, empty ciphertext,
/// or a malformed iv/authTag length.
fn backup_entry_to_row(e: &BackupEntry) -> Option<Entry> {
    let id = e.id?;
    let label = e.label.clone()?;
    if e.ciphertext.is_empty() {
        return None;
    }
    let ciphertext = base64::engine::general_purpose::STANDARD.decode(&e.ciphertext).ok()?;
    let iv: [u8; 12] = base64::engine::general_purpose::STANDARD
        .decode(&e.iv)
        .ok()?
        .try_into()
        .ok()?;
    let auth_tag: [u8; 16] = base64::engine::general_purpose::STANDARD
        .decode(&e.auth_tag)
        .ok()?
        .try_into()
        .ok()?;

    Some(Entry {
        id,
        label,
        url: e.url.clone(),
        category: e.category.clone(),
        created_at: e.created_at,
        updated_at: e.updated_at,
        ciphertext: Some(ciphertext),
        iv: Some(iv),
        auth_tag: Some(auth_tag),
        deleted: false,
    })
}
