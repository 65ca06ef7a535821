//! `SyncClient`, spec §4.H.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::store::sync_state::{
    KEY_LAST_SYNC_AT, KEY_LAST_SYNC_ATTEMPT_AT, KEY_LAST_SYNC_ERROR,
};
use crate::store::{now_ms, LocalStore};

use super::wire::{PullResponse, PushRequest, PushResponse, WireChange};

/// Session credentials obtained from `register`/`login`, spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    #[serde(rename = "refreshExpiresAt")]
    pub refresh_expires_at: i64,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

/// Encrypted-at-rest storage for the session, spec §4.H ("persisted
/// encrypted-at-rest via the OS keychain interface"). The real OS
/// keychain is an external collaborator (spec §1 Non-goals); this trait
/// is the seam, with a process-memory fake used in tests.
#[async_trait]
pub trait Keyring: Send + Sync {
    async fn load_session(&self) -> Option<Session>;
    async fn save_session(&self, session: &Session);
    async fn clear_session(&self);
}

pub struct InMemoryKeyring {
    slot: Mutex<Option<Session>>,
}

impl Default for InMemoryKeyring {
    fn default() -> Self {
        InMemoryKeyring { slot: Mutex::new(None) }
    }
}

#[async_trait]
impl Keyring for InMemoryKeyring {
    async fn load_session(&self) -> Option<Session> {
        self.slot.lock().await.clone()
    }

    async fn save_session(&self, session: &Session) {
        *self.slot.lock().await = Some(session.clone());
    }

    async fn clear_session(&self) {
        *self.slot.lock().await = None;
    }
}

pub struct SyncClient {
    http: reqwest::Client,
    store: Arc<LocalStore>,
    keyring: Arc<dyn Keyring>,
    config: Mutex<SyncConfig>,
    // `runFullSync`'s singleton in-flight guard (spec §4.H, §5).
    full_sync_lock: Mutex<()>,
}

impl SyncClient {
    pub fn new(store: Arc<LocalStore>, keyring: Arc<dyn Keyring>, config: SyncConfig) -> Self {
        SyncClient {
            http: reqwest::Client::new(),
            store,
            keyring,
            config: Mutex::new(config),
            full_sync_lock: Mutex::new(()),
        }
    }

    pub async fn set_config(&self, config: SyncConfig) {
        *self.config.lock().await = config;
    }

    async fn base_url(&self) -> String {
        self.config.lock().await.base_url.clone()
    }

    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str, device_name: &str) -> Result<Session, SyncError> {
        let base = self.base_url().await;
        let resp = self
            .http
            .post(format!("{base}/v1/auth/register"))
            .json(&json!({ "username": username, "password": password, "deviceName": device_name }))
            .send()
            .await?;
        let session = parse_session(resp).await?;
        self.keyring.save_session(&session).await;
        Ok(session)
    }

    #[instrument(skip(self, password, mfa_code))]
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        device_name: &str,
        mfa_code: Option<&str>,
    ) -> Result<Session, SyncError> {
        let base = self.base_url().await;
        let mut body = json!({ "username": username, "password": password, "deviceName": device_name });
        if let Some(code) = mfa_code {
            body["mfaCode"] = json!(code);
        }
        let resp = self.http.post(format!("{base}/v1/auth/login")).json(&body).send().await?;
        let session = match resp.status().as_u16() {
            401 => return Err(classify_401(resp).await),
            _ => parse_session(resp).await?,
        };
        self.keyring.save_session(&session).await;
        Ok(session)
    }

    async fn refresh(&self, session: &Session) -> Result<Session, SyncError> {
        let base = self.base_url().await;
        let resp = self
            .http
            .post(format!("{base}/v1/auth/refresh"))
            .json(&json!({ "refreshToken": session.refresh_token }))
            .send()
            .await?;
        if resp.status().as_u16() == 401 {
            self.keyring.clear_session().await;
            return Err(SyncError::AuthExpired);
        }
        let fresh = parse_session(resp).await?;
        self.keyring.save_session(&fresh).await;
        Ok(fresh)
    }

    pub async fn logout(&self) -> Result<(), SyncError> {
        if let Some(session) = self.keyring.load_session().await {
            let base = self.base_url().await;
            let _ = self
                .http
                .post(format!("{base}/v1/auth/logout"))
                .bearer_auth(&session.access_token)
                .send()
                .await;
        }
        self.keyring.clear_session().await;
        Ok(())
    }

    /// Runs `request` with the current session's access token; on a 401
    /// response, refreshes once and retries; a second 401 surfaces.
    async fn authenticated<F, Fut>(&self, request: F) -> Result<reqwest::Response, SyncError>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut session = self.keyring.load_session().await.ok_or(SyncError::AuthExpired)?;
        let resp = request(session.access_token.clone()).await?;
        if resp.status().as_u16() != 401 {
            return Ok(resp);
        }

        session = self.refresh(&session).await?;
        let retried = request(session.access_token.clone()).await?;
        if retried.status().as_u16() == 401 {
            self.keyring.clear_session().await;
            return Err(SyncError::AuthExpired);
        }
        Ok(retried)
    }

    /// Reads up to `limit` outbox rows and sends them in one request.
    /// Stale ids (the row vanished, which shouldn't normally happen
    /// since deletes tombstone rather than remove) are skipped and
    /// dropped from the outbox rather than blocking the batch.
    #[instrument(skip(self))]
    pub async fn push(&self, limit: i64) -> Result<PushResponse, SyncError> {
        self.store.seed_outbox_from_entries()?;

        let pending = self.store.outbox_pending(limit)?;
        let mut changes = Vec::with_capacity(pending.len());
        let mut sent_ids = Vec::with_capacity(pending.len());

        for change in &pending {
            if change.deleted {
                changes.push(WireChange {
                    item_id: change.id,
                    label: None,
                    url: None,
                    category: None,
                    created_at: None,
                    updated_at: change.updated_at,
                    ciphertext: None,
                    iv: None,
                    auth_tag: None,
                    deleted: true,
                });
                sent_ids.push((change.id, change.updated_at));
                continue;
            }

            let row = match self.store.get_entry_row(change.id) {
                Ok(row) => row,
                Err(_) => {
                    self.store.outbox_remove_if_unchanged(change.id, change.updated_at)?;
                    continue;
                }
            };
            let Some(enc) = row.encrypted() else {
                self.store.outbox_remove_if_unchanged(change.id, change.updated_at)?;
                continue;
            };

            changes.push(WireChange {
                item_id: row.id,
                label: Some(row.label),
                url: Some(row.url),
                category: Some(row.category),
                created_at: Some(row.created_at),
                updated_at: row.updated_at,
                ciphertext: Some(base64::engine::general_purpose::STANDARD.encode(&enc.ciphertext)),
                iv: Some(base64::engine::general_purpose::STANDARD.encode(enc.iv)),
                auth_tag: Some(base64::engine::general_purpose::STANDARD.encode(enc.auth_tag)),
                deleted: false,
            });
            sent_ids.push((change.id, change.updated_at));
        }

        if changes.is_empty() {
            return Ok(PushResponse { applied: vec![], skipped: vec![], cursor: self.store.get_cursor()? });
        }

        let base = self.base_url().await;
        let http = self.http.clone();
        let body = serde_json::to_value(&PushRequest { changes }).expect("PushRequest always serializes");
        let resp = self
            .authenticated(|token| {
                let http = http.clone();
                let base = base.clone();
                let body = body.clone();
                async move { http.post(format!("{base}/v1/sync/push")).bearer_auth(token).json(&body).send().await }
            })
            .await?;

        let parsed: PushResponse = parse_json(resp).await?;

        for (id, updated_at) in sent_ids {
            self.store.outbox_remove_if_unchanged(id, updated_at)?;
        }
        let new_cursor = self.store.get_cursor()?.max(parsed.cursor);
        self.store.set_cursor(new_cursor)?;

        Ok(parsed)
    }

    /// Pulls changes since the local cursor and applies them, looping
    /// while `hasMore` is set.
    #[instrument(skip(self))]
    pub async fn pull(&self, limit: i64) -> Result<(), SyncError> {
        loop {
            let cursor = self.store.get_cursor()?;
            let base = self.base_url().await;
            let http = self.http.clone();
            let resp = self
                .authenticated(|token| {
                    let http = http.clone();
                    let url = format!("{base}/v1/sync/pull?cursor={cursor}&limit={limit}");
                    async move { http.get(url).bearer_auth(token).send().await }
                })
                .await?;
            let parsed: PullResponse = parse_json(resp).await?;

            for change in &parsed.changes {
                if change.deleted {
                    self.store.apply_remote_delete(change.item_id, change.updated_at)?;
                    continue;
                }
                let Some(entry) = wire_change_to_entry(change) else {
                    warn!(item_id = %change.item_id, "skipping malformed remote upsert");
                    continue;
                };
                self.store.apply_remote_upsert(&entry)?;
            }

            if parsed.next_cursor > cursor {
                self.store.set_cursor(parsed.next_cursor)?;
            }
            if !parsed.has_more {
                break;
            }
        }
        Ok(())
    }

    /// Singleton-guarded push-then-pull; concurrent callers block on the
    /// same lock rather than running overlapping syncs.
    #[instrument(skip(self))]
    pub async fn run_full_sync(&self) -> Result<(), SyncError> {
        let _guard = self.full_sync_lock.lock().await;

        self.store.set_sync_state(KEY_LAST_SYNC_ATTEMPT_AT, &now_ms().to_string())?;

        let result = async {
            self.push(500).await?;
            self.pull(500).await?;
            Ok::<(), SyncError>(())
        }
        .await;

        match &result {
            Ok(()) => {
                self.store.set_sync_state(KEY_LAST_SYNC_AT, &now_ms().to_string())?;
                self.store.clear_sync_state(KEY_LAST_SYNC_ERROR)?;
                info!("full sync completed");
            }
            Err(e) => {
                self.store.set_sync_state(KEY_LAST_SYNC_ERROR, &e.to_string())?;
            }
        }
        result
    }
}

fn wire_change_to_entry(change: &WireChange) -> Option<crate::store::Entry> {
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(change.ciphertext.as_ref()?)
        .ok()?;
    let iv: [u8; 12] = base64::engine::general_purpose::STANDARD
        .decode(change.iv.as_ref()?)
        .ok()?
        .try_into()
        .ok()?;
    let auth_tag: [u8; 16] = base64::engine::general_purpose::STANDARD
        .decode(change.auth_tag.as_ref()?)
        .ok()?
        .try_into()
        .ok()?;

    Some(crate::store::Entry {
        id: change.item_id,
        label: change.label.clone()?,
        url: change.url.clone()?,
        category: change.category.clone().unwrap_or_default(),
        created_at: change.created_at.unwrap_or(change.updated_at),
        updated_at: change.updated_at,
        ciphertext: Some(ciphertext),
        iv: Some(iv),
        auth_tag: Some(auth_tag),
        deleted: false,
    })
}

async fn parse_session(resp: reqwest::Response) -> Result<Session, SyncError> {
    if !resp.status().is_success() {
        return Err(SyncError::Server(resp.text().await.unwrap_or_default()));
    }
    Ok(resp.json().await?)
}

async fn parse_json<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T, SyncError> {
    if !resp.status().is_success() {
        return Err(SyncError::Server(resp.text().await.unwrap_or_default()));
    }
    Ok(resp.json().await?)
}

async fn classify_401(resp: reqwest::Response) -> SyncError {
    #[derive(Deserialize)]
    struct MfaBody {
        #[serde(default)]
        code: Option<String>,
    }
    let body: MfaBody = resp.json().await.unwrap_or(MfaBody { code: None });
    match body.code.as_deref() {
        Some("MFA_REQUIRED") => SyncError::MfaRequired,
        Some("INVALID_MFA_CODE") => SyncError::InvalidMfaCode,
        _ => SyncError::AuthExpired,
    }
}
