//! Wire shapes for the Sync HTTP API, spec §6.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One change as sent to `push` or received from `pull`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireChange {
    #[serde(rename = "itemId")]
    pub item_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub category: Option<String>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none", default)]
    pub created_at: Option<i64>,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ciphertext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub iv: Option<String>,
    #[serde(rename = "authTag", skip_serializing_if = "Option::is_none", default)]
    pub auth_tag: Option<String>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushRequest {
    pub changes: Vec<WireChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkippedChange {
    #[serde(rename = "itemId")]
    pub item_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushResponse {
    pub applied: Vec<Uuid>,
    pub skipped: Vec<SkippedChange>,
    pub cursor: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullResponse {
    pub cursor: i64,
    #[serde(rename = "nextCursor")]
    pub next_cursor: i64,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    pub changes: Vec<WireChange>,
}
