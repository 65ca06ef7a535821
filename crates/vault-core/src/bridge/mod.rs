//! Bridge Server, spec §4.G / §6 — a narrow NDJSON API for browser
//! extensions and other local clients to ask for credentials without
//! touching the local store directly.

mod domain;
mod server;

pub use domain::domain_matches;
#[cfg(unix)]
pub use server::default_socket_path;
#[cfg(windows)]
pub use server::default_pipe_name;
pub use server::serve;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One line of request.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BridgeRequest {
    Ping { id: String },
    ListForDomain { id: String, domain: String },
    GetCredentials {
        id: String,
        #[serde(rename = "entryId")]
        entry_id: Uuid,
        domain: String,
    },
}

impl BridgeRequest {
    pub fn request_id(&self) -> &str {
        match self {
            BridgeRequest::Ping { id } => id,
            BridgeRequest::ListForDomain { id, .. } => id,
            BridgeRequest::GetCredentials { id, .. } => id,
        }
    }
}

/// One line of response. `error` is always `{id, error}`, mutually
/// exclusive with every success shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BridgeResponse {
    Pong { id: String, pong: bool },
    Entries { id: String, entries: Vec<BridgeEntryRef> },
    Credentials { id: String, username: String, password: String },
    Error { id: String, error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeEntryRef {
    pub id: Uuid,
    pub label: String,
    pub url: String,
}
