//! NDJSON listener, spec §4.G / §6.
//!
//! One line in, one line out. Only one `get_credentials` card wait can
//! be outstanding at a time — that's enforced by the Card-Gated
//! Executor itself (§4.D), not by anything in this module.
//!
//! The endpoint is a UNIX domain socket on unix and a named pipe on
//! Windows; `handle_connection`/`dispatch` are shared by both since
//! they only need an `AsyncRead + AsyncWrite` byte stream.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::card::CardProtocol;
use crate::vault::Vault;

use super::{domain_matches, BridgeEntryRef, BridgeRequest, BridgeResponse};

#[cfg(unix)]
pub use unix::{default_socket_path, serve};

#[cfg(windows)]
pub use windows::{default_pipe_name, serve};

#[cfg(unix)]
mod unix {
    use std::path::PathBuf;
    use std::sync::Arc;

    use tokio::net::UnixListener;
    use tracing::info;

    use crate::card::CardProtocol;
    use crate::vault::Vault;

    use super::handle_connection;

    pub fn default_socket_path(app_name: &str) -> PathBuf {
        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        runtime_dir.join(format!("{app_name}.sock"))
    }

    /// Binds `socket_path` and serves connections until the process exits.
    /// Removes a stale socket file left behind by a prior crashed run before
    /// binding.
    pub async fn serve<D: CardProtocol + 'static>(
        socket_path: PathBuf,
        vault: Arc<Vault<D>>,
    ) -> std::io::Result<()> {
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        let listener = UnixListener::bind(&socket_path)?;

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;

        info!(path = %socket_path.display(), "bridge server listening");

        loop {
            let (stream, _addr) = listener.accept().await?;
            let vault = vault.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, vault).await {
                    tracing::warn!(error = %e, "bridge connection ended with an error");
                }
            });
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::sync::Arc;

    use tokio::net::windows::named_pipe::ServerOptions;
    use tracing::info;

    use crate::card::CardProtocol;
    use crate::vault::Vault;

    use super::handle_connection;

    pub fn default_pipe_name(app_name: &str) -> String {
        format!(r"\\.\pipe\{app_name}")
    }

    /// Serves connections on `pipe_name` until the process exits. Each
    /// accepted connection hands off to its own task; a fresh pipe
    /// instance is created before the handoff so a new client can
    /// connect while the previous one is still being served.
    pub async fn serve<D: CardProtocol + 'static>(pipe_name: String, vault: Arc<Vault<D>>) -> std::io::Result<()> {
        let mut server = ServerOptions::new().first_pipe_instance(true).create(&pipe_name)?;
        info!(pipe = %pipe_name, "bridge server listening");

        loop {
            server.connect().await?;
            let connected = server;
            server = ServerOptions::new().create(&pipe_name)?;

            let vault = vault.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(connected, vault).await {
                    tracing::warn!(error = %e, "bridge connection ended with an error");
                }
            });
        }
    }
}

async fn handle_connection<D, S>(stream: S, vault: Arc<Vault<D>>) -> std::io::Result<()>
where
    D: CardProtocol,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatch(&line, &vault).await;
        let mut out = serde_json::to_vec(&response).unwrap_or_default();
        out.push(b'\n');
        write_half.write_all(&out).await?;
        write_half.flush().await?;
    }
    Ok(())
}

async fn dispatch<D: CardProtocol>(line: &str, vault: &Vault<D>) -> BridgeResponse {
    let request: BridgeRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(_) => {
            return BridgeResponse::Error {
                id: String::new(),
                error: "unrecognized request".to_string(),
            }
        }
    };

    let id = request.request_id().to_string();
    match request {
        BridgeRequest::Ping { .. } => BridgeResponse::Pong { id, pong: true },

        BridgeRequest::ListForDomain { domain, .. } => {
            let entries = match vault.list_entries(500, 0, None) {
                Ok(rows) => rows,
                Err(e) => return BridgeResponse::Error { id, error: e.to_string() },
            };
            let matched = entries
                .into_iter()
                .filter(|e| domain_matches(&e.url, &domain))
                .map(|e| BridgeEntryRef { id: e.id, label: e.label, url: e.url })
                .collect();
            BridgeResponse::Entries { id, entries: matched }
        }

        BridgeRequest::GetCredentials { entry_id, domain, .. } => {
            let meta_ok = match vault.list_entries(500, 0, None) {
                Ok(rows) => rows
                    .into_iter()
                    .any(|e| e.id == entry_id && domain_matches(&e.url, &domain)),
                Err(e) => return BridgeResponse::Error { id, error: e.to_string() },
            };
            if !meta_ok {
                return BridgeResponse::Error {
                    id,
                    error: "entry does not match the requested domain".to_string(),
                };
            }

            match vault.get_entry(entry_id).await {
                Ok(entry) => BridgeResponse::Credentials {
                    id,
                    username: entry.payload.username,
                    password: entry.payload.password,
                },
                Err(e) => BridgeResponse::Error { id, error: e.to_string() },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::mock::MockCardProtocol;
    use crate::card::CardUid;
    use crate::crypto::{derive_card_key, kdf::OP_READ_CARD_SECRET, EntryPayload, RootKey};
    use crate::executor::CardGatedExecutor;
    use crate::store::LocalStore;

    async fn fixture() -> Vault<MockCardProtocol> {
        let driver = Arc::new(MockCardProtocol::new());
        let rk = Arc::new(RootKey([4u8; 32]));
        let uid = CardUid(vec![1, 1, 1]);
        let read_key = derive_card_key(&rk, &uid.0, OP_READ_CARD_SECRET);
        driver.init(&uid, read_key.as_bytes()).await.unwrap();
        driver.tap(uid);

        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let executor = Arc::new(CardGatedExecutor::new(driver, rk));
        Vault::new(store, executor)
    }

    #[tokio::test]
    async fn ping_echoes_id() {
        let vault = fixture().await;
        let resp = dispatch(r#"{"id":"1","action":"ping"}"#, &vault).await;
        assert!(matches!(resp, BridgeResponse::Pong { id, pong: true } if id == "1"));
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let vault = fixture().await;
        let resp = dispatch(r#"{"id":"1","action":"reboot"}"#, &vault).await;
        assert!(matches!(resp, BridgeResponse::Error { .. }));
    }

    #[tokio::test]
    async fn get_credentials_for_mismatched_domain_is_refused() {
        let vault = fixture().await;
        vault
            .create_entry(
                "GitHub",
                "https://github.com",
                "dev",
                EntryPayload {
                    username: "alice".into(),
                    password: "hunter2".into(),
                    totp_secret: None,
                    notes: None,
                },
            )
            .await
            .unwrap();
        let entries = vault.list_entries(10, 0, None).unwrap();

        let req = format!(
            r#"{{"id":"2","action":"get_credentials","entryId":"{}","domain":"evil.example"}}"#,
            entries[0].id
        );
        let resp = dispatch(&req, &vault).await;
        assert!(matches!(resp, BridgeResponse::Error { .. }));
    }

    #[tokio::test]
    async fn get_credentials_for_matching_domain_returns_plaintext() {
        let vault = fixture().await;
        vault
            .create_entry(
                "GitHub",
                "https://github.com",
                "dev",
                EntryPayload {
                    username: "alice".into(),
                    password: "hunter2".into(),
                    totp_secret: None,
                    notes: None,
                },
            )
            .await
            .unwrap();
        let entries = vault.list_entries(10, 0, None).unwrap();

        let req = format!(
            r#"{{"id":"3","action":"get_credentials","entryId":"{}","domain":"github.com"}}"#,
            entries[0].id
        );
        let resp = dispatch(&req, &vault).await;
        match resp {
            BridgeResponse::Credentials { username, password, .. } => {
                assert_eq!(username, "alice");
                assert_eq!(password, "hunter2");
            }
            other => panic!("expected Credentials, got {other:?}"),
        }
    }
}
