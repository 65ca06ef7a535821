//! In-process sync server loopback tests, spec §8: cursor monotonicity
//! and the register/login/push/pull lifecycle.

use std::sync::Arc;

use vault_server::db::ServerStore;
use vault_server::router::{self, AppState};

/// Spawns a server on an ephemeral port and returns its base URL.
/// The worker thread is detached; the process test harness tears it
/// down at exit.
fn spawn_server() -> String {
    let store = ServerStore::open_in_memory().unwrap();
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let base_url = format!("http://{addr}");

    let server = Arc::new(server);
    let state = Arc::new(AppState { store });
    std::thread::spawn(move || loop {
        match server.recv() {
            Ok(request) => router::handle(&state, request),
            Err(_) => break,
        }
    });
    base_url
}

fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::new()
}

#[test]
fn register_then_login_round_trips() {
    let base = spawn_server();

    let resp: serde_json::Value = client()
        .post(format!("{base}/v1/auth/register"))
        .json(&serde_json::json!({ "username": "alice", "password": "hunter2", "deviceName": "laptop" }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert!(resp["accessToken"].is_string());
    assert!(resp["refreshToken"].is_string());

    let login: serde_json::Value = client()
        .post(format!("{base}/v1/auth/login"))
        .json(&serde_json::json!({ "username": "alice", "password": "hunter2", "deviceName": "laptop" }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert!(login["accessToken"].is_string());

    let wrong = client()
        .post(format!("{base}/v1/auth/login"))
        .json(&serde_json::json!({ "username": "alice", "password": "wrong", "deviceName": "laptop" }))
        .send()
        .unwrap();
    assert_eq!(wrong.status().as_u16(), 401);
}

#[test]
fn push_then_pull_and_cursor_never_decreases() {
    let base = spawn_server();

    let session: serde_json::Value = client()
        .post(format!("{base}/v1/auth/register"))
        .json(&serde_json::json!({ "username": "bob", "password": "hunter2", "deviceName": "phone" }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    let token = session["accessToken"].as_str().unwrap();

    let push_body = serde_json::json!({
        "changes": [{
            "itemId": "11111111-1111-1111-1111-111111111111",
            "label": "GitHub",
            "url": "https://github.com",
            "category": "dev",
            "createdAt": 100,
            "updatedAt": 100,
            "ciphertext": "Y2lwaGVy",
            "iv": "aXY=",
            "authTag": "dGFn",
            "deleted": false,
        }]
    });
    let push_resp: serde_json::Value = client()
        .post(format!("{base}/v1/sync/push"))
        .bearer_auth(token)
        .json(&push_body)
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(push_resp["applied"].as_array().unwrap().len(), 1);
    let cursor_after_push = push_resp["cursor"].as_i64().unwrap();
    assert!(cursor_after_push >= 1);

    let pull_resp: serde_json::Value = client()
        .get(format!("{base}/v1/sync/pull?cursor=0&limit=10"))
        .bearer_auth(token)
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(pull_resp["changes"].as_array().unwrap().len(), 1);
    assert_eq!(pull_resp["nextCursor"].as_i64().unwrap(), cursor_after_push);
    assert!(!pull_resp["hasMore"].as_bool().unwrap());

    // A second push of a stale copy of the same item must be skipped,
    // and the cursor must not move backward.
    let mut stale_body = push_body.clone();
    stale_body["changes"][0]["updatedAt"] = serde_json::json!(50);
    let stale_resp: serde_json::Value = client()
        .post(format!("{base}/v1/sync/push"))
        .bearer_auth(token)
        .json(&stale_body)
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert!(stale_resp["applied"].as_array().unwrap().is_empty());
    assert_eq!(stale_resp["skipped"].as_array().unwrap().len(), 1);
    assert_eq!(stale_resp["cursor"].as_i64().unwrap(), cursor_after_push);
}

#[test]
fn unauthenticated_requests_are_rejected() {
    let base = spawn_server();
    let resp = client().get(format!("{base}/v1/sync/pull?cursor=0&limit=10")).send().unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}
