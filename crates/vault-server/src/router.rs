//! Minimal method+path router over `tiny_http`, spec §4.I / §6.
//!
//! The spec treats the HTTP framework as an external, interface-only
//! concern, so this favors the smallest crate that gets out of the way
//! (the teacher's own choice for its LAN file server) over a full web
//! framework.

use std::io::Read;
use std::sync::Arc;

use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response};
use tracing::{error, info};

use vault_core::sync::WireChange;

use crate::auth;
use crate::db::{EnvelopeRow, ServerStore};
use crate::error::ServerError;

pub struct AppState {
    pub store: ServerStore,
}

fn json_header() -> Header {
    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap()
}

fn respond_json(request: Request, status: u16, body: &Value) {
    let data = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let response = Response::from_data(data).with_status_code(status).with_header(json_header());
    if let Err(e) = request.respond(response) {
        error!(error = %e, "failed to write response");
    }
}

fn respond_error(request: Request, err: ServerError) {
    let mut body = json!({ "error": err.to_string() });
    if let Some(code) = err.mfa_code() {
        body["mfaRequired"] = json!(true);
        body["code"] = json!(code);
    }
    let status = err.status_code();
    respond_json(request, status, &body);
}

fn read_body(request: &mut Request) -> Result<Value, ServerError> {
    let mut buf = String::new();
    request
        .as_reader()
        .read_to_string(&mut buf)
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;
    if buf.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&buf).map_err(|e| ServerError::BadRequest(e.to_string()))
}

fn query_param<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|kv| {
        let (k, v) = kv.split_once('=')?;
        (k == key).then_some(v)
    })
}

fn authenticate(state: &AppState, request: &Request) -> Result<String, ServerError> {
    let header = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str());
    let token = auth::extract_bearer(header)?;
    state
        .store
        .check_access_token(&auth::hash_token(token))?
        .ok_or(ServerError::Unauthenticated)
}

/// Handles one request to completion. Runs on its own thread per
/// connection, since `tiny_http` is a synchronous listener.
pub fn handle(state: &Arc<AppState>, mut request: Request) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("").to_string();

    let result = match (&method, path.as_str()) {
        (Method::Post, "/v1/auth/register") => handle_register(state, &mut request),
        (Method::Post, "/v1/auth/login") => handle_login(state, &mut request),
        (Method::Post, "/v1/auth/refresh") => handle_refresh(state, &mut request),
        (Method::Post, "/v1/auth/logout") => handle_logout(state, &mut request),
        (Method::Post, "/v1/sync/push") => handle_push(state, &mut request),
        (Method::Get, "/v1/sync/pull") => handle_pull(state, &request, &url),
        (Method::Get, "/v1/keys/envelope") => handle_get_envelope(state, &request),
        (Method::Put, "/v1/keys/envelope") => handle_put_envelope(state, &mut request),
        _ => Err(ServerError::NotFound),
    };

    match result {
        Ok(body) => {
            log_request(&method, &path, 200);
            respond_json(request, 200, &body);
        }
        Err(e) => {
            log_request(&method, &path, e.status_code());
            respond_error(request, e);
        }
    }
}

fn handle_register(state: &Arc<AppState>, request: &mut Request) -> Result<Value, ServerError> {
    let body = read_body(request)?;
    let username = body["username"].as_str().ok_or_else(|| ServerError::BadRequest("username".into()))?;
    let password = body["password"].as_str().ok_or_else(|| ServerError::BadRequest("password".into()))?;
    let device_name = body["deviceName"].as_str().unwrap_or("unnamed device");

    let user_id = uuid::Uuid::new_v4().to_string();
    let hash = auth::hash_password(password)?;
    state.store.create_user(&user_id, username, &hash)?;

    issue_session(state, &user_id, device_name, None)
}

fn handle_login(state: &Arc<AppState>, request: &mut Request) -> Result<Value, ServerError> {
    let body = read_body(request)?;
    let username = body["username"].as_str().ok_or_else(|| ServerError::BadRequest("username".into()))?;
    let password = body["password"].as_str().ok_or_else(|| ServerError::BadRequest("password".into()))?;
    let device_name = body["deviceName"].as_str().unwrap_or("unnamed device");

    let user = state.store.get_user_by_username(username)?.ok_or(ServerError::BadCredentials)?;
    if !auth::verify_password(password, &user.password_hash) {
        return Err(ServerError::BadCredentials);
    }

    if let Some(secret) = &user.mfa_secret {
        let provided = body["mfaCode"].as_str();
        match provided {
            None => return Err(ServerError::MfaRequired),
            Some(code) if code != secret => return Err(ServerError::InvalidMfaCode),
            Some(_) => {}
        }
    }

    issue_session(state, &user.id, device_name, None)
}

fn issue_session(
    state: &Arc<AppState>,
    user_id: &str,
    device_name: &str,
    existing_device_id: Option<&str>,
) -> Result<Value, ServerError> {
    let device_id = match existing_device_id {
        Some(id) => id.to_string(),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            state.store.create_device(&id, user_id, device_name)?;
            id
        }
    };

    let now = crate::db::now_ms();
    let access_token = auth::generate_token();
    let access_expiry = auth::access_token_expiry(now);
    state
        .store
        .create_access_token(&auth::hash_token(&access_token), user_id, &device_id, access_expiry)?;

    let refresh_token = auth::generate_token();
    let refresh_expiry = auth::refresh_token_expiry(now);
    state
        .store
        .rotate_refresh_token(&auth::hash_token(&refresh_token), user_id, &device_id, refresh_expiry, None)?;

    Ok(json!({
        "accessToken": access_token,
        "refreshToken": refresh_token,
        "refreshExpiresAt": refresh_expiry,
        "userId": user_id,
        "deviceId": device_id,
    }))
}

fn handle_refresh(state: &Arc<AppState>, request: &mut Request) -> Result<Value, ServerError> {
    let body = read_body(request)?;
    let refresh_token = body["refreshToken"].as_str().ok_or_else(|| ServerError::BadRequest("refreshToken".into()))?;
    let hash = auth::hash_token(refresh_token);

    let row = state.store.get_refresh_token(&hash)?.ok_or(ServerError::InvalidRefreshToken)?;
    if row.revoked || row.expires_at <= crate::db::now_ms() {
        return Err(ServerError::InvalidRefreshToken);
    }

    let now = crate::db::now_ms();
    let access_token = auth::generate_token();
    let access_expiry = auth::access_token_expiry(now);
    state
        .store
        .create_access_token(&auth::hash_token(&access_token), &row.user_id, &row.device_id, access_expiry)?;

    let new_refresh = auth::generate_token();
    let new_expiry = auth::refresh_token_expiry(now);
    state.store.rotate_refresh_token(
        &auth::hash_token(&new_refresh),
        &row.user_id,
        &row.device_id,
        new_expiry,
        Some(&hash),
    )?;

    Ok(json!({
        "accessToken": access_token,
        "refreshToken": new_refresh,
        "refreshExpiresAt": new_expiry,
        "userId": row.user_id,
        "deviceId": row.device_id,
    }))
}

fn handle_logout(state: &Arc<AppState>, request: &mut Request) -> Result<Value, ServerError> {
    let body = read_body(request)?;
    if let Some(refresh_token) = body["refreshToken"].as_str() {
        state.store.revoke_refresh_token(&auth::hash_token(refresh_token))?;
    }
    Ok(json!({ "ok": true }))
}

fn handle_push(state: &Arc<AppState>, request: &mut Request) -> Result<Value, ServerError> {
    let user_id = authenticate(state, request)?;
    let body = read_body(request)?;
    let changes: Vec<WireChange> = serde_json::from_value(body["changes"].clone())
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    let mut applied = vec![];
    let mut skipped = vec![];
    for change in &changes {
        if state.store.apply_change(&user_id, change)? {
            applied.push(change.item_id.clone());
        } else {
            skipped.push(json!({ "itemId": change.item_id, "reason": "stale_or_duplicate" }));
        }
    }

    Ok(json!({
        "applied": applied,
        "skipped": skipped,
        "cursor": state.store.current_cursor(&user_id)?,
    }))
}

fn handle_pull(state: &Arc<AppState>, request: &Request, url: &str) -> Result<Value, ServerError> {
    let user_id = authenticate(state, request)?;
    let cursor: i64 = query_param(url, "cursor").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: i64 = query_param(url, "limit").and_then(|v| v.parse().ok()).unwrap_or(500);

    let rows = state.store.changes_since(&user_id, cursor, limit)?;
    let next_cursor = rows.last().map(|r| r.seq).unwrap_or(cursor);
    let has_more = rows.len() as i64 == limit;

    Ok(json!({
        "cursor": cursor,
        "nextCursor": next_cursor,
        "hasMore": has_more,
        "changes": rows.into_iter().map(|r| serde_json::to_value(r.item).unwrap()).collect::<Vec<_>>(),
    }))
}

fn handle_get_envelope(state: &Arc<AppState>, request: &Request) -> Result<Value, ServerError> {
    let user_id = authenticate(state, request)?;
    let envelope = state.store.get_envelope(&user_id)?;
    Ok(json!({ "envelope": envelope }))
}

fn handle_put_envelope(state: &Arc<AppState>, request: &mut Request) -> Result<Value, ServerError> {
    let user_id = authenticate(state, request)?;
    let body = read_body(request)?;
    let envelope: EnvelopeRow = serde_json::from_value(body).map_err(|e| ServerError::BadRequest(e.to_string()))?;
    state.store.put_envelope(&user_id, &envelope)?;
    Ok(json!({ "ok": true }))
}

fn log_request(method: &Method, path: &str, status: u16) {
    info!(%method, path, status, "handled request");
}
