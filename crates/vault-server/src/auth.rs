//! Password hashing, token issuance, and bearer auth, spec §4.I.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::ServerError;

const ACCESS_TOKEN_TTL_MS: i64 = 15 * 60 * 1000;
const REFRESH_TOKEN_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;

fn argon2() -> Argon2<'static> {
    // memory=64MiB, time=3, lanes=1, spec §4.I.
    let params = Params::new(64 * 1024, 3, 1, None).expect("static argon2 params are valid");
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

pub fn hash_password(password: &str) -> Result<String, ServerError> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    argon2()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ServerError::Hashing(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else { return false };
    argon2().verify_password(password.as_bytes(), &parsed).is_ok()
}

/// A fresh random opaque token (access or refresh). Hex-encoded, 256
/// bits of entropy.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Refresh and access tokens are stored server-side only as a SHA-256
/// hash, spec §4.I — the plaintext token never touches the database.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn access_token_expiry(now_ms: i64) -> i64 {
    now_ms + ACCESS_TOKEN_TTL_MS
}

pub fn refresh_token_expiry(now_ms: i64) -> i64 {
    now_ms + REFRESH_TOKEN_TTL_MS
}

/// Extracts the bearer token from an `Authorization: Bearer <token>`
/// header value.
pub fn extract_bearer(header_value: Option<&str>) -> Result<&str, ServerError> {
    header_value
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ServerError::Unauthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn token_hash_is_deterministic() {
        let token = generate_token();
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(Some("Bearer abc123")).unwrap(), "abc123");
        assert!(extract_bearer(Some("abc123")).is_err());
        assert!(extract_bearer(None).is_err());
    }
}
