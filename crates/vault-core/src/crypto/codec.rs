//! AEAD encrypt/decrypt of entry payloads under an entry key, spec §4.B.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Plaintext credential payload. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryPayload {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The three encrypted fields persisted on an entry row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedEntry {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub auth_tag: [u8; TAG_LEN],
}

/// Canonicalize the payload to a deterministic textual form.
///
/// `serde_json` with `BTreeMap`-free struct field order already serializes
/// object keys in declaration order, which is fixed by `EntryPayload`'s
/// field list, so this is deterministic across calls without needing a
/// canonical-JSON crate.
fn canonicalize(payload: &EntryPayload) -> Vec<u8> {
    serde_json::to_vec(payload).expect("EntryPayload always serializes")
}

/// `encryptEntry(entryKey, payload) -> {ciphertext, iv, authTag}`.
///
/// AAD is empty, per spec §4.B (kept empty for compatibility with legacy
/// data, spec §9).
pub fn encrypt_entry(entry_key: &[u8; 32], payload: &EntryPayload) -> Result<EncryptedEntry, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(entry_key));

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let plaintext = canonicalize(payload);
    let mut sealed = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|_| CryptoError::BadCiphertext)?;

    // `aes-gcm` appends the 16-byte tag to the ciphertext; split it back
    // out so the on-disk row keeps ciphertext and tag as separate columns,
    // matching the Entry row shape in spec §3.
    let tag_start = sealed.len() - TAG_LEN;
    let auth_tag: [u8; TAG_LEN] = sealed[tag_start..]
        .try_into()
        .expect("aes-gcm tag is always 16 bytes");
    sealed.truncate(tag_start);

    Ok(EncryptedEntry {
        ciphertext: sealed,
        iv,
        auth_tag,
    })
}

/// `decryptEntry(entryKey, ciphertext, iv, authTag) -> payload`.
///
/// `BAD_CIPHERTEXT` on auth-tag mismatch.
pub fn decrypt_entry(entry_key: &[u8; 32], entry: &EncryptedEntry) -> Result<EntryPayload, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(entry_key));
    let nonce = Nonce::from_slice(&entry.iv);

    let mut sealed = Vec::with_capacity(entry.ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(&entry.ciphertext);
    sealed.extend_from_slice(&entry.auth_tag);

    let plaintext = cipher
        .decrypt(nonce, sealed.as_ref())
        .map_err(|_| CryptoError::BadCiphertext)?;

    serde_json::from_slice(&plaintext).map_err(|_| CryptoError::BadCiphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> EntryPayload {
        EntryPayload {
            username: "u".into(),
            password: "p".into(),
            totp_secret: None,
            notes: Some("hi".into()),
        }
    }

    #[test]
    fn round_trips() {
        let key = [3u8; 32];
        let payload = sample_payload();
        let enc = encrypt_entry(&key, &payload).unwrap();
        let dec = decrypt_entry(&key, &enc).unwrap();
        assert_eq!(dec, payload);
    }

    #[test]
    fn wrong_key_fails_auth() {
        let payload = sample_payload();
        let enc = encrypt_entry(&[1u8; 32], &payload).unwrap();
        let err = decrypt_entry(&[2u8; 32], &enc).unwrap_err();
        assert!(matches!(err, CryptoError::BadCiphertext));
    }

    #[test]
    fn tampered_tag_fails_auth() {
        let payload = sample_payload();
        let mut enc = encrypt_entry(&[9u8; 32], &payload).unwrap();
        enc.auth_tag[0] ^= 0xFF;
        let err = decrypt_entry(&[9u8; 32], &enc).unwrap_err();
        assert!(matches!(err, CryptoError::BadCiphertext));
    }

    proptest::proptest! {
        #[test]
        fn decrypt_undoes_encrypt_for_arbitrary_keys_and_payloads(
            key in proptest::array::uniform32(proptest::prelude::any::<u8>()),
            username in ".{0,40}",
            password in ".{0,40}",
            notes in proptest::option::of(".{0,40}"),
        ) {
            let payload = EntryPayload { username, password, totp_secret: None, notes };
            let enc = encrypt_entry(&key, &payload).unwrap();
            let dec = decrypt_entry(&key, &enc).unwrap();
            proptest::prop_assert_eq!(dec, payload);
        }
    }
}
