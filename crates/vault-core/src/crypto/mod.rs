//! Key derivation and envelope cryptography (spec §4.A) plus the entry
//! codec (spec §4.B). All key material here is zeroized on drop; nothing
//! in this module performs I/O.

pub mod codec;
pub mod envelope;
pub mod kdf;

pub use codec::{decrypt_entry, encrypt_entry, EncryptedEntry, EntryPayload};
pub use envelope::{envelope_open, envelope_seal, RootKeyEnvelope};
pub use kdf::{derive_card_key, derive_entry_key};

/// The 32-byte root key, held only in process memory once unlocked.
///
/// Mirrors the "process-scoped shared secret container" design note in
/// spec §9: initialize/clear lifecycle, zeroized on drop, no interior
/// mutability cycles — callers hold it behind an `Arc` and clone the byte
/// array out only for the duration of a derivation.
#[derive(Clone, zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct RootKey(pub [u8; 32]);

impl RootKey {
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        RootKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RootKey(..)")
    }
}
