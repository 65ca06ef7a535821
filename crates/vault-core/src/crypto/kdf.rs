//! HKDF-SHA-256 derivations, spec §4.A.
//!
//! Both derivations share one shape: a single `info` label binds the
//! output to its exact use so a key derived for one purpose can never be
//! replayed for another. No salt is used (the IKM already carries enough
//! entropy and fixed per-entry/per-operation `info` gives domain
//! separation).

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use super::RootKey;

/// Operation tag for deriving the card's application read key.
/// `0x02` = "read card_secret"; a distinct tag forbids cross-use with any
/// other card operation that might be added later.
pub const OP_READ_CARD_SECRET: u8 = 0x02;

/// Zeroizing fixed-size key buffer, used for every derived key.
pub struct DerivedKey<const N: usize>(pub [u8; N]);

impl<const N: usize> Drop for DerivedKey<N> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<const N: usize> DerivedKey<N> {
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

/// `deriveCardKey(RK, uidBytes, operation) -> 16-byte key`.
///
/// `info = "card-key" || operation || uidBytes`.
pub fn derive_card_key(rk: &RootKey, uid: &[u8], operation: u8) -> DerivedKey<16> {
    let mut info = Vec::with_capacity(b"card-key".len() + 1 + uid.len());
    info.extend_from_slice(b"card-key");
    info.push(operation);
    info.extend_from_slice(uid);

    let hk = Hkdf::<Sha256>::new(None, &rk.0);
    let mut out = [0u8; 16];
    hk.expand(&info, &mut out)
        .expect("16 <= 255*32 hkdf output bound");
    DerivedKey(out)
}

/// `deriveEntryKey(cardSecret, RK, entryId) -> 32-byte AES-GCM key`.
///
/// IKM is the card secret; `info = "entry-key" || RK || entryId`. Because
/// `entryId` is fresh per row, each entry has an independent key even when
/// the same card produces the same `cardSecret` twice.
pub fn derive_entry_key(card_secret: &[u8; 16], rk: &RootKey, entry_id: &uuid::Uuid) -> DerivedKey<32> {
    let mut info = Vec::with_capacity(b"entry-key".len() + 32 + 16);
    info.extend_from_slice(b"entry-key");
    info.extend_from_slice(&rk.0);
    info.extend_from_slice(entry_id.as_bytes());

    let hk = Hkdf::<Sha256>::new(None, card_secret);
    let mut out = [0u8; 32];
    hk.expand(&info, &mut out)
        .expect("32 <= 255*32 hkdf output bound");
    DerivedKey(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_key_is_deterministic_and_operation_separated() {
        let rk = RootKey([7u8; 32]);
        let uid = [1, 2, 3, 4];
        let k1 = derive_card_key(&rk, &uid, OP_READ_CARD_SECRET);
        let k2 = derive_card_key(&rk, &uid, OP_READ_CARD_SECRET);
        assert_eq!(k1.0, k2.0);

        let k3 = derive_card_key(&rk, &uid, 0x03);
        assert_ne!(k1.0, k3.0);
    }

    #[test]
    fn entry_key_is_unique_per_entry_even_for_same_card() {
        let rk = RootKey([9u8; 32]);
        let secret = [5u8; 16];
        let id_a = uuid::Uuid::new_v4();
        let id_b = uuid::Uuid::new_v4();

        let ka = derive_entry_key(&secret, &rk, &id_a);
        let kb = derive_entry_key(&secret, &rk, &id_b);
        assert_ne!(ka.0, kb.0);
    }
}
