//! Host-side core of the card-gated password vault: key derivation,
//! the card protocol interface, the card-gated executor, the local
//! encrypted store, the vault API, the bridge server, and the sync
//! client.

pub mod bridge;
pub mod card;
pub mod config;
pub mod crypto;
pub mod error;
pub mod executor;
pub mod store;
pub mod sync;
pub mod vault;

pub use crypto::RootKey;
pub use error::VaultError;
pub use executor::{CardGatedExecutor, ExecutorState};
pub use vault::{Vault, VaultEntry};

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;

    use crate::card::mock::MockCardProtocol;
    use crate::card::CardUid;
    use crate::crypto::{derive_card_key, kdf::OP_READ_CARD_SECRET, EntryPayload, RootKey};
    use crate::executor::CardGatedExecutor;
    use crate::store::LocalStore;
    use crate::vault::Vault;

    /// Spec §8 scenario: create an entry then read it back through a
    /// full card tap, decrypt, and verify the plaintext.
    #[tokio::test]
    async fn create_and_fill_round_trip() {
        let driver = Arc::new(MockCardProtocol::new());
        let rk = Arc::new(RootKey([11u8; 32]));
        let uid = CardUid(vec![0xAA, 0xBB]);
        let read_key = derive_card_key(&rk, &uid.0, OP_READ_CARD_SECRET);
        driver.init(&uid, read_key.as_bytes()).await.unwrap();
        driver.tap(uid);

        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let executor = Arc::new(CardGatedExecutor::new(driver, rk));
        let vault = Vault::new(store, executor);

        let meta = vault
            .create_entry(
                "Email",
                "https://mail.example.com",
                "personal",
                EntryPayload {
                    username: "me@example.com".into(),
                    password: "correct horse battery staple".into(),
                    totp_secret: Some("JBSWY3DPEHPK3PXP".into()),
                    notes: None,
                },
            )
            .await
            .unwrap();

        let entry = vault.get_entry(meta.id).await.unwrap();
        assert_eq!(entry.payload.username, "me@example.com");
        assert_eq!(entry.payload.totp_secret.as_deref(), Some("JBSWY3DPEHPK3PXP"));
    }

    /// Spec §8 scenario: two devices converge on the newer write via LWW.
    #[test]
    fn lww_convergence_across_devices() {
        let device_a = LocalStore::open_in_memory().unwrap();
        let device_b = LocalStore::open_in_memory().unwrap();

        let id = uuid::Uuid::new_v4();
        let enc = crate::crypto::codec::EncryptedEntry {
            ciphertext: vec![1, 2, 3],
            iv: [0u8; 12],
            auth_tag: [0u8; 16],
        };
        device_a.insert_entry(id, "shared", "u", "c", &enc).unwrap();
        let row_a = device_a.get_entry_row(id).unwrap();
        device_b.apply_remote_upsert(&row_a).unwrap();

        // Device A updates again, a moment later.
        std::thread::sleep(std::time::Duration::from_millis(2));
        device_a.update_entry(id, "shared-v2", "u", "c", &enc).unwrap();
        let row_a_v2 = device_a.get_entry_row(id).unwrap();

        // Device B receives an out-of-order, stale copy first...
        let mut stale = row_a.clone();
        stale.label = "stale-interloper".into();
        device_b.apply_remote_upsert(&stale).unwrap();
        // ...then the genuinely newer write, which must win.
        device_b.apply_remote_upsert(&row_a_v2).unwrap();

        assert_eq!(device_b.get_entry_row(id).unwrap().label, "shared-v2");
    }

    /// Spec §8 scenario: a tombstone propagates and is never resurrected
    /// by an older upsert arriving out of order.
    #[test]
    fn tombstone_propagation_is_lww_gated() {
        let device_a = LocalStore::open_in_memory().unwrap();
        let device_b = LocalStore::open_in_memory().unwrap();

        let id = uuid::Uuid::new_v4();
        let enc = crate::crypto::codec::EncryptedEntry {
            ciphertext: vec![9],
            iv: [1u8; 12],
            auth_tag: [1u8; 16],
        };
        device_a.insert_entry(id, "to-delete", "u", "c", &enc).unwrap();
        let original = device_a.get_entry_row(id).unwrap();
        device_b.apply_remote_upsert(&original).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(2));
        device_a.delete_entry(id).unwrap();
        let deleted_at = device_a.get_entry_row(id).unwrap().updated_at;
        device_b.apply_remote_delete(id, deleted_at).unwrap();
        assert!(device_b.get_entry_row(id).unwrap().deleted);

        // A stale upsert for the pre-delete version must not resurrect it.
        device_b.apply_remote_upsert(&original).unwrap();
        assert!(device_b.get_entry_row(id).unwrap().deleted);
    }
}
