//! Card Protocol Driver interface, spec §4.C.
//!
//! This module only defines the contract the rest of the core talks to;
//! the real ISO14443/DESFire APDU driver is an external collaborator named
//! by this interface (spec §1 Non-goals). The trait shape is grounded in
//! the transport/authentication split used by hardware tap-card protocol
//! drivers: a small async trait plus a deterministic in-memory stand-in
//! used in tests.

pub mod mock;

use async_trait::async_trait;

use crate::error::CardError;

/// A contactless card UID, as raw bytes (hex string on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CardUid(pub Vec<u8>);

impl CardUid {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Firmware/version identifier reported by `getFirmwareVersion`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion(pub String);

/// The driver is single-threaded with respect to RF operations — callers
/// (the Card-Gated Executor) must never invoke two methods concurrently on
/// the same driver instance.
#[async_trait]
pub trait CardProtocol: Send + Sync {
    /// Fast, non-blocking RF scan for a present card's UID.
    async fn peek_uid(&self) -> Option<CardUid>;

    /// Authenticate with `read_key` and read the 16-byte `card_secret`
    /// file. `CARD_AUTH_FAILED` on wrong key.
    async fn read_card_secret(&self, uid: &CardUid, read_key: &[u8; 16]) -> Result<[u8; 16], CardError>;

    /// Whether the card has already been commissioned (has an
    /// application + `card_secret` file).
    async fn is_initialised(&self, uid: &CardUid) -> Result<bool, CardError>;

    /// Create the application, provision the read key, and write a fresh
    /// random `card_secret`.
    async fn init(&self, uid: &CardUid, read_key: &[u8; 16]) -> Result<(), CardError>;

    /// Destroy the application and its `card_secret`.
    async fn format(&self, uid: &CardUid) -> Result<(), CardError>;

    async fn get_firmware_version(&self) -> Result<FirmwareVersion, CardError>;

    async fn run_self_tests(&self) -> Result<(), CardError>;
}
