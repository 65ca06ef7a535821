//! Deterministic in-memory `CardProtocol` used by tests and by the
//! executor's own unit tests. Never wired up as the production driver.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::RngCore;

use crate::error::CardError;

use super::{CardProtocol, CardUid, FirmwareVersion};

struct CardState {
    read_key: Option<[u8; 16]>,
    secret: Option<[u8; 16]>,
}

/// A mock card rig: zero or more "present" cards, each with its own
/// provisioned secret, plus a switch to simulate "no card in the field".
pub struct MockCardProtocol {
    present_uid: Mutex<Option<CardUid>>,
    cards: Mutex<HashMap<Vec<u8>, CardState>>,
}

impl Default for MockCardProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCardProtocol {
    pub fn new() -> Self {
        MockCardProtocol {
            present_uid: Mutex::new(None),
            cards: Mutex::new(HashMap::new()),
        }
    }

    /// Simulate a tap: make `uid` present for subsequent `peek_uid` calls.
    pub fn tap(&self, uid: CardUid) {
        *self.present_uid.lock().unwrap() = Some(uid);
    }

    /// Simulate the card being pulled away.
    pub fn remove(&self) {
        *self.present_uid.lock().unwrap() = None;
    }
}

#[async_trait]
impl CardProtocol for MockCardProtocol {
    async fn peek_uid(&self) -> Option<CardUid> {
        self.present_uid.lock().unwrap().clone()
    }

    async fn read_card_secret(&self, uid: &CardUid, read_key: &[u8; 16]) -> Result<[u8; 16], CardError> {
        let cards = self.cards.lock().unwrap();
        let state = cards.get(&uid.0).ok_or(CardError::NoCard)?;
        match (&state.read_key, &state.secret) {
            (Some(k), Some(s)) if k == read_key => Ok(*s),
            (Some(_), Some(_)) => Err(CardError::AuthFailed),
            _ => Err(CardError::NoCard),
        }
    }

    async fn is_initialised(&self, uid: &CardUid) -> Result<bool, CardError> {
        Ok(self
            .cards
            .lock()
            .unwrap()
            .get(&uid.0)
            .map(|s| s.secret.is_some())
            .unwrap_or(false))
    }

    async fn init(&self, uid: &CardUid, read_key: &[u8; 16]) -> Result<(), CardError> {
        let mut secret = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut secret);
        self.cards.lock().unwrap().insert(
            uid.0.clone(),
            CardState {
                read_key: Some(*read_key),
                secret: Some(secret),
            },
        );
        Ok(())
    }

    async fn format(&self, uid: &CardUid) -> Result<(), CardError> {
        self.cards.lock().unwrap().remove(&uid.0);
        Ok(())
    }

    async fn get_firmware_version(&self) -> Result<FirmwareVersion, CardError> {
        Ok(FirmwareVersion("mock-1.0".to_string()))
    }

    async fn run_self_tests(&self) -> Result<(), CardError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_then_read_round_trips() {
        let driver = MockCardProtocol::new();
        let uid = CardUid(vec![1, 2, 3, 4]);
        let read_key = [9u8; 16];
        driver.init(&uid, &read_key).await.unwrap();

        let secret = driver.read_card_secret(&uid, &read_key).await.unwrap();
        assert_eq!(secret, driver.read_card_secret(&uid, &read_key).await.unwrap());

        let wrong_key = [0u8; 16];
        let err = driver.read_card_secret(&uid, &wrong_key).await.unwrap_err();
        assert!(matches!(err, CardError::AuthFailed));
    }
}
