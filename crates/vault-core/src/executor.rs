//! Card-Gated Executor, spec §4.D — the central concurrency device.
//!
//! Exactly one card wait may be outstanding at a time; a new request
//! pre-empts (cancels) any stale one. The poll loop, the authenticated
//! read, and the crypto step are all zeroized on every exit path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{interval, Instant};
use tracing::instrument;
use uuid::Uuid;

use crate::card::{CardProtocol, CardUid};
use crate::crypto::{derive_card_key, derive_entry_key, kdf::OP_READ_CARD_SECRET, RootKey};
use crate::error::ExecutorError;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const CARD_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Observable executor state, spec §4.D state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    WaitingCard,
    Authenticating,
    Crypto,
}

struct CancellationSlot {
    generation: AtomicU64,
}

impl CancellationSlot {
    fn new() -> Self {
        CancellationSlot {
            generation: AtomicU64::new(0),
        }
    }

    /// Register a fresh token, invalidating any previously issued one.
    /// Returns the generation this caller now owns.
    fn register(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

/// Serializes every card-gated operation behind a single global waiter.
pub struct CardGatedExecutor<D: CardProtocol> {
    driver: Arc<D>,
    root_key: Arc<RootKey>,
    cancel: Arc<CancellationSlot>,
    state: Mutex<ExecutorState>,
}

impl<D: CardProtocol> CardGatedExecutor<D> {
    pub fn new(driver: Arc<D>, root_key: Arc<RootKey>) -> Self {
        CardGatedExecutor {
            driver,
            root_key,
            cancel: Arc::new(CancellationSlot::new()),
            state: Mutex::new(ExecutorState::Idle),
        }
    }

    pub async fn state(&self) -> ExecutorState {
        *self.state.lock().await
    }

    async fn set_state(&self, s: ExecutorState) {
        *self.state.lock().await = s;
    }

    /// `withEntryKey(entryId, crypto_fn) -> result`, spec §4.D steps 1-6.
    ///
    /// `crypto_fn` must be pure: no I/O, only operations on the derived
    /// entry key. The entry key is zeroized on every exit path, including
    /// the error paths below.
    #[instrument(skip(self, crypto_fn), fields(entry_id = %entry_id))]
    pub async fn with_entry_key<F, R>(&self, entry_id: Uuid, crypto_fn: F) -> Result<R, ExecutorError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        // Step 1: pre-empt any outstanding wait by claiming a new generation.
        let my_generation = self.cancel.register();

        self.set_state(ExecutorState::WaitingCard).await;
        let uid = match self.wait_for_uid(my_generation).await {
            Ok(uid) => uid,
            Err(e) => {
                self.set_state(ExecutorState::Idle).await;
                return Err(e);
            }
        };

        self.set_state(ExecutorState::Authenticating).await;
        if !self.cancel.is_current(my_generation) {
            self.set_state(ExecutorState::Idle).await;
            return Err(ExecutorError::Cancelled);
        }

        let read_key = derive_card_key(&self.root_key, &uid.0, OP_READ_CARD_SECRET);
        let secret_result = self.driver.read_card_secret(&uid, read_key.as_bytes()).await;
        // Step 3: zeroize readKey before returning the secret buffer.
        // `DerivedKey`'s `Drop` impl scrubs the buffer.
        drop(read_key);

        let mut card_secret = match secret_result {
            Ok(secret) => secret,
            Err(e) => {
                self.set_state(ExecutorState::Idle).await;
                return Err(ExecutorError::Card(e));
            }
        };

        self.set_state(ExecutorState::Crypto).await;
        // Step 4: derive the entry key, then zeroize the card secret
        // immediately.
        let mut entry_key = *derive_entry_key(&card_secret, &self.root_key, &entry_id).as_bytes();
        card_secret.iter_mut().for_each(|b| *b = 0);

        // Step 5 + 6: run the pure crypto closure, then unconditionally
        // zeroize the entry key regardless of how we leave this function.
        let result = crypto_fn(&entry_key);
        entry_key.iter_mut().for_each(|b| *b = 0);

        self.set_state(ExecutorState::Idle).await;
        Ok(result)
    }

    /// Poll `peekUid()` every 200ms up to 15s. Three terminal outcomes:
    /// `UID_OBTAINED`, `CANCELLED`, `CARD_TIMEOUT`.
    async fn wait_for_uid(&self, my_generation: u64) -> Result<CardUid, ExecutorError> {
        let deadline = Instant::now() + CARD_WAIT_TIMEOUT;
        let mut ticker = interval(POLL_INTERVAL);

        loop {
            if !self.cancel.is_current(my_generation) {
                return Err(ExecutorError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(ExecutorError::CardTimeout);
            }

            if let Some(uid) = self.driver.peek_uid().await {
                if !self.cancel.is_current(my_generation) {
                    return Err(ExecutorError::Cancelled);
                }
                return Ok(uid);
            }

            ticker.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::mock::MockCardProtocol;

    fn rk() -> Arc<RootKey> {
        Arc::new(RootKey([5u8; 32]))
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_when_no_card_ever_appears() {
        let driver = Arc::new(MockCardProtocol::new());
        let exec = CardGatedExecutor::new(driver, rk());

        let result = exec.with_entry_key(Uuid::new_v4(), |_key| ()).await;

        assert!(matches!(result, Err(ExecutorError::CardTimeout)));
    }

    #[tokio::test]
    async fn pre_empting_a_pending_wait_cancels_the_first() {
        let driver = Arc::new(MockCardProtocol::new());
        let exec = Arc::new(CardGatedExecutor::new(driver.clone(), rk()));

        let exec1 = exec.clone();
        let first = tokio::spawn(async move { exec1.with_entry_key(Uuid::new_v4(), |_| ()).await });

        // Give the first request a moment to register its wait, then
        // pre-empt it with a second request and tap the card for that one.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let uid = CardUid(vec![9, 9, 9]);
        let read_key = derive_card_key(&RootKey([5u8; 32]), &uid.0, OP_READ_CARD_SECRET);
        driver.init(&uid, read_key.as_bytes()).await.unwrap();
        driver.tap(uid);

        let second = exec.with_entry_key(Uuid::new_v4(), |key| key.to_vec()).await;

        let first_result = first.await.unwrap();
        assert!(matches!(first_result, Err(ExecutorError::Cancelled)));
        assert!(second.is_ok());
    }
}
