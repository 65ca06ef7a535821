//! Typed errors for every vault subsystem, per spec §7.

use thiserror::Error;

/// Errors raised by key derivation and the root-key envelope.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("envelope authentication tag is invalid or the passphrase is wrong")]
    BadPassphrase,
    #[error("entry ciphertext failed authentication")]
    BadCiphertext,
    #[error("envelope parameter out of range: {0}")]
    InvalidParams(&'static str),
    #[error("passphrase too short, must be at least 10 characters")]
    PassphraseTooShort,
    #[error("malformed byte field: {0}")]
    Encoding(&'static str),
}

/// Errors raised by the card protocol driver.
#[derive(Debug, Error)]
pub enum CardError {
    #[error("card authentication failed")]
    AuthFailed,
    #[error("no card present")]
    NoCard,
    #[error("card hardware error: {0}")]
    Hardware(String),
}

/// Errors raised by the card-gated executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("card wait was cancelled by a pre-empting request")]
    Cancelled,
    #[error("card wait timed out")]
    CardTimeout,
    #[error(transparent)]
    Card(#[from] CardError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("entry {0} not found")]
    NotFound(String),
    #[error("entry {0} already exists")]
    Duplicate(String),
    #[error("row for entry {0} vanished mid-update")]
    RaceCondition(String),
}

/// Top-level error type returned by the Vault API.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("not found")]
    NotFound,
    #[error("race condition, caller may retry once")]
    RaceCondition,
    #[error("cancelled")]
    Cancelled,
    #[error("card wait timed out")]
    CardTimeout,
    #[error(transparent)]
    Card(#[from] CardError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported backup version: {0}")]
    UnsupportedBackupVersion(u32),
}

impl From<ExecutorError> for VaultError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Cancelled => VaultError::Cancelled,
            ExecutorError::CardTimeout => VaultError::CardTimeout,
            ExecutorError::Card(c) => VaultError::Card(c),
            ExecutorError::Crypto(c) => VaultError::Crypto(c),
        }
    }
}

/// Errors raised by the sync client.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication expired")]
    AuthExpired,
    #[error("mfa required")]
    MfaRequired,
    #[error("invalid mfa code")]
    InvalidMfaCode,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
