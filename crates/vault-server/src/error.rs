//! Typed server errors, spec §7 — rendered as `{error: <string>}`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("username already registered")]
    UsernameTaken,
    #[error("invalid username or password")]
    BadCredentials,
    #[error("mfa code required")]
    MfaRequired,
    #[error("invalid mfa code")]
    InvalidMfaCode,
    #[error("missing or invalid authorization header")]
    Unauthenticated,
    #[error("refresh token is invalid, expired, or already used")]
    InvalidRefreshToken,
    #[error("not found")]
    NotFound,
    #[error("malformed request body: {0}")]
    BadRequest(String),
    #[error("password hashing error: {0}")]
    Hashing(String),
}

impl ServerError {
    /// HTTP status this error should be reported under.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::UsernameTaken => 409,
            ServerError::BadCredentials | ServerError::MfaRequired | ServerError::InvalidMfaCode => 401,
            ServerError::Unauthenticated | ServerError::InvalidRefreshToken => 401,
            ServerError::NotFound => 404,
            ServerError::BadRequest(_) => 400,
            ServerError::Sqlite(_) | ServerError::Hashing(_) => 500,
        }
    }

    /// Machine-readable code surfaced alongside a 401 for MFA flows,
    /// spec §6 error envelope.
    pub fn mfa_code(&self) -> Option<&'static str> {
        match self {
            ServerError::MfaRequired => Some("MFA_REQUIRED"),
            ServerError::InvalidMfaCode => Some("INVALID_MFA_CODE"),
            _ => None,
        }
    }
}
