//! Error taxonomy shared by the session manager, the query cache and the
//! backend adapters.

use thiserror::Error;

/// Failures reported by the hosted backend (or its in-memory stand-in)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request interrupted: {0}")]
    Interrupted(String),
}

/// Errors surfaced to callers of the client core
///
/// Every variant is recoverable from the application's point of view; none of
/// them is retried automatically.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Input was malformed or rejected by the backend
    #[error("validation failed: {0}")]
    Validation(String),

    /// Bad credentials
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Operation requires a session (or a role) that is not present
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Identity was created but the matching profile row was not
    #[error("account {user_id} was created but its profile was not: {message}")]
    ProfileCreation { user_id: String, message: String },

    /// Sign-out or session refresh failed; local state was left as is
    #[error("session error: {0}")]
    Session(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the caller should send the user to the login screen
    pub fn requires_login(&self) -> bool {
        matches!(self, Error::Authorization(_))
    }
}
