//! Identity types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::error::ServiceError;

/// Errors reported by the identity service
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IdentityError {
    /// Sign-up input refused (duplicate email, weak password, ...)
    #[error("rejected by identity service: {0}")]
    Rejected(String),

    #[error("invalid login credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Identity record as returned by the identity service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Attributes supplied at sign-up (full name, phone)
    #[serde(default)]
    pub metadata: Value,
}

/// Authenticated session; tokens are passed through, never inspected
#[derive(Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: AuthUser,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Push notification from the identity service
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    UserUpdated(Session),
    SignedOut,
}

impl AuthEvent {
    /// Session implied by the event (`None` means signed out)
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthEvent::SignedIn(session)
            | AuthEvent::TokenRefreshed(session)
            | AuthEvent::UserUpdated(session) => Some(session),
            AuthEvent::SignedOut => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthEvent::SignedIn(_) => "signed_in",
            AuthEvent::TokenRefreshed(_) => "token_refreshed",
            AuthEvent::UserUpdated(_) => "user_updated",
            AuthEvent::SignedOut => "signed_out",
        }
    }
}

/// Result of creating an account
///
/// `session` is absent when the backend requires email confirmation first.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: AuthUser,
    pub session: Option<Session>,
}
