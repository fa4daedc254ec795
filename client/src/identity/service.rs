//! IdentityService trait definition

use async_trait::async_trait;
use serde_json::Value;

use super::types::{AuthEvent, IdentityError, Session, SignUpOutcome};
use crate::observer::Subscription;

/// Callback invoked for every auth-state change
pub type AuthCallback = Box<dyn Fn(&AuthEvent) + Send + Sync>;

/// Trait for identity services (hosted GoTrue or in-memory)
///
/// Implementations emit an `AuthEvent` to subscribers after every change of
/// the current session, including the ones caused by their own methods.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Create an account; `attributes` are stored as user metadata
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: Value,
    ) -> Result<SignUpOutcome, IdentityError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError>;

    async fn sign_out(&self) -> Result<(), IdentityError>;

    /// Session currently held by the service, if any
    async fn current_session(&self) -> Result<Option<Session>, IdentityError>;

    /// Register for auth-state changes; dropping the subscription releases it
    fn subscribe(&self, callback: AuthCallback) -> Subscription;
}
