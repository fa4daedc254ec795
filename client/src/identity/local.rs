//! In-memory identity service
//!
//! Holds accounts and the current session in process memory and emits the
//! same events as the hosted service. Accounts are confirmed immediately
//! unless email confirmation is switched on.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::service::{AuthCallback, IdentityService};
use super::types::{AuthEvent, AuthUser, IdentityError, Session, SignUpOutcome};
use crate::observer::{Observers, Subscription};

const DEFAULT_MIN_PASSWORD_LEN: usize = 6;

struct Account {
    user: AuthUser,
    password: String,
}

pub struct InMemoryIdentityService {
    /// Accounts keyed by lowercased email
    accounts: RwLock<HashMap<String, Account>>,
    current: RwLock<Option<Session>>,
    observers: Observers<AuthEvent>,
    session_ttl: Duration,
    min_password_len: usize,
    require_confirmation: bool,
}

impl InMemoryIdentityService {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            observers: Observers::new(),
            session_ttl: Duration::hours(1),
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            require_confirmation: false,
        }
    }

    /// Sign-up returns no session until the address is confirmed
    pub fn with_email_confirmation(mut self) -> Self {
        self.require_confirmation = true;
        self
    }

    pub fn with_min_password_len(mut self, len: usize) -> Self {
        self.min_password_len = len;
        self
    }

    /// Deliver an event as if it came from elsewhere (another tab, a token
    /// refresh, an admin revoking the session)
    pub async fn emit(&self, event: AuthEvent) {
        *self.current.write().await = event.session().cloned();
        debug!("Emitting external auth event: {}", event.kind());
        self.observers.notify(&event);
    }

    /// Mint a session for an existing account without a password check
    pub async fn session_for(&self, email: &str) -> Option<Session> {
        let accounts = self.accounts.read().await;
        accounts
            .get(&email.to_lowercase())
            .map(|account| self.issue_session(&account.user))
    }

    fn issue_session(&self, user: &AuthUser) -> Session {
        Session {
            access_token: Uuid::new_v4().to_string(),
            refresh_token: Some(Uuid::new_v4().to_string()),
            expires_at: Some(Utc::now() + self.session_ttl),
            user: user.clone(),
        }
    }

    async fn set_current(&self, event: AuthEvent) {
        *self.current.write().await = event.session().cloned();
        self.observers.notify(&event);
    }
}

impl Default for InMemoryIdentityService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityService for InMemoryIdentityService {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: Value,
    ) -> Result<SignUpOutcome, IdentityError> {
        let key = email.trim().to_lowercase();
        if !key.contains('@') {
            return Err(IdentityError::Rejected(
                "Unable to validate email address: invalid format".to_string(),
            ));
        }
        if password.chars().count() < self.min_password_len {
            return Err(IdentityError::Rejected(format!(
                "Password should be at least {} characters",
                self.min_password_len
            )));
        }

        let user = {
            let mut accounts = self.accounts.write().await;
            if accounts.contains_key(&key) {
                return Err(IdentityError::Rejected("User already registered".to_string()));
            }
            let user = AuthUser {
                id: Uuid::new_v4().to_string(),
                email: Some(key.clone()),
                metadata: attributes,
            };
            accounts.insert(
                key,
                Account {
                    user: user.clone(),
                    password: password.to_string(),
                },
            );
            user
        };
        info!("Created account {}", user.id);

        if self.require_confirmation {
            return Ok(SignUpOutcome {
                user,
                session: None,
            });
        }

        let session = self.issue_session(&user);
        self.set_current(AuthEvent::SignedIn(session.clone())).await;
        Ok(SignUpOutcome {
            user,
            session: Some(session),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let session = {
            let accounts = self.accounts.read().await;
            let account = accounts
                .get(&email.trim().to_lowercase())
                .filter(|account| account.password == password)
                .ok_or(IdentityError::InvalidCredentials)?;
            self.issue_session(&account.user)
        };

        self.set_current(AuthEvent::SignedIn(session.clone())).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.set_current(AuthEvent::SignedOut).await;
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, IdentityError> {
        let current = self.current.read().await;
        Ok(current
            .as_ref()
            .filter(|session| !session.is_expired_at(Utc::now()))
            .cloned())
    }

    fn subscribe(&self, callback: AuthCallback) -> Subscription {
        self.observers.subscribe(callback)
    }
}
