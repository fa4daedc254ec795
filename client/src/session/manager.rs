use metrics::{counter, histogram};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::{AuthState, SessionStatus};
use crate::data::{DataService, Resource};
use crate::error::{Error, Result, ServiceError};
use crate::identity::{AuthEvent, IdentityError, IdentityService, Session};
use crate::model::{NewProfile, Profile, ProfileUpdate, Role};
use crate::observer::{Observers, Subscription};

/// Single source of truth for who is logged in
///
/// State changes come from the identity service's event stream, applied in
/// delivery order by one background task. Explicit calls (`login`, `logout`)
/// report errors but leave the resulting state to those events.
pub struct SessionManager {
    inner: Arc<Inner>,
    identity_subscription: Mutex<Option<Subscription>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    identity: Arc<dyn IdentityService>,
    data: Arc<dyn DataService>,
    state: watch::Sender<AuthState>,
    observers: Observers<AuthState>,
    /// Serializes state writes with their notifications
    publishing: Mutex<()>,
    /// Events applied so far; lets `initialize` tell whether one overtook it
    events_applied: AtomicU64,
    /// Profile fetches issued, and the newest one whose result was stored
    profile_fetches: AtomicU64,
    profile_stored: AtomicU64,
}

impl SessionManager {
    /// Subscribe to the identity service and start applying its events.
    /// Must be called within a tokio runtime.
    pub fn new(identity: Arc<dyn IdentityService>, data: Arc<dyn DataService>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuthEvent>();
        let identity_subscription = identity.subscribe(Box::new(move |event: &AuthEvent| {
            // Receiver is gone only after shutdown
            let _ = tx.send(event.clone());
        }));

        let inner = Arc::new(Inner {
            identity,
            data,
            state: watch::Sender::new(AuthState::default()),
            observers: Observers::new(),
            publishing: Mutex::new(()),
            events_applied: AtomicU64::new(0),
            profile_fetches: AtomicU64::new(0),
            profile_stored: AtomicU64::new(0),
        });

        let worker = Arc::clone(&inner);
        let event_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                worker.apply_event(event).await;
            }
            debug!("Auth event stream closed");
        });

        Self {
            inner,
            identity_subscription: Mutex::new(Some(identity_subscription)),
            event_task: Mutex::new(Some(event_task)),
        }
    }

    /// Resolve the initial state from the identity service's stored session
    ///
    /// Failures are recorded in `last_error`; the manager is ready afterwards
    /// either way.
    pub async fn initialize(&self) -> AuthState {
        let applied_before = self.inner.events_applied.load(Ordering::SeqCst);

        let (session, profile) = match self.inner.identity.current_session().await {
            Ok(Some(session)) => {
                let profile = self.inner.fetch_profile(session.user_id()).await;
                (Some(session), profile)
            }
            Ok(None) => (None, Ok(None)),
            Err(e) => {
                warn!("Failed to restore session: {}", e);
                (None, Err(identity_error(e)))
            }
        };

        self.inner.update(|state| {
            if self.inner.events_applied.load(Ordering::SeqCst) != applied_before {
                // An event overtook us and is authoritative
                debug!("Auth event arrived during initialization; keeping it");
                if state.status == SessionStatus::Unknown {
                    state.status = if state.session.is_some() {
                        SessionStatus::Authenticated
                    } else {
                        SessionStatus::Anonymous
                    };
                    return true;
                }
                return false;
            }

            *state = match session {
                Some(session) => AuthState::signed_in(session),
                None => AuthState::anonymous(),
            };
            match profile {
                Ok(profile) => state.profile = profile,
                Err(e) => state.last_error = Some(e),
            }
            true
        });

        let state = self.snapshot();
        info!(
            "Session initialized: {} ({})",
            state.status.as_str(),
            state.user_id().unwrap_or("no user")
        );
        state
    }

    /// Create an account and its profile row
    ///
    /// A failed profile insert after a successful sign-up returns
    /// `Error::ProfileCreation`; the identity exists and `create_profile`
    /// may be retried.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        phone: Option<&str>,
    ) -> Result<Profile> {
        let email = email.trim();
        let full_name = full_name.trim();
        if !email.contains('@') {
            return Err(Error::Validation("enter a valid email address".to_string()));
        }
        if full_name.is_empty() {
            return Err(Error::Validation("full name is required".to_string()));
        }
        let phone = phone.map(str::trim).filter(|p| !p.is_empty());

        let attributes = json!({ "full_name": full_name, "phone": phone });
        let outcome = self
            .inner
            .identity
            .sign_up(email, password, attributes)
            .await
            .map_err(identity_error)?;
        info!("Registered user {}", outcome.user.id);

        let profile = NewProfile {
            email: outcome.user.email.clone().unwrap_or_else(|| email.to_string()),
            id: outcome.user.id,
            full_name: full_name.to_string(),
            phone: phone.map(str::to_string),
            role: Role::User,
        };
        self.create_profile(profile).await
    }

    /// Insert the profile row for an existing identity
    pub async fn create_profile(&self, profile: NewProfile) -> Result<Profile> {
        let user_id = profile.id.clone();
        let creation_failed = |message: String| Error::ProfileCreation {
            user_id: user_id.clone(),
            message,
        };

        let row = serde_json::to_value(&profile).map_err(|e| creation_failed(e.to_string()))?;
        let stored = match self.inner.data.insert(Resource::Profiles, row).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Profile creation failed for {}: {}", user_id, e);
                counter!("classifieds_profile_creation_failures_total").increment(1);
                return Err(creation_failed(e.to_string()));
            }
        };
        let created: Profile =
            serde_json::from_value(stored).map_err(|e| creation_failed(e.to_string()))?;

        if self.snapshot().user_id() == Some(user_id.as_str())
            && let Err(e) = self.refresh_profile().await
        {
            warn!("Profile refetch after creation failed: {}", e);
        }
        Ok(created)
    }

    /// Sign in; the resulting state arrives through the event stream
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let session = self
            .inner
            .identity
            .sign_in(email.trim(), password)
            .await
            .map_err(identity_error)?;
        debug!("Sign-in accepted for {}", session.user_id());
        Ok(())
    }

    /// Sign out; on failure local state is left as it was
    pub async fn logout(&self) -> Result<()> {
        self.inner.identity.sign_out().await.map_err(|e| {
            warn!("Sign-out failed: {}", e);
            Error::Session(e.to_string())
        })
    }

    /// Patch the signed-in user's profile, then refetch it
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile> {
        let user_id = self.snapshot().require_user()?.user_id().to_string();
        if update.is_empty() {
            return Err(Error::Validation("no profile changes given".to_string()));
        }

        let changes =
            serde_json::to_value(&update).map_err(|e| Error::Validation(e.to_string()))?;
        self.inner
            .data
            .update(Resource::Profiles, &user_id, changes)
            .await?;
        info!("Updated profile {}", user_id);

        self.refresh_profile()
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("profiles/{user_id}")).into())
    }

    /// Refetch the signed-in user's profile
    pub async fn refresh_profile(&self) -> Result<Option<Profile>> {
        let user_id = self.snapshot().require_user()?.user_id().to_string();
        self.inner.load_profile(&user_id).await
    }

    pub fn snapshot(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.state.borrow().session.clone()
    }

    /// Receiver that sees every state change
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Call `callback` with the new state after every change
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(callback)
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> AuthState
    where
        F: FnMut(&AuthState) -> bool,
    {
        let mut rx = self.watch();
        match rx.wait_for(|state| predicate(state)).await {
            Ok(state) => state.clone(),
            // Sender lives in `self`, so this only happens mid-teardown
            Err(_) => self.snapshot(),
        }
    }

    pub async fn wait_until_ready(&self) -> AuthState {
        self.wait_for(AuthState::is_ready).await
    }

    /// Stop listening to the identity service
    pub fn shutdown(&self) {
        if let Some(subscription) = self
            .identity_subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            subscription.unsubscribe();
        }
        if let Some(task) = self
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            debug!("Session manager stopped");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    /// Apply `change` and notify observers if it reports a modification
    fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut AuthState) -> bool,
    {
        let _publishing = self.publishing.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state.send_if_modified(change) {
            let snapshot = self.state.borrow().clone();
            self.observers.notify(&snapshot);
        }
    }

    async fn apply_event(&self, event: AuthEvent) {
        counter!("classifieds_auth_events_total", "kind" => event.kind()).increment(1);
        debug!("Applying auth event: {}", event.kind());

        let Some(session) = event.session().cloned() else {
            self.update(|state| {
                self.events_applied.fetch_add(1, Ordering::SeqCst);
                *state = AuthState::anonymous();
                true
            });
            return;
        };

        let user_id = session.user_id().to_string();
        self.update(|state| {
            self.events_applied.fetch_add(1, Ordering::SeqCst);
            // Same user (token refresh, metadata change): keep showing the profile
            let profile = match state.user_id() {
                Some(current) if current == user_id => state.profile.take(),
                _ => None,
            };
            *state = AuthState::signed_in(session);
            state.profile = profile;
            true
        });

        let _ = self.load_profile(&user_id).await;
    }

    /// Fetch and store the profile of `user_id`
    async fn load_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let ticket = self.profile_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.fetch_profile(user_id).await;
        self.store_profile(user_id, ticket, result.clone());
        result
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let start = Instant::now();
        let row = self.data.get_by_id(Resource::Profiles, user_id).await;
        histogram!("classifieds_profile_fetch_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match row? {
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| ServiceError::Decode(e.to_string()).into()),
            None => {
                debug!("No profile row for {}", user_id);
                Ok(None)
            }
        }
    }

    /// Store a fetched profile unless the session moved to another user or a
    /// later-issued fetch already landed
    fn store_profile(&self, user_id: &str, ticket: u64, result: Result<Option<Profile>>) {
        self.update(|state| {
            if state.user_id() != Some(user_id) {
                debug!("Discarding profile for {}: session changed", user_id);
                return false;
            }
            if self.profile_stored.load(Ordering::SeqCst) > ticket {
                debug!("Discarding outdated profile fetch for {}", user_id);
                return false;
            }
            self.profile_stored.store(ticket, Ordering::SeqCst);
            match result {
                Ok(profile) => {
                    state.profile = profile;
                    state.last_error = None;
                }
                Err(e) => {
                    warn!("Profile fetch failed for {}: {}", user_id, e);
                    state.profile = None;
                    state.last_error = Some(e);
                }
            }
            true
        });
    }
}

fn identity_error(error: IdentityError) -> Error {
    match error {
        IdentityError::InvalidCredentials => {
            Error::Authentication("invalid email or password".to_string())
        }
        IdentityError::Rejected(message) => Error::Validation(message),
        IdentityError::Service(e) => Error::Service(e),
    }
}
