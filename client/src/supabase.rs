//! Shared HTTP plumbing for the hosted Supabase backend
//!
//! The identity and data adapters share one `SupabaseClient` so that data
//! requests carry the access token of whoever is signed in, falling back to
//! the anon key. The client also owns the session itself: a token close to
//! expiry is refreshed before use, whichever adapter touches it first, and
//! the resulting auth events reach every subscriber.

use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::SupabaseConfig;
use crate::error::ServiceError;
use crate::identity::{AuthCallback, AuthEvent, AuthUser, Session};
use crate::observer::{Observers, Subscription};

/// Sessions expiring within this window are refreshed before use
pub const REFRESH_MARGIN_SECS: i64 = 30;

/// Thin wrapper around reqwest for Supabase calls
#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    base_url: String,
    anon_key: String,
    session: Arc<RwLock<Option<Session>>>,
    events: Arc<Observers<AuthEvent>>,
    refresh_lock: Arc<Mutex<()>>,
}

/// GoTrue user object
#[derive(Debug, Deserialize)]
pub(crate) struct GoTrueUser {
    pub(crate) id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Value,
}

impl From<GoTrueUser> for AuthUser {
    fn from(user: GoTrueUser) -> Self {
        AuthUser {
            id: user.id,
            email: user.email,
            metadata: user.user_metadata,
        }
    }
}

/// Answer of the password and refresh-token grants
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: GoTrueUser,
}

impl TokenResponse {
    pub(crate) fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.into(),
        }
    }
}

/// Error body shapes used by GoTrue and PostgREST
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .or(self.error)
    }
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ServiceError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            session: Arc::new(RwLock::new(None)),
            events: Arc::new(Observers::new()),
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    pub(crate) fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    /// Build a request carrying `apikey` and the given bearer token
    pub(crate) fn request(&self, method: Method, url: String, bearer: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    /// Build a request authorized as the signed-in user (or anon),
    /// refreshing the session first when it is about to expire
    pub(crate) async fn authorized(
        &self,
        method: Method,
        url: String,
    ) -> Result<RequestBuilder, ServiceError> {
        let token = match self.fresh_session().await? {
            Some(session) => session.access_token,
            None => self.anon_key.clone(),
        };
        Ok(self.request(method, url, &token))
    }

    pub(crate) fn anon_key(&self) -> &str {
        &self.anon_key
    }

    /// Stored session, as is
    pub(crate) async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Store the session an event carries and notify subscribers
    pub(crate) async fn apply(&self, event: AuthEvent) {
        *self.session.write().await = event.session().cloned();
        debug!("GoTrue auth event: {}", event.kind());
        self.events.notify(&event);
    }

    pub(crate) fn subscribe(&self, callback: AuthCallback) -> Subscription {
        self.events.subscribe(callback)
    }

    /// The stored session, refreshed when it expires within
    /// `REFRESH_MARGIN_SECS`. A session that cannot be refreshed (no refresh
    /// token, or the grant is refused) is signed out and `None` returned.
    /// Transport and 5xx failures are returned, unless the old token is still
    /// valid, in which case it is used.
    pub(crate) async fn fresh_session(&self) -> Result<Option<Session>, ServiceError> {
        let _refreshing = self.refresh_lock.lock().await;

        let Some(session) = self.session().await else {
            return Ok(None);
        };
        let now = Utc::now();
        if !session.is_expired_at(now + Duration::seconds(REFRESH_MARGIN_SECS)) {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.as_deref() else {
            warn!("Session for {} expired without a refresh token", session.user_id());
            self.apply(AuthEvent::SignedOut).await;
            return Ok(None);
        };

        match self.refresh_grant(refresh_token).await {
            Ok(refreshed) => {
                info!("Refreshed session for {}", refreshed.user_id());
                self.apply(AuthEvent::TokenRefreshed(refreshed.clone())).await;
                Ok(Some(refreshed))
            }
            Err(ServiceError::Upstream { status, message }) if status < 500 => {
                warn!("Session refresh refused ({status}): {message}");
                self.apply(AuthEvent::SignedOut).await;
                Ok(None)
            }
            Err(e) if !session.is_expired_at(now) => {
                warn!("Session refresh failed, using current token: {e}");
                Ok(Some(session))
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<Session, ServiceError> {
        let request = self
            .request(
                Method::POST,
                self.auth_url("token?grant_type=refresh_token"),
                &self.anon_key,
            )
            .json(&json!({ "refresh_token": refresh_token }));
        let response: TokenResponse = read_json(send(request).await?).await?;
        Ok(response.into_session())
    }
}

/// Send a request, mapping transport failures
pub(crate) async fn send(request: RequestBuilder) -> Result<Response, ServiceError> {
    request
        .send()
        .await
        .map_err(|e| ServiceError::Transport(e.to_string()))
}

/// Turn a non-success response into an upstream error, keeping the backend's message
pub(crate) async fn upstream_error(response: Response) -> ServiceError {
    let status = response.status();
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });
    ServiceError::Upstream {
        status: status.as_u16(),
        message,
    }
}

/// Decode a successful JSON response, or surface the upstream error
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
    if !response.status().is_success() {
        return Err(upstream_error(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ServiceError::Decode(e.to_string()))
}
