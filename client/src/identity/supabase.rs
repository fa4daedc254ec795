//! GoTrue identity service
//!
//! Talks to `/auth/v1` of a Supabase project. The session, its refresh and
//! the event stream live in the shared `SupabaseClient`, so data requests
//! are made as the signed-in user and a refresh they trigger is seen by
//! every subscriber.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::service::{AuthCallback, IdentityService};
use super::types::{AuthEvent, IdentityError, Session, SignUpOutcome};
use crate::error::ServiceError;
use crate::observer::Subscription;
use crate::supabase::{GoTrueUser, SupabaseClient, TokenResponse, read_json, send, upstream_error};

/// Sign-up answers with tokens when confirmation is off, a bare user otherwise
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(GoTrueUser),
}

pub struct SupabaseIdentityService {
    client: SupabaseClient,
}

impl SupabaseIdentityService {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

/// GoTrue reports bad input as 400/422 with a message
fn rejected_or_service(error: ServiceError) -> IdentityError {
    match error {
        ServiceError::Upstream { status, message } if status == 400 || status == 422 => {
            IdentityError::Rejected(message)
        }
        other => IdentityError::Service(other),
    }
}

#[async_trait]
impl IdentityService for SupabaseIdentityService {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: Value,
    ) -> Result<SignUpOutcome, IdentityError> {
        let request = self
            .client
            .request(Method::POST, self.client.auth_url("signup"), self.client.anon_key())
            .json(&json!({
                "email": email,
                "password": password,
                "data": attributes,
            }));

        let response: SignUpResponse = read_json(send(request).await?)
            .await
            .map_err(rejected_or_service)?;

        match response {
            SignUpResponse::Session(tokens) => {
                let session = tokens.into_session();
                info!("Signed up {}", session.user_id());
                self.client.apply(AuthEvent::SignedIn(session.clone())).await;
                Ok(SignUpOutcome {
                    user: session.user.clone(),
                    session: Some(session),
                })
            }
            SignUpResponse::User(user) => {
                info!("Signed up {} (confirmation pending)", user.id);
                Ok(SignUpOutcome {
                    user: user.into(),
                    session: None,
                })
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let request = self
            .client
            .request(
                Method::POST,
                self.client.auth_url("token?grant_type=password"),
                self.client.anon_key(),
            )
            .json(&json!({ "email": email, "password": password }));

        let response = send(request).await?;
        if response.status() == StatusCode::BAD_REQUEST {
            return Err(IdentityError::InvalidCredentials);
        }
        let tokens: TokenResponse = read_json(response).await.map_err(rejected_or_service)?;
        let session = tokens.into_session();

        self.client.apply(AuthEvent::SignedIn(session.clone())).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let had_session = self.client.session().await.is_some();
        let Some(session) = self.client.fresh_session().await? else {
            if had_session {
                // Refresh failed and already signed the session out
                return Ok(());
            }
            self.client.apply(AuthEvent::SignedOut).await;
            return Ok(());
        };

        let request =
            self.client
                .request(Method::POST, self.client.auth_url("logout"), &session.access_token);
        let response = send(request).await?;
        let status = response.status();
        // Token already gone upstream: the user is signed out either way
        let already_gone = matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        );
        if !status.is_success() && !already_gone {
            return Err(upstream_error(response).await.into());
        }

        self.client.apply(AuthEvent::SignedOut).await;
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, IdentityError> {
        Ok(self.client.fresh_session().await?)
    }

    fn subscribe(&self, callback: AuthCallback) -> Subscription {
        self.client.subscribe(callback)
    }
}
