use crate::error::Error;
use crate::identity::Session;
use crate::model::Profile;

/// Where the session lifecycle stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Initialization has not resolved yet
    #[default]
    Unknown,
    Anonymous,
    Authenticated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Unknown => "unknown",
            SessionStatus::Anonymous => "anonymous",
            SessionStatus::Authenticated => "authenticated",
        }
    }
}

/// Snapshot of who is logged in, as seen by consumers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub status: SessionStatus,
    pub session: Option<Session>,
    /// `None` while loading, after a failed fetch, or when the row is missing
    pub profile: Option<Profile>,
    /// Failure of the last initialization or profile fetch
    pub last_error: Option<Error>,
}

impl AuthState {
    /// Initialization has resolved (either way)
    pub fn is_ready(&self) -> bool {
        self.status != SessionStatus::Unknown
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(Session::user_id)
    }

    pub fn is_admin(&self) -> bool {
        self.profile.as_ref().is_some_and(Profile::is_admin)
    }

    /// Session of the signed-in user, or an authorization error
    pub fn require_user(&self) -> Result<&Session, Error> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::Authorization("sign in to continue".to_string()))
    }

    pub(crate) fn signed_in(session: Session) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            session: Some(session),
            profile: None,
            last_error: None,
        }
    }

    pub(crate) fn anonymous() -> Self {
        Self {
            status: SessionStatus::Anonymous,
            ..Self::default()
        }
    }
}
