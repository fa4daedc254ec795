//! Access checks for protected views

use super::state::AuthState;

/// What a protected view needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteRequirement {
    Authenticated,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Session state not resolved yet; show a loading state
    Wait,
    RedirectToLogin,
    /// Signed in, but the role is insufficient
    Forbidden,
}

impl RouteRequirement {
    pub fn evaluate(&self, state: &AuthState) -> GuardDecision {
        if !state.is_ready() {
            return GuardDecision::Wait;
        }
        if !state.is_authenticated() {
            return GuardDecision::RedirectToLogin;
        }
        match self {
            RouteRequirement::Authenticated => GuardDecision::Allow,
            // A missing profile counts as insufficient
            RouteRequirement::Admin if state.is_admin() => GuardDecision::Allow,
            RouteRequirement::Admin => GuardDecision::Forbidden,
        }
    }
}
