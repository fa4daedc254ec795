//! Identity services
//!
//! Sign-up, sign-in, sign-out and the current session, plus a push stream of
//! `AuthEvent`s. Two implementations: the hosted GoTrue API and an in-memory
//! one used for local runs and tests.

mod local;
mod service;
mod supabase;
mod types;

pub use local::InMemoryIdentityService;
pub use service::{AuthCallback, IdentityService};
pub use supabase::SupabaseIdentityService;
pub use types::{AuthEvent, AuthUser, IdentityError, Session, SignUpOutcome};
