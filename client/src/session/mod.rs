//! Session lifecycle
//!
//! This module provides:
//! - `SessionManager`, driven by identity-service events
//! - `AuthState` / `SessionStatus`, the snapshot consumers read
//! - `RouteRequirement`, the access check for protected views

mod guard;
mod manager;
mod state;

pub use guard::{GuardDecision, RouteRequirement};
pub use manager::SessionManager;
pub use state::{AuthState, SessionStatus};
