//! Classifieds Client Library
//!
//! Session lifecycle and query cache for the classifieds marketplace
//! front-end, on top of a hosted Supabase backend (or an in-memory one).

pub mod backend;
pub mod config;
pub mod data;
pub mod error;
pub mod identity;
pub mod listings;
pub mod model;
pub mod observer;
pub mod query;
pub mod session;
pub mod supabase;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use backend::Backend;
pub use config::Config;
pub use error::{Error, Result, ServiceError};
pub use listings::{ListingUpdate, Listings, NewListing};
pub use query::{CollectionRequest, ListingFilters, QueryCache};
pub use session::{AuthState, SessionManager, SessionStatus};
