//! Data services
//!
//! This module provides:
//! - `DataService` trait for abstracting the hosted database
//! - `Query` describing filtered, ordered selects
//! - `PostgrestDataService` talking to a Supabase project
//! - `InMemoryDataService` holding tables in process memory

mod local;
mod postgrest;
mod query;
mod service;

pub use local::InMemoryDataService;
pub use postgrest::PostgrestDataService;
pub use query::{Embed, Filter, Order, Query};
pub use service::{DataService, INCREMENT_LISTING_VIEWS, Resource};
