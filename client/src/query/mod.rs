//! Query cache layer
//!
//! This module provides:
//! - `CollectionRequest` / `ListingFilters` describing what a consumer wants
//! - `QueryKey`, the canonical identity of a cache entry
//! - `Collection`, the decoded rows plus derived counts
//! - `QueryCache`, the coalescing, per-resource-invalidated cache

mod cache;
mod collection;
mod key;

pub use cache::{Mutation, QueryCache, QueryCacheStats, QueryState};
pub use collection::Collection;
pub use key::{CollectionRequest, ListingFilters, QueryKey, SortOrder, StatusScope};
