//! Row types for the marketplace tables
//!
//! These mirror the hosted database schema; unknown columns are ignored and
//! most optional columns default, so partially selected rows still decode.

mod catalog;
mod listing;
mod profile;

pub use catalog::{Area, Category, City, Subcategory};
pub use listing::{CatalogRef, Condition, Listing, ListingStatus, SellerSummary};
pub use profile::{NewProfile, Profile, ProfileUpdate, Role};
