//! Typed collections held by the cache

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::key::CollectionRequest;
use crate::data::Resource;
use crate::error::ServiceError;
use crate::model::{Area, Category, City, Listing, ListingStatus, Subcategory};

/// Decoded rows of one resource
#[derive(Debug, Clone, PartialEq)]
pub enum Collection {
    Listings(Vec<Listing>),
    Categories(Vec<Category>),
    Subcategories(Vec<Subcategory>),
    Cities(Vec<City>),
    Areas(Vec<Area>),
}

impl Collection {
    /// Decode rows returned for `request`
    pub fn decode(
        request: &CollectionRequest,
        rows: Vec<Value>,
        now: DateTime<Utc>,
    ) -> Result<Self, ServiceError> {
        let collection = match request.resource() {
            Resource::Listings => {
                let mut listings: Vec<Listing> = decode_rows(rows)?;
                if request.hides_expired() {
                    listings.retain(|listing| !listing.is_expired_at(now));
                }
                Collection::Listings(listings)
            }
            Resource::Categories => Collection::Categories(decode_rows(rows)?),
            Resource::Subcategories => Collection::Subcategories(decode_rows(rows)?),
            Resource::Cities => Collection::Cities(decode_rows(rows)?),
            Resource::Areas => Collection::Areas(decode_rows(rows)?),
            Resource::Profiles => {
                return Err(ServiceError::Decode(
                    "profiles are not served through the query cache".to_string(),
                ));
            }
        };
        Ok(collection)
    }

    pub fn len(&self) -> usize {
        match self {
            Collection::Listings(rows) => rows.len(),
            Collection::Categories(rows) => rows.len(),
            Collection::Subcategories(rows) => rows.len(),
            Collection::Cities(rows) => rows.len(),
            Collection::Areas(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn listings(&self) -> Option<&[Listing]> {
        match self {
            Collection::Listings(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn categories(&self) -> Option<&[Category]> {
        match self {
            Collection::Categories(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn subcategories(&self) -> Option<&[Subcategory]> {
        match self {
            Collection::Subcategories(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn cities(&self) -> Option<&[City]> {
        match self {
            Collection::Cities(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn areas(&self) -> Option<&[Area]> {
        match self {
            Collection::Areas(rows) => Some(rows),
            _ => None,
        }
    }

    /// Listings per category id, in first-seen order; empty for other resources
    pub fn count_by_category(&self) -> IndexMap<String, usize> {
        let mut counts = IndexMap::new();
        for listing in self.listings().unwrap_or_default() {
            if let Some(category) = &listing.category_id {
                *counts.entry(category.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Listings per stored status
    pub fn count_by_status(&self) -> IndexMap<ListingStatus, usize> {
        let mut counts = IndexMap::new();
        for listing in self.listings().unwrap_or_default() {
            *counts.entry(listing.status).or_insert(0) += 1;
        }
        counts
    }
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, ServiceError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| ServiceError::Decode(e.to_string())))
        .collect()
}
