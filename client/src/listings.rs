//! Listings facade
//!
//! Browsing goes through the query cache; writes go through `QueryCache::mutate`
//! so that every cached listings key is invalidated on success. Ownership and
//! role checks use the session manager's current state.

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::data::{INCREMENT_LISTING_VIEWS, Resource};
use crate::error::{Error, Result, ServiceError};
use crate::model::{Condition, Listing, ListingStatus};
use crate::query::{Collection, CollectionRequest, ListingFilters, Mutation, QueryCache};
use crate::session::SessionManager;

pub const MAX_IMAGES: usize = 8;

/// Listing as entered by a seller
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewListing {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub category_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    pub images: Vec<String>,
    pub is_negotiable: bool,
    pub is_urgent: bool,
}

impl NewListing {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty()
            || self.description.trim().is_empty()
            || self.category_id.trim().is_empty()
        {
            return Err(Error::Validation(
                "title, description and category are required".to_string(),
            ));
        }
        validate_price(self.price)?;
        validate_images(&self.images)
    }
}

/// Partial listing edit; only `Some` fields are sent
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListingUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_negotiable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_urgent: Option<bool>,
}

impl ListingUpdate {
    pub fn validate(&self) -> Result<()> {
        if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(Error::Validation("title cannot be blank".to_string()));
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        if let Some(images) = &self.images {
            validate_images(images)?;
        }
        Ok(())
    }
}

fn validate_price(price: f64) -> Result<()> {
    if !price.is_finite() || price <= 0.0 {
        return Err(Error::Validation("price must be a positive number".to_string()));
    }
    Ok(())
}

fn validate_images(images: &[String]) -> Result<()> {
    match images.len() {
        0 => Err(Error::Validation("add at least one image".to_string())),
        n if n > MAX_IMAGES => Err(Error::Validation(format!(
            "at most {MAX_IMAGES} images are allowed"
        ))),
        _ => Ok(()),
    }
}

/// URL-safe form of a title: lowercase ascii letters and digits joined by `-`
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if (c.is_whitespace() || c == '-') && !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "listing".to_string()
    } else {
        slug.to_string()
    }
}

/// Listing operations for consumers
pub struct Listings {
    cache: QueryCache,
    session: Arc<SessionManager>,
}

impl Listings {
    pub fn new(cache: QueryCache, session: Arc<SessionManager>) -> Self {
        Self { cache, session }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub async fn browse(&self, filters: &ListingFilters) -> Result<Arc<Collection>> {
        self.cache
            .fetch(&CollectionRequest::Listings(filters.clone()))
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Listing>> {
        let collection = self
            .cache
            .fetch(&CollectionRequest::Listing(id.to_string()))
            .await?;
        Ok(collection
            .listings()
            .and_then(|rows| rows.first())
            .cloned())
    }

    /// Publish a new listing for the signed-in seller
    pub async fn create(&self, draft: NewListing) -> Result<Listing> {
        let state = self.session.snapshot();
        let seller_id = state.require_user()?.user_id().to_string();
        draft.validate()?;

        let slug = format!("{}-{}", slugify(&draft.title), Utc::now().timestamp_millis());
        let mut row = serde_json::to_value(&draft).map_err(|e| Error::Validation(e.to_string()))?;
        if let Some(fields) = row.as_object_mut() {
            fields.insert("seller_id".into(), json!(seller_id));
            fields.insert("slug".into(), json!(slug));
            fields.insert("status".into(), json!(ListingStatus::Active.as_str()));
        }

        let stored = self
            .cache
            .mutate(Resource::Listings, Mutation::Create(row))
            .await?;
        let listing = decode_listing(stored)?;
        info!("Created listing {} ({})", listing.id, listing.slug);
        Ok(listing)
    }

    /// Edit a listing owned by the signed-in user (admins may edit any)
    pub async fn update(&self, id: &str, changes: ListingUpdate) -> Result<Listing> {
        changes.validate()?;
        self.authorize_change(id).await?;

        let changes = serde_json::to_value(&changes).map_err(|e| Error::Validation(e.to_string()))?;
        let stored = self
            .cache
            .mutate(
                Resource::Listings,
                Mutation::Update {
                    id: id.to_string(),
                    changes,
                },
            )
            .await?;
        decode_listing(stored)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.authorize_change(id).await?;
        self.cache
            .mutate(Resource::Listings, Mutation::Delete { id: id.to_string() })
            .await?;
        info!("Deleted listing {}", id);
        Ok(())
    }

    /// Move a listing to `status`; sellers are limited to their own
    /// listings and to the transitions in `ListingStatus::seller_can_transition`
    pub async fn set_status(&self, id: &str, status: ListingStatus) -> Result<Listing> {
        let (listing, is_admin) = self.authorize_change(id).await?;
        if !is_admin && !listing.status.seller_can_transition(status) {
            return Err(Error::Validation(format!(
                "cannot move a listing from {} to {}",
                listing.status.as_str(),
                status.as_str()
            )));
        }

        let stored = self
            .cache
            .mutate(
                Resource::Listings,
                Mutation::Update {
                    id: id.to_string(),
                    changes: json!({ "status": status.as_str() }),
                },
            )
            .await?;
        decode_listing(stored)
    }

    /// Count a view; failures are logged and never surfaced
    pub async fn record_view(&self, id: &str) {
        let args = json!({ "listing_id": id });
        match self.cache.data_service().rpc(INCREMENT_LISTING_VIEWS, args).await {
            Ok(_) => debug!("Recorded view for listing {}", id),
            Err(e) => warn!("Failed to record view for listing {}: {}", id, e),
        }
    }

    /// Listings per category in the cached result for `filters`; empty when
    /// nothing is cached yet
    pub fn category_counts(&self, filters: &ListingFilters) -> IndexMap<String, usize> {
        self.cache
            .peek(&CollectionRequest::Listings(filters.clone()))
            .map(|collection| collection.count_by_category())
            .unwrap_or_default()
    }

    pub fn status_counts(&self, filters: &ListingFilters) -> IndexMap<ListingStatus, usize> {
        self.cache
            .peek(&CollectionRequest::Listings(filters.clone()))
            .map(|collection| collection.count_by_status())
            .unwrap_or_default()
    }

    /// Load the listing and check the caller may change it
    async fn authorize_change(&self, id: &str) -> Result<(Listing, bool)> {
        let state = self.session.snapshot();
        let user_id = state.require_user()?.user_id().to_string();

        let row = self
            .cache
            .data_service()
            .get_by_id(Resource::Listings, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("listings/{id}")))?;
        let listing = decode_listing(row)?;

        let is_admin = state.is_admin();
        if !is_admin && !listing.is_owned_by(&user_id) {
            return Err(Error::Authorization(
                "only the seller or an admin may change this listing".to_string(),
            ));
        }
        Ok((listing, is_admin))
    }
}

fn decode_listing(row: Value) -> Result<Listing> {
    serde_json::from_value(row).map_err(|e| ServiceError::Decode(e.to_string()).into())
}
