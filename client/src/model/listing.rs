use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Draft,
    #[default]
    Active,
    Sold,
    Expired,
    Rejected,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Draft => "draft",
            ListingStatus::Active => "active",
            ListingStatus::Sold => "sold",
            ListingStatus::Expired => "expired",
            ListingStatus::Rejected => "rejected",
        }
    }

    /// Transitions a seller may apply to their own listing.
    /// Rejection (and lifting it) is reserved for admins.
    pub fn seller_can_transition(self, to: ListingStatus) -> bool {
        use ListingStatus::*;
        matches!(
            (self, to),
            (Draft, Active) | (Active, Draft) | (Active, Sold) | (Sold, Active) | (Expired, Active)
        )
    }
}

/// Item condition as entered by the seller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    New,
    LikeNew,
    Good,
    Fair,
    Poor,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::New => "new",
            Condition::LikeNew => "like_new",
            Condition::Good => "good",
            Condition::Fair => "fair",
            Condition::Poor => "poor",
        }
    }
}

/// A classified ad
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub seller_id: String,
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub subcategory_id: Option<String>,
    #[serde(default)]
    pub city_id: Option<String>,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub status: ListingStatus,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(default)]
    pub is_negotiable: bool,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub saves: u64,
    #[serde(default)]
    pub contacts: u64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub featured_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, rename = "profiles", skip_serializing_if = "Option::is_none")]
    pub seller: Option<SellerSummary>,
    #[serde(default, rename = "categories", skip_serializing_if = "Option::is_none")]
    pub category: Option<CatalogRef>,
    #[serde(default, rename = "subcategories", skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<CatalogRef>,
    #[serde(default, rename = "cities", skip_serializing_if = "Option::is_none")]
    pub city: Option<CatalogRef>,
    #[serde(default, rename = "areas", skip_serializing_if = "Option::is_none")]
    pub area: Option<CatalogRef>,
}

/// Seller columns embedded in a listing row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerSummary {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub total_reviews: u32,
}

/// Name and slug of an embedded category, subcategory, city or area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Listing {
    /// Active listings whose expiry has passed are expired even if the row
    /// still says otherwise
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ListingStatus::Expired
            || self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn effective_status(&self, now: DateTime<Utc>) -> ListingStatus {
        if self.status == ListingStatus::Active && self.is_expired_at(now) {
            ListingStatus::Expired
        } else {
            self.status
        }
    }

    /// Featured flag honoring `featured_until`
    pub fn is_featured_at(&self, now: DateTime<Utc>) -> bool {
        self.is_featured && self.featured_until.is_none_or(|until| until > now)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.seller_id == user_id
    }
}
