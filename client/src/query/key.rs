//! Query keys and collection requests
//!
//! A `CollectionRequest` names what a consumer wants; its `QueryKey` is the
//! canonical identity of the cache entry and its `Query` is what the data
//! service executes. Two requests that differ only in spelling (whitespace,
//! case of the search text, blank fields) share a key.

use std::collections::BTreeMap;
use std::fmt;

use crate::data::{Embed, Query, Resource};
use crate::model::{Condition, ListingStatus};

/// Columns covered by free-text search
const SEARCH_COLUMNS: [&str; 2] = ["title", "description"];

const CATALOG_COLUMNS: &[&str] = &["id", "name", "slug"];

/// Related rows every listing read carries for cards and detail pages
pub const LISTING_EMBEDS: [Embed; 5] = [
    Embed {
        alias: "profiles",
        foreign_key: "seller_id",
        resource: Resource::Profiles,
        columns: &["id", "full_name", "avatar_url", "rating", "total_reviews", "is_verified"],
    },
    Embed {
        alias: "categories",
        foreign_key: "category_id",
        resource: Resource::Categories,
        columns: CATALOG_COLUMNS,
    },
    Embed {
        alias: "subcategories",
        foreign_key: "subcategory_id",
        resource: Resource::Subcategories,
        columns: CATALOG_COLUMNS,
    },
    Embed {
        alias: "cities",
        foreign_key: "city_id",
        resource: Resource::Cities,
        columns: &["id", "name", "slug", "state"],
    },
    Embed {
        alias: "areas",
        foreign_key: "area_id",
        resource: Resource::Areas,
        columns: CATALOG_COLUMNS,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    PriceLow,
    PriceHigh,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
            SortOrder::PriceLow => "price_low",
            SortOrder::PriceHigh => "price_high",
        }
    }

    fn column_and_direction(&self) -> (&'static str, bool) {
        match self {
            SortOrder::Newest => ("created_at", false),
            SortOrder::Oldest => ("created_at", true),
            SortOrder::PriceLow => ("price", true),
            SortOrder::PriceHigh => ("price", false),
        }
    }
}

/// Which listing statuses a browse covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusScope {
    /// Public browsing: active and not past `expires_at`
    #[default]
    Active,
    Only(ListingStatus),
    /// Dashboards: every status
    Any,
}

impl StatusScope {
    fn key_value(&self) -> &'static str {
        match self {
            StatusScope::Active => "active",
            StatusScope::Only(status) => status.as_str(),
            StatusScope::Any => "any",
        }
    }
}

/// Filters for browsing listings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFilters {
    pub search: Option<String>,
    pub category_id: Option<String>,
    pub subcategory_id: Option<String>,
    pub city_id: Option<String>,
    pub area_id: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub condition: Option<Condition>,
    pub is_featured: bool,
    pub seller_id: Option<String>,
    pub status: StatusScope,
    pub sort_by: SortOrder,
}

impl ListingFilters {
    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn category(mut self, id: impl Into<String>) -> Self {
        self.category_id = Some(id.into());
        self
    }

    pub fn city(mut self, id: impl Into<String>) -> Self {
        self.city_id = Some(id.into());
        self
    }

    pub fn price_between(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_price = min;
        self.max_price = max;
        self
    }

    pub fn featured(mut self) -> Self {
        self.is_featured = true;
        self
    }

    pub fn seller(mut self, id: impl Into<String>) -> Self {
        self.seller_id = Some(id.into());
        self
    }

    pub fn status(mut self, scope: StatusScope) -> Self {
        self.status = scope;
        self
    }

    pub fn sorted_by(mut self, order: SortOrder) -> Self {
        self.sort_by = order;
        self
    }

    /// Canonical form: trimmed lowercase search, no blank ids, finite prices only
    pub fn normalized(&self) -> Self {
        Self {
            search: non_blank(&self.search).map(|s| s.to_lowercase()),
            category_id: non_blank(&self.category_id),
            subcategory_id: non_blank(&self.subcategory_id),
            city_id: non_blank(&self.city_id),
            area_id: non_blank(&self.area_id),
            min_price: self.min_price.filter(|p| p.is_finite()),
            max_price: self.max_price.filter(|p| p.is_finite()),
            condition: self.condition,
            is_featured: self.is_featured,
            seller_id: non_blank(&self.seller_id),
            status: self.status,
            sort_by: self.sort_by,
        }
    }

    fn key_params(&self) -> BTreeMap<&'static str, String> {
        let f = self.normalized();
        let mut params = BTreeMap::new();
        let text = [
            ("search", f.search),
            ("category_id", f.category_id),
            ("subcategory_id", f.subcategory_id),
            ("city_id", f.city_id),
            ("area_id", f.area_id),
            ("seller_id", f.seller_id),
        ];
        for (name, value) in text {
            if let Some(value) = value {
                params.insert(name, value);
            }
        }
        if let Some(min) = f.min_price {
            params.insert("min_price", min.to_string());
        }
        if let Some(max) = f.max_price {
            params.insert("max_price", max.to_string());
        }
        if let Some(condition) = f.condition {
            params.insert("condition", condition.as_str().to_string());
        }
        if f.is_featured {
            params.insert("is_featured", "true".to_string());
        }
        params.insert("status", f.status.key_value().to_string());
        params.insert("sort", f.sort_by.as_str().to_string());
        params
    }

    fn to_query(&self) -> Query {
        let f = self.normalized();
        let mut query = Query::new(Resource::Listings).embed(&LISTING_EMBEDS);

        query = match f.status {
            StatusScope::Active => query.eq("status", ListingStatus::Active.as_str()),
            StatusScope::Only(status) => query.eq("status", status.as_str()),
            StatusScope::Any => query,
        };
        if let Some(text) = f.search {
            query = query.search(&SEARCH_COLUMNS, text);
        }
        let equalities = [
            ("category_id", f.category_id),
            ("subcategory_id", f.subcategory_id),
            ("city_id", f.city_id),
            ("area_id", f.area_id),
            ("seller_id", f.seller_id),
        ];
        for (column, value) in equalities {
            if let Some(value) = value {
                query = query.eq(column, value);
            }
        }
        if let Some(condition) = f.condition {
            query = query.eq("condition", condition.as_str());
        }
        if f.is_featured {
            query = query.eq("is_featured", true);
        }
        if let Some(min) = f.min_price {
            query = query.gte("price", min);
        }
        if let Some(max) = f.max_price {
            query = query.lte("price", max);
        }

        let (column, ascending) = f.sort_by.column_and_direction();
        query.order(column, ascending)
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// What a consumer asks the cache for
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionRequest {
    Listings(ListingFilters),
    /// One listing by id (cached under the listings resource)
    Listing(String),
    Categories,
    Subcategories(Option<String>),
    Cities,
    Areas(Option<String>),
}

impl CollectionRequest {
    pub fn resource(&self) -> Resource {
        match self {
            CollectionRequest::Listings(_) | CollectionRequest::Listing(_) => Resource::Listings,
            CollectionRequest::Categories => Resource::Categories,
            CollectionRequest::Subcategories(_) => Resource::Subcategories,
            CollectionRequest::Cities => Resource::Cities,
            CollectionRequest::Areas(_) => Resource::Areas,
        }
    }

    pub fn key(&self) -> QueryKey {
        let mut params = BTreeMap::new();
        match self {
            CollectionRequest::Listings(filters) => params = filters.key_params(),
            CollectionRequest::Listing(id) => {
                params.insert("id", id.trim().to_string());
            }
            CollectionRequest::Subcategories(Some(category)) => {
                params.insert("category_id", category.trim().to_string());
            }
            CollectionRequest::Areas(Some(city)) => {
                params.insert("city_id", city.trim().to_string());
            }
            _ => {}
        }
        QueryKey {
            resource: self.resource(),
            params,
        }
    }

    pub fn query(&self) -> Query {
        match self {
            CollectionRequest::Listings(filters) => filters.to_query(),
            CollectionRequest::Listing(id) => Query::new(Resource::Listings)
                .embed(&LISTING_EMBEDS)
                .eq("id", id.trim()),
            CollectionRequest::Categories => Query::new(Resource::Categories)
                .eq("is_active", true)
                .order("sort_order", true),
            CollectionRequest::Subcategories(category) => {
                let mut query = Query::new(Resource::Subcategories).eq("is_active", true);
                if let Some(category) = category {
                    query = query.eq("category_id", category.trim());
                }
                query.order("sort_order", true)
            }
            CollectionRequest::Cities => Query::new(Resource::Cities)
                .eq("is_active", true)
                .order("name", true),
            CollectionRequest::Areas(city) => {
                let mut query = Query::new(Resource::Areas).eq("is_active", true);
                if let Some(city) = city {
                    query = query.eq("city_id", city.trim());
                }
                query.order("name", true)
            }
        }
    }

    /// Whether soft-expired listings must be dropped from the result
    pub(crate) fn hides_expired(&self) -> bool {
        matches!(self, CollectionRequest::Listings(f) if f.status == StatusScope::Active)
    }
}

/// Identity of a cache entry: resource plus canonical parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    pub resource: Resource,
    pub params: BTreeMap<&'static str, String>,
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}
