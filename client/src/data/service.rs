//! DataService trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::query::Query;
use crate::error::ServiceError;

/// Named collections exposed by the hosted database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Profiles,
    Listings,
    Categories,
    Subcategories,
    Cities,
    Areas,
}

impl Resource {
    /// Table name on the backend
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Profiles => "profiles",
            Resource::Listings => "listings",
            Resource::Categories => "categories",
            Resource::Subcategories => "subcategories",
            Resource::Cities => "cities",
            Resource::Areas => "areas",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the remote procedure bumping a listing's view counter
pub const INCREMENT_LISTING_VIEWS: &str = "increment_listing_views";

/// Trait for data services (hosted PostgREST or in-memory)
///
/// Rows travel as JSON objects; decoding into typed rows happens in the
/// query layer.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Run a filtered, ordered select
    async fn select(&self, query: &Query) -> Result<Vec<Value>, ServiceError>;

    /// Insert one row and return it as stored
    async fn insert(&self, resource: Resource, row: Value) -> Result<Value, ServiceError>;

    /// Patch the row with `id` and return it as stored
    async fn update(&self, resource: Resource, id: &str, changes: Value)
    -> Result<Value, ServiceError>;

    /// Delete the row with `id`
    async fn delete(&self, resource: Resource, id: &str) -> Result<(), ServiceError>;

    /// Call a remote procedure
    async fn rpc(&self, function: &str, args: Value) -> Result<Value, ServiceError>;

    /// Fetch a single row by id
    async fn get_by_id(&self, resource: Resource, id: &str) -> Result<Option<Value>, ServiceError> {
        let query = Query::new(resource).eq("id", id);
        Ok(self.select(&query).await?.into_iter().next())
    }
}
