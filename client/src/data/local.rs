//! In-memory data service
//!
//! Evaluates queries against process-local tables. Used for offline runs of
//! the binary and as the backing store in tests.

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::query::Query;
use super::service::{DataService, INCREMENT_LISTING_VIEWS, Resource};
use crate::error::ServiceError;

/// Tables keyed by row id, kept in insertion order
type Tables = HashMap<Resource, IndexMap<String, Value>>;

pub struct InMemoryDataService {
    tables: RwLock<Tables>,
    select_calls: AtomicU64,
}

impl InMemoryDataService {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            select_calls: AtomicU64::new(0),
        }
    }

    /// Load rows as-is (rows without an `id` get one)
    pub async fn seed(&self, resource: Resource, rows: impl IntoIterator<Item = Value>) {
        let mut tables = self.tables.write().await;
        let table = tables.entry(resource).or_default();
        for mut row in rows {
            let id = ensure_id(&mut row);
            table.insert(id, row);
        }
    }

    /// Number of selects served so far
    pub fn select_calls(&self) -> u64 {
        self.select_calls.load(Ordering::SeqCst)
    }

    pub async fn row_count(&self, resource: Resource) -> usize {
        let tables = self.tables.read().await;
        tables.get(&resource).map_or(0, IndexMap::len)
    }
}

impl Default for InMemoryDataService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataService for InMemoryDataService {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, ServiceError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);

        let tables = self.tables.read().await;
        let mut rows: Vec<Value> = tables
            .get(&query.resource)
            .map(|table| {
                table
                    .values()
                    .filter(|row| query.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        query.sort(&mut rows);

        for row in rows.iter_mut() {
            embed_related(&tables, query, row);
        }

        debug!("Selected {} rows from {}", rows.len(), query.resource);
        Ok(rows)
    }

    async fn insert(&self, resource: Resource, mut row: Value) -> Result<Value, ServiceError> {
        let object = as_object(&mut row)?;
        let now = Utc::now().to_rfc3339();
        object
            .entry("created_at")
            .or_insert_with(|| Value::String(now.clone()));
        object.entry("updated_at").or_insert(Value::String(now));
        let id = ensure_id(&mut row);

        let mut tables = self.tables.write().await;
        let table = tables.entry(resource).or_default();
        if table.contains_key(&id) {
            return Err(ServiceError::Upstream {
                status: 409,
                message: format!("duplicate key value violates unique constraint on {resource}.id"),
            });
        }
        table.insert(id, row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        resource: Resource,
        id: &str,
        mut changes: Value,
    ) -> Result<Value, ServiceError> {
        let changes = as_object(&mut changes)?;

        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(&resource)
            .and_then(|table| table.get_mut(id))
            .ok_or_else(|| ServiceError::NotFound(format!("{resource} {id}")))?;

        let object = as_object(row)?;
        for (key, value) in changes.iter() {
            if key != "id" {
                object.insert(key.clone(), value.clone());
            }
        }
        object.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        Ok(row.clone())
    }

    async fn delete(&self, resource: Resource, id: &str) -> Result<(), ServiceError> {
        let mut tables = self.tables.write().await;
        if let Some(table) = tables.get_mut(&resource) {
            table.shift_remove(id);
        }
        Ok(())
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, ServiceError> {
        match function {
            INCREMENT_LISTING_VIEWS => {
                let listing_id = args
                    .get("listing_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ServiceError::Upstream {
                        status: 400,
                        message: "listing_id is required".to_string(),
                    })?;

                let mut tables = self.tables.write().await;
                let row = tables
                    .get_mut(&Resource::Listings)
                    .and_then(|table| table.get_mut(listing_id))
                    .ok_or_else(|| ServiceError::NotFound(format!("listings {listing_id}")))?;
                let views = row.get("views").and_then(Value::as_u64).unwrap_or(0) + 1;
                as_object(row)?.insert("views".into(), Value::from(views));
                Ok(Value::Null)
            }
            other => Err(ServiceError::NotFound(format!("function {other}"))),
        }
    }
}

fn as_object(row: &mut Value) -> Result<&mut Map<String, Value>, ServiceError> {
    row.as_object_mut().ok_or_else(|| ServiceError::Upstream {
        status: 400,
        message: "row must be a JSON object".to_string(),
    })
}

/// Attach each embed's projection of the row its foreign key points at
fn embed_related(tables: &Tables, query: &Query, row: &mut Value) {
    let Value::Object(object) = row else {
        return;
    };
    for embed in &query.embeds {
        let related = object
            .get(embed.foreign_key)
            .and_then(Value::as_str)
            .and_then(|id| tables.get(&embed.resource)?.get(id));
        object.insert(embed.alias.to_string(), embed.project(related));
    }
}

fn ensure_id(row: &mut Value) -> String {
    match row.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            let id = Uuid::new_v4().to_string();
            if let Some(object) = row.as_object_mut() {
                object.insert("id".into(), Value::String(id.clone()));
            }
            id
        }
    }
}
