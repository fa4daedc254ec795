//! PostgREST data service
//!
//! Renders `Query` values as `/rest/v1/<table>` URL parameters and sends
//! writes with `Prefer: return=representation` so the stored row comes back.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Instant;
use tracing::debug;

use super::query::Query;
use super::service::{DataService, Resource};
use crate::error::ServiceError;
use crate::supabase::{SupabaseClient, read_json, send, upstream_error};

const RETURN_REPRESENTATION: &str = "return=representation";

pub struct PostgrestDataService {
    client: SupabaseClient,
}

impl PostgrestDataService {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    fn table_url(&self, resource: Resource) -> String {
        self.client.rest_url(resource.as_str())
    }
}

/// A write answers with an array holding the affected row
fn single_row(rows: Vec<Value>, resource: Resource, id: Option<&str>) -> Result<Value, ServiceError> {
    rows.into_iter().next().ok_or_else(|| match id {
        Some(id) => ServiceError::NotFound(format!("{resource}/{id}")),
        None => ServiceError::Decode(format!("{resource}: write returned no row")),
    })
}

#[async_trait]
impl DataService for PostgrestDataService {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, ServiceError> {
        let start = Instant::now();
        let request = self
            .client
            .authorized(Method::GET, self.table_url(query.resource))
            .await?
            .query(&query.to_postgrest_params());

        let rows: Vec<Value> = read_json(send(request).await?).await?;
        debug!(
            "Selected {} rows from {} in {:?}",
            rows.len(),
            query.resource,
            start.elapsed()
        );
        Ok(rows)
    }

    async fn insert(&self, resource: Resource, row: Value) -> Result<Value, ServiceError> {
        let request = self
            .client
            .authorized(Method::POST, self.table_url(resource))
            .await?
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&row);

        let rows: Vec<Value> = read_json(send(request).await?).await?;
        single_row(rows, resource, None)
    }

    async fn update(
        &self,
        resource: Resource,
        id: &str,
        changes: Value,
    ) -> Result<Value, ServiceError> {
        let request = self
            .client
            .authorized(Method::PATCH, self.table_url(resource))
            .await?
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&changes);

        let rows: Vec<Value> = read_json(send(request).await?).await?;
        single_row(rows, resource, Some(id))
    }

    async fn delete(&self, resource: Resource, id: &str) -> Result<(), ServiceError> {
        let request = self
            .client
            .authorized(Method::DELETE, self.table_url(resource))
            .await?
            .query(&[("id", format!("eq.{id}"))]);

        let response = send(request).await?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }
        Ok(())
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, ServiceError> {
        let request = self
            .client
            .authorized(Method::POST, self.client.rest_url(&format!("rpc/{function}")))
            .await?
            .json(&args);

        let response = send(request).await?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|e| ServiceError::Decode(e.to_string()))
    }
}
