//! Test Utilities Module
//!
//! Provides fixtures and scripted backends for unit tests.
//! This module is only compiled when running tests.

#![cfg(test)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;

use crate::data::{DataService, InMemoryDataService, Query, Resource};
use crate::error::ServiceError;
use crate::identity::{
    AuthCallback, IdentityError, IdentityService, InMemoryIdentityService, Session, SignUpOutcome,
};
use crate::observer::Subscription;

// ============================================================================
// Fixtures
// ============================================================================

/// Minimal active listing row
pub fn listing_row(id: &str, category: &str, price: f64) -> Value {
    json!({
        "id": id,
        "seller_id": "seller-1",
        "title": format!("Listing {id}"),
        "slug": format!("listing-{id}"),
        "description": "A test listing",
        "price": price,
        "category_id": category,
        "images": ["https://img.example/1.jpg"],
        "status": "active",
        "is_featured": false,
        "views": 0,
        "created_at": Utc::now().to_rfc3339(),
    })
}

/// In-memory backend with two categories and three listings
pub async fn seeded_data() -> Arc<InMemoryDataService> {
    let data = Arc::new(InMemoryDataService::new());
    data.seed(
        Resource::Categories,
        [
            json!({"id": "cars", "name": "Cars", "slug": "cars", "sort_order": 1}),
            json!({"id": "phones", "name": "Phones", "slug": "phones", "sort_order": 2}),
        ],
    )
    .await;
    data.seed(
        Resource::Listings,
        [
            listing_row("1", "cars", 1500.0),
            listing_row("2", "cars", 3000.0),
            listing_row("3", "phones", 200.0),
        ],
    )
    .await;
    data
}

// ============================================================================
// Scripted data service
// ============================================================================

/// Wraps the in-memory backend with switches for holding and failing calls
pub struct ScriptedDataService {
    inner: Arc<InMemoryDataService>,
    open: watch::Sender<bool>,
    fail_selects: AtomicBool,
    fail_writes: AtomicBool,
    selects: AtomicU64,
}

impl ScriptedDataService {
    pub fn new(inner: Arc<InMemoryDataService>) -> Self {
        Self {
            inner,
            open: watch::Sender::new(true),
            fail_selects: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            selects: AtomicU64::new(0),
        }
    }

    /// Selects block until `release_selects`
    pub fn hold_selects(&self) {
        self.open.send_replace(false);
    }

    pub fn release_selects(&self) {
        self.open.send_replace(true);
    }

    pub fn fail_selects(&self, fail: bool) {
        self.fail_selects.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn select_calls(&self) -> u64 {
        self.selects.load(Ordering::SeqCst)
    }

    fn write_guard(&self) -> Result<(), ServiceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ServiceError::Upstream {
                status: 500,
                message: "write refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DataService for ScriptedDataService {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, ServiceError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
        if self.fail_selects.load(Ordering::SeqCst) {
            return Err(ServiceError::Transport("connection reset".into()));
        }
        self.inner.select(query).await
    }

    async fn insert(&self, resource: Resource, row: Value) -> Result<Value, ServiceError> {
        self.write_guard()?;
        self.inner.insert(resource, row).await
    }

    async fn update(
        &self,
        resource: Resource,
        id: &str,
        changes: Value,
    ) -> Result<Value, ServiceError> {
        self.write_guard()?;
        self.inner.update(resource, id, changes).await
    }

    async fn delete(&self, resource: Resource, id: &str) -> Result<(), ServiceError> {
        self.write_guard()?;
        self.inner.delete(resource, id).await
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, ServiceError> {
        self.write_guard()?;
        self.inner.rpc(function, args).await
    }
}

// ============================================================================
// Scripted identity service
// ============================================================================

/// Wraps the in-memory identity service with a failing sign-out switch
pub struct ScriptedIdentityService {
    pub inner: Arc<InMemoryIdentityService>,
    fail_sign_out: AtomicBool,
}

impl ScriptedIdentityService {
    pub fn new(inner: Arc<InMemoryIdentityService>) -> Self {
        Self {
            inner,
            fail_sign_out: AtomicBool::new(false),
        }
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityService for ScriptedIdentityService {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: Value,
    ) -> Result<SignUpOutcome, IdentityError> {
        self.inner.sign_up(email, password, attributes).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        self.inner.sign_in(email, password).await
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(IdentityError::Service(ServiceError::Transport(
                "network unreachable".into(),
            )));
        }
        self.inner.sign_out().await
    }

    async fn current_session(&self) -> Result<Option<Session>, IdentityError> {
        self.inner.current_session().await
    }

    fn subscribe(&self, callback: AuthCallback) -> Subscription {
        self.inner.subscribe(callback)
    }
}
