//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use classifieds_client::config::CacheConfig;
use classifieds_client::data::{DataService, InMemoryDataService, Query, Resource};
use classifieds_client::identity::InMemoryIdentityService;
use classifieds_client::{AuthState, Listings, QueryCache, ServiceError, SessionManager};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::watch;

static INIT_LOGGING: Once = Once::new();

/// Route client logs to the test harness output
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "classifieds_client=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Listing row with the fields the filters look at
pub fn listing(id: &str, title: &str, description: &str, category: &str, price: f64) -> Value {
    json!({
        "id": id,
        "seller_id": "seller-1",
        "title": title,
        "slug": format!("listing-{id}"),
        "description": description,
        "price": price,
        "category_id": category,
        "images": ["https://img.example/1.jpg"],
        "status": "active",
        "is_featured": false,
        "views": 0,
        "created_at": Utc::now().to_rfc3339(),
    })
}

/// A small marketplace: three categories, eight listings
pub async fn seed_marketplace(store: &InMemoryDataService) {
    store
        .seed(
            Resource::Categories,
            [
                json!({"id": "cars", "name": "Cars", "slug": "cars", "sort_order": 1}),
                json!({"id": "phones", "name": "Phones", "slug": "phones", "sort_order": 2}),
                json!({"id": "furniture", "name": "Furniture", "slug": "furniture", "sort_order": 3}),
            ],
        )
        .await;

    let mut featured = listing("4", "iPhone 12", "Unlocked, 128GB", "phones", 200.0);
    featured["is_featured"] = json!(true);
    let mut sold = listing("8", "Honda Civic", "Sold last week", "cars", 5000.0);
    sold["status"] = json!("sold");

    store
        .seed(
            Resource::Listings,
            [
                listing("1", "Toyota Camry 2015", "Low mileage", "cars", 9500.0),
                listing("2", "Camry bumper", "Fits 2012-2017 models", "cars", 150.0),
                listing("3", "Used sedan", "Runs like a CAMRY, cheap", "cars", 100.0),
                featured,
                listing("5", "Oak dining table", "Seats six", "furniture", 120.0),
                listing("6", "Galaxy S21", "Minor scratches", "phones", 199.99),
                listing("7", "Bookshelf", "Pine, five shelves", "furniture", 201.0),
                sold,
            ],
        )
        .await;
}

/// Data service that counts selects and can hold, fail or refuse calls
///
/// A held select reads its rows first and then waits, so it answers with
/// data as of the moment it was issued.
pub struct InstrumentedDataService {
    pub store: Arc<InMemoryDataService>,
    open: watch::Sender<bool>,
    fail_selects: AtomicBool,
    fail_profile_inserts: AtomicBool,
    selects: AtomicU64,
}

impl InstrumentedDataService {
    pub fn new(store: Arc<InMemoryDataService>) -> Self {
        Self {
            store,
            open: watch::Sender::new(true),
            fail_selects: AtomicBool::new(false),
            fail_profile_inserts: AtomicBool::new(false),
            selects: AtomicU64::new(0),
        }
    }

    pub fn hold(&self) {
        self.open.send_replace(false);
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    pub fn fail_selects(&self, fail: bool) {
        self.fail_selects.store(fail, Ordering::SeqCst);
    }

    pub fn fail_profile_inserts(&self, fail: bool) {
        self.fail_profile_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn select_calls(&self) -> u64 {
        self.selects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataService for InstrumentedDataService {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, ServiceError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        let rows = if self.fail_selects.load(Ordering::SeqCst) {
            Err(ServiceError::Upstream {
                status: 503,
                message: "service unavailable".into(),
            })
        } else {
            self.store.select(query).await
        };
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
        rows
    }

    async fn insert(&self, resource: Resource, row: Value) -> Result<Value, ServiceError> {
        if resource == Resource::Profiles && self.fail_profile_inserts.load(Ordering::SeqCst) {
            return Err(ServiceError::Upstream {
                status: 403,
                message: "new row violates row-level security policy".into(),
            });
        }
        self.store.insert(resource, row).await
    }

    async fn update(
        &self,
        resource: Resource,
        id: &str,
        changes: Value,
    ) -> Result<Value, ServiceError> {
        self.store.update(resource, id, changes).await
    }

    async fn delete(&self, resource: Resource, id: &str) -> Result<(), ServiceError> {
        self.store.delete(resource, id).await
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, ServiceError> {
        self.store.rpc(function, args).await
    }
}

/// Everything a consumer would hold, wired to in-memory backends
pub struct Harness {
    pub identity: Arc<InMemoryIdentityService>,
    pub data: Arc<InstrumentedDataService>,
    pub session: Arc<SessionManager>,
    pub cache: QueryCache,
    pub listings: Listings,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_identity(InMemoryIdentityService::new()).await
    }

    pub async fn with_identity(identity: InMemoryIdentityService) -> Self {
        init_test_logging();
        let store = Arc::new(InMemoryDataService::new());
        seed_marketplace(&store).await;

        let identity = Arc::new(identity);
        let data = Arc::new(InstrumentedDataService::new(store));
        let session = Arc::new(SessionManager::new(identity.clone(), data.clone()));
        session.initialize().await;
        let cache = QueryCache::new(data.clone(), &CacheConfig::default());
        let listings = Listings::new(cache.clone(), Arc::clone(&session));

        Self {
            identity,
            data,
            session,
            cache,
            listings,
        }
    }

    /// Wait (bounded) until the session state satisfies `predicate`
    pub async fn settle<F>(&self, predicate: F) -> AuthState
    where
        F: FnMut(&AuthState) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), self.session.wait_for(predicate))
            .await
            .expect("session state never settled")
    }
}
