//! Coalescing query cache
//!
//! Entries are keyed by `QueryKey`. Freshness is tracked with a per-resource
//! generation counter: invalidating a resource bumps its generation, and an
//! entry is fresh only if it was filled at the current generation.
//!
//! Key features:
//! - At most one in-flight fetch per key; concurrent callers share its outcome
//! - Fetches run on spawned tasks, so dropping a caller does not cancel them
//! - Responses that finish after an invalidation are handed to their waiters
//!   but never written back
//! - The number of keys is bounded; past the bound, the least recently used
//!   entries without a fetch in flight are dropped
//! - Metrics for hits, misses, coalesced joins, evictions and discarded responses

use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use metrics::{counter, histogram};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::collection::Collection;
use super::key::{CollectionRequest, QueryKey};
use crate::config::CacheConfig;
use crate::data::{DataService, Resource};
use crate::error::{Error, Result, ServiceError};

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Collection>>>>;

struct InFlight {
    generation: u64,
    outcome: SharedFetch,
}

#[derive(Default)]
struct Entry {
    data: Option<Arc<Collection>>,
    error: Option<Error>,
    /// Generation the last outcome was fetched at
    generation: u64,
    fetched_at: Option<Instant>,
    /// Set by `refetch`, cleared by the next successful write
    stale: bool,
    in_flight: Option<InFlight>,
    last_used: Option<Instant>,
}

/// Row-level write against a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(Value),
    Update { id: String, changes: Value },
    Delete { id: String },
}

impl Mutation {
    fn kind(&self) -> &'static str {
        match self {
            Mutation::Create(_) => "create",
            Mutation::Update { .. } => "update",
            Mutation::Delete { .. } => "delete",
        }
    }
}

/// What a consumer renders for one key
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub data: Option<Arc<Collection>>,
    pub error: Option<Error>,
    pub is_loading: bool,
    /// Data is present but would be refetched by the next `fetch`
    pub is_stale: bool,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined an in-flight fetch
    pub coalesced: u64,
    /// Responses dropped because their resource was invalidated meanwhile
    pub stale_discards: u64,
    /// Idle entries dropped to stay within `max_entries`
    pub evictions: u64,
    pub entry_count: usize,
}

struct Inner {
    data: Arc<dyn DataService>,
    entries: DashMap<QueryKey, Entry>,
    generations: DashMap<Resource, u64>,
    max_age: Option<Duration>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    stale_discards: AtomicU64,
    evictions: AtomicU64,
}

/// Key-addressed cache of server-fetched collections
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    pub fn new(data: Arc<dyn DataService>, config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                data,
                entries: DashMap::new(),
                generations: DashMap::new(),
                max_age: config.max_age,
                max_entries: config.max_entries.max(1),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                stale_discards: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    /// Data service the cache reads from and writes through
    pub fn data_service(&self) -> &Arc<dyn DataService> {
        &self.inner.data
    }

    /// Return cached data when fresh, otherwise join or start a fetch
    pub async fn fetch(&self, request: &CollectionRequest) -> Result<Arc<Collection>> {
        let key = request.key();
        let (outcome, started) = {
            let generation = self.inner.generation(key.resource);
            let mut entry = self.inner.entries.entry(key.clone()).or_default();
            entry.last_used = Some(Instant::now());

            if let Some(data) = self.inner.fresh_data(&entry, generation) {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                counter!("classifieds_query_cache_hits_total").increment(1);
                return Ok(data);
            }

            let joinable = entry
                .in_flight
                .as_ref()
                .filter(|in_flight| in_flight.generation == generation)
                .map(|in_flight| in_flight.outcome.clone());

            match joinable {
                Some(outcome) => {
                    self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                    counter!("classifieds_query_cache_coalesced_total").increment(1);
                    debug!("Joining in-flight fetch for {}", key);
                    (outcome, false)
                }
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    counter!("classifieds_query_cache_misses_total").increment(1);
                    let outcome = self.spawn_fetch(request.clone(), key.clone(), generation);
                    entry.in_flight = Some(InFlight {
                        generation,
                        outcome: outcome.clone(),
                    });
                    (outcome, true)
                }
            }
        };

        if started {
            self.inner.evict_idle(&key);
        }
        outcome.await
    }

    /// Mark one key stale and fetch it again (joining a fetch already running)
    pub async fn refetch(&self, request: &CollectionRequest) -> Result<Arc<Collection>> {
        if let Some(mut entry) = self.inner.entries.get_mut(&request.key()) {
            entry.stale = true;
        }
        self.fetch(request).await
    }

    /// Current view of one key, without fetching
    pub fn state(&self, request: &CollectionRequest) -> QueryState {
        let key = request.key();
        let generation = self.inner.generation(key.resource);
        let Some(entry) = self.inner.entries.get(&key) else {
            return QueryState::default();
        };
        let is_stale =
            entry.data.is_some() && self.inner.fresh_data(&entry, generation).is_none();
        QueryState {
            data: entry.data.clone(),
            error: entry.error.clone(),
            is_loading: entry.in_flight.is_some(),
            is_stale,
        }
    }

    /// Last fetched data for a key, fresh or not
    pub fn peek(&self, request: &CollectionRequest) -> Option<Arc<Collection>> {
        self.inner
            .entries
            .get(&request.key())
            .and_then(|entry| entry.data.clone())
    }

    /// Make every entry of `resource` stale
    pub fn invalidate(&self, resource: Resource) {
        let generation = {
            let mut current = self.inner.generations.entry(resource).or_insert(0);
            *current += 1;
            *current
        };
        counter!("classifieds_query_cache_invalidations_total", "resource" => resource.as_str())
            .increment(1);
        debug!("Invalidated {} (generation {})", resource, generation);
    }

    /// Write through to the data service; on success every key of the
    /// resource is invalidated, on failure the cache is left untouched
    pub async fn mutate(&self, resource: Resource, mutation: Mutation) -> Result<Value> {
        let kind = mutation.kind();
        let result = match mutation {
            Mutation::Create(row) => self.inner.data.insert(resource, row).await,
            Mutation::Update { id, changes } => {
                self.inner.data.update(resource, &id, changes).await
            }
            Mutation::Delete { id } => self
                .inner
                .data
                .delete(resource, &id)
                .await
                .map(|()| Value::Null),
        };

        match result {
            Ok(value) => {
                debug!("{} on {} succeeded", kind, resource);
                self.invalidate(resource);
                Ok(value)
            }
            Err(e) => {
                warn!("{} on {} failed: {}", kind, resource, e);
                Err(e.into())
            }
        }
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            stale_discards: self.inner.stale_discards.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            entry_count: self.inner.entries.len(),
        }
    }

    fn spawn_fetch(&self, request: CollectionRequest, key: QueryKey, generation: u64) -> SharedFetch {
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle =
            tokio::spawn(async move { inner.run_fetch(request, task_key, generation).await });

        let inner = Arc::clone(&self.inner);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    // The task never reached write-back; free the slot
                    inner.finish_in_flight(&key, generation);
                    Err(ServiceError::Interrupted(e.to_string()).into())
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    fn generation(&self, resource: Resource) -> u64 {
        self.generations.get(&resource).map_or(0, |g| *g)
    }

    fn fresh_data(&self, entry: &Entry, generation: u64) -> Option<Arc<Collection>> {
        if entry.error.is_some() || entry.stale || entry.generation != generation {
            return None;
        }
        if let (Some(max_age), Some(fetched_at)) = (self.max_age, entry.fetched_at)
            && fetched_at.elapsed() > max_age
        {
            return None;
        }
        entry.data.clone()
    }

    async fn run_fetch(
        &self,
        request: CollectionRequest,
        key: QueryKey,
        generation: u64,
    ) -> Result<Arc<Collection>> {
        let start = Instant::now();
        let result = match self.data.select(&request.query()).await {
            Ok(rows) => Collection::decode(&request, rows, Utc::now())
                .map(Arc::new)
                .map_err(Error::from),
            Err(e) => Err(e.into()),
        };
        histogram!("classifieds_query_fetch_duration_seconds", "resource" => key.resource.as_str())
            .record(start.elapsed().as_secs_f64());

        match &result {
            Ok(data) => debug!("Fetched {} ({} rows) in {:?}", key, data.len(), start.elapsed()),
            Err(e) => warn!("Fetch for {} failed: {}", key, e),
        }

        self.write_back(&key, generation, &result);
        result
    }

    fn write_back(&self, key: &QueryKey, generation: u64, result: &Result<Arc<Collection>>) {
        let current = self.generation(key.resource);
        let Some(mut entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            entry.in_flight = None;
        }

        if generation != current {
            self.stale_discards.fetch_add(1, Ordering::Relaxed);
            counter!("classifieds_query_cache_stale_discards_total").increment(1);
            debug!(
                "Discarding response for {} (generation {} < {})",
                key, generation, current
            );
            return;
        }

        entry.generation = generation;
        entry.fetched_at = Some(Instant::now());
        match result {
            Ok(data) => {
                entry.data = Some(Arc::clone(data));
                entry.error = None;
                entry.stale = false;
            }
            // Previous data stays visible next to the error
            Err(e) => entry.error = Some(e.clone()),
        }
    }

    /// Drop least recently used entries until at most `max_entries` remain.
    /// Entries with a fetch in flight and `keep` itself are never dropped, so
    /// the map may stay over the bound while many fetches run.
    fn evict_idle(&self, keep: &QueryKey) {
        let excess = self.entries.len().saturating_sub(self.max_entries);
        if excess == 0 {
            return;
        }

        let mut idle: Vec<(Option<Instant>, QueryKey)> = self
            .entries
            .iter()
            .filter(|entry| entry.in_flight.is_none() && entry.key() != keep)
            .map(|entry| (entry.last_used, entry.key().clone()))
            .collect();
        idle.sort_by_key(|(last_used, _)| *last_used);

        let mut evicted = 0usize;
        for (_, key) in idle {
            if evicted == excess {
                break;
            }
            // Re-checked under the shard lock: a fetch may have started since
            if self
                .entries
                .remove_if(&key, |_, entry| entry.in_flight.is_none())
                .is_some()
            {
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            counter!("classifieds_query_cache_evictions_total").increment(evicted as u64);
            debug!("Evicted {} idle entries ({} remain)", evicted, self.entries.len());
        }
    }

    fn finish_in_flight(&self, key: &QueryKey, generation: u64) {
        if let Some(mut entry) = self.entries.get_mut(key)
            && entry
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.generation == generation)
        {
            entry.in_flight = None;
        }
    }
}
