//! Callback lists with RAII subscriptions
//!
//! Used for auth-state notifications, both by identity adapters (pushing
//! events to the session manager) and by the session manager (pushing state
//! to UI consumers). Callbacks run synchronously, in subscription order.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    callbacks: DashMap<u64, Callback<E>>,
}

/// A set of subscribers notified on every published value
pub struct Observers<E> {
    registry: Arc<Registry<E>>,
}

impl<E: 'static> Observers<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                callbacks: DashMap::new(),
            }),
        }
    }

    /// Register a callback. It stays registered until the returned
    /// subscription is dropped or unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.callbacks.insert(id, Arc::new(callback));

        let registry: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription {
            id,
            release: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.callbacks.remove(&id);
                }
            })),
        }
    }

    /// Call every subscriber with `event`
    pub fn notify(&self, event: &E) {
        // Snapshot first: a callback may unsubscribe (or subscribe) while we iterate
        let mut callbacks: Vec<(u64, Callback<E>)> = self
            .registry
            .callbacks
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        callbacks.sort_unstable_by_key(|(id, _)| *id);

        for (_, callback) in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.callbacks.is_empty()
    }
}

impl<E: 'static> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered callback; releases it on drop
pub struct Subscription {
    id: u64,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Release the callback now
    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
