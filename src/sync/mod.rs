//! Cache-invalidation broadcaster.
//!
//! [`SyncBus`] tells every subscribed store that "something changed" after a
//! successful mutation. It carries no payload: each subscriber re-fetches its
//! own collection in full. The bus is a cheap `Clone` handle and is passed to
//! each store explicitly.

pub mod store;

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub use store::{ResourceState, Source, Store};

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    notifications: AtomicU64,
    // Keyed by subscription id, so iteration follows insertion order.
    subscribers: Mutex<BTreeMap<u64, Callback>>,
}

#[derive(Clone, Default)]
pub struct SyncBus {
    inner: Arc<BusInner>,
}

impl SyncBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` until the returned handle is dropped or unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        subscribers.insert(id, Arc::new(callback));
        tracing::debug!(subscription = id, total = subscribers.len(), "sync subscriber added");

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Runs every current subscriber synchronously and returns how many ran.
    ///
    /// A panicking subscriber is logged and skipped; the rest still run.
    /// Callbacks run outside the lock, so they may subscribe or unsubscribe.
    pub fn notify(&self) -> usize {
        self.inner.notifications.fetch_add(1, Ordering::Relaxed);
        let snapshot: Vec<(u64, Callback)> = {
            let subscribers = self
                .inner
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            subscribers
                .iter()
                .map(|(id, cb)| (*id, cb.clone()))
                .collect()
        };

        tracing::debug!(subscribers = snapshot.len(), "broadcasting data change");
        for (id, callback) in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                tracing::error!(subscription = id, "sync subscriber panicked during notify");
            }
        }
        snapshot.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Total number of `notify` calls on this bus.
    pub fn notifications(&self) -> u64 {
        self.inner.notifications.load(Ordering::Relaxed)
    }
}

/// Handle returned by [`SyncBus::subscribe`]; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let mut subscribers = bus.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subscribers.remove(&self.id);
        }
    }
}
