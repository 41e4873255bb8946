//! Watchable property feeds
//!
//! A feed delivers, per watched key, one `on_init` followed by any number
//! of `on_add` / `on_remove` notifications. Notifications may arrive on any
//! thread; subscribers must be `Send + Sync`.

use parking_lot::{ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Identifies one watch registration on a store
pub type WatchId = u64;

/// Receiver side of a property feed
pub trait PropertySubscriber<T>: Send + Sync {
    /// First notification for a key; `None` when the feed has no value yet
    fn on_init(&self, key: &str, value: Option<Arc<T>>);

    fn on_add(&self, key: &str, value: Arc<T>);

    fn on_remove(&self, key: &str);
}

/// Watchable key-value store backing one property kind
pub trait PropertyStore<T>: Send + Sync {
    fn watch(&self, key: &str, subscriber: Arc<dyn PropertySubscriber<T>>) -> WatchId;

    fn unwatch(&self, key: &str, id: WatchId);

    fn start(&self) {}

    fn shutdown(&self) {}
}

type Watchers<T> = HashMap<String, Vec<(WatchId, Arc<dyn PropertySubscriber<T>>)>>;

/// In-process property store
///
/// Delivers notifications synchronously on the publishing thread. Delivery
/// is serialized per store, so watchers observe puts for a key in order.
/// The delivery lock is reentrant: a subscriber may watch this same store
/// from inside a notification.
pub struct MemoryStore<T> {
    values: RwLock<HashMap<String, Arc<T>>>,
    watchers: RwLock<Watchers<T>>,
    next_id: AtomicU64,
    delivery: ReentrantMutex<()>,
}

impl<T: Send + Sync + 'static> MemoryStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            watchers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            delivery: ReentrantMutex::new(()),
        }
    }

    /// Publish a value, notifying every watcher of `key` with `on_add`
    pub fn put(&self, key: &str, value: T) {
        let _delivery = self.delivery.lock();
        let value = Arc::new(value);
        self.values.write().insert(key.to_string(), Arc::clone(&value));

        let subscribers = self.subscribers(key);
        debug!(key = %key, watchers = subscribers.len(), "Property put");
        for subscriber in subscribers {
            subscriber.on_add(key, Arc::clone(&value));
        }
    }

    /// Delete a value, notifying every watcher of `key` with `on_remove`
    pub fn remove(&self, key: &str) {
        let _delivery = self.delivery.lock();
        self.values.write().remove(key);

        let subscribers = self.subscribers(key);
        debug!(key = %key, watchers = subscribers.len(), "Property removed");
        for subscriber in subscribers {
            subscriber.on_remove(key);
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.values.read().get(key).cloned()
    }

    #[must_use]
    pub fn watcher_count(&self, key: &str) -> usize {
        self.watchers.read().get(key).map_or(0, Vec::len)
    }

    fn subscribers(&self, key: &str) -> Vec<Arc<dyn PropertySubscriber<T>>> {
        self.watchers
            .read()
            .get(key)
            .map(|subs| subs.iter().map(|(_, sub)| Arc::clone(sub)).collect())
            .unwrap_or_default()
    }
}

impl<T: Send + Sync + 'static> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> PropertyStore<T> for MemoryStore<T> {
    fn watch(&self, key: &str, subscriber: Arc<dyn PropertySubscriber<T>>) -> WatchId {
        let _delivery = self.delivery.lock();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.watchers
            .write()
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::clone(&subscriber)));

        let current = self.get(key);
        subscriber.on_init(key, current);
        id
    }

    fn unwatch(&self, key: &str, id: WatchId) {
        let _delivery = self.delivery.lock();
        let mut watchers = self.watchers.write();
        if let Some(subs) = watchers.get_mut(key) {
            subs.retain(|(watch_id, _)| *watch_id != id);
            if subs.is_empty() {
                watchers.remove(key);
            }
        }
    }
}
