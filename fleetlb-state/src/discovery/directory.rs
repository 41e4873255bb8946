//! Per-kind cache of watched properties
//!
//! A directory remembers which keys are watched, keeps the latest value
//! delivered for each and hands out one-shot completion signals that fire
//! once the initial value has been processed.

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use super::store::{PropertyStore, PropertySubscriber, WatchId};
use super::{ListenEvent, PropertyKind};

/// Cached value of a watched key
///
/// `property` stays `None` until the feed delivers a value, and again
/// after the value is removed.
#[derive(Debug)]
pub struct PropertyItem<T> {
    property: Option<Arc<T>>,
}

impl<T> PropertyItem<T> {
    #[must_use]
    pub const fn property(&self) -> Option<&Arc<T>> {
        self.property.as_ref()
    }
}

struct Waiters {
    initialized: bool,
    pending: Vec<oneshot::Sender<ListenEvent>>,
}

struct WatchEntry<T> {
    item: ArcSwap<PropertyItem<T>>,
    waiters: Mutex<Waiters>,
    watch_id: Mutex<Option<WatchId>>,
}

impl<T> WatchEntry<T> {
    fn new() -> Self {
        Self {
            item: ArcSwap::from_pointee(PropertyItem { property: None }),
            waiters: Mutex::new(Waiters {
                initialized: false,
                pending: Vec::new(),
            }),
            watch_id: Mutex::new(None),
        }
    }
}

pub struct Directory<T> {
    kind: PropertyKind,
    store: Arc<dyn PropertyStore<T>>,
    entries: DashMap<String, Arc<WatchEntry<T>>>,
}

impl<T: Send + Sync + 'static> Directory<T> {
    #[must_use]
    pub fn new(kind: PropertyKind, store: Arc<dyn PropertyStore<T>>) -> Self {
        Self {
            kind,
            store,
            entries: DashMap::new(),
        }
    }

    /// Watch `key` if not already watched
    ///
    /// The returned receiver completes once the initial value (possibly
    /// "no value") has been cached and processed; immediately if that
    /// already happened.
    pub fn listen_to(
        &self,
        key: &str,
        subscriber: &Arc<dyn PropertySubscriber<T>>,
    ) -> oneshot::Receiver<ListenEvent> {
        let (tx, rx) = oneshot::channel();

        // The shard lock must be released before watching: stores may
        // deliver `on_init` synchronously.
        let (entry, fresh) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(WatchEntry::new());
                vacant.insert(Arc::clone(&entry));
                (entry, true)
            }
        };

        {
            let mut waiters = entry.waiters.lock();
            let event = ListenEvent {
                kind: self.kind,
                name: key.to_string(),
            };
            if waiters.initialized {
                let _ = tx.send(event);
            } else {
                waiters.pending.push(tx);
            }
        }

        if fresh {
            debug!(kind = %self.kind, key = %key, "Watching property");
            let id = self.store.watch(key, Arc::clone(subscriber));
            *entry.watch_id.lock() = Some(id);
        }

        rx
    }

    #[must_use]
    pub fn is_listening(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// `None` if `key` was never watched
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<PropertyItem<T>>> {
        self.entries.get(key).map(|entry| entry.item.load_full())
    }

    /// Current value of `key`, if watched and present
    #[must_use]
    pub fn property(&self, key: &str) -> Option<Arc<T>> {
        self.get(key).and_then(|item| item.property.clone())
    }

    /// Replace the cached value; returns `false` for unwatched keys
    pub fn set(&self, key: &str, property: Option<Arc<T>>) -> bool {
        let Some(entry) = self.entries.get(key).map(|e| Arc::clone(e.value())) else {
            return false;
        };
        entry.item.store(Arc::new(PropertyItem { property }));
        true
    }

    /// Fire the completion signals of `key`; later listeners complete at once
    pub fn mark_initialized(&self, key: &str) {
        let Some(entry) = self.entries.get(key).map(|e| Arc::clone(e.value())) else {
            return;
        };

        let pending = {
            let mut waiters = entry.waiters.lock();
            waiters.initialized = true;
            std::mem::take(&mut waiters.pending)
        };

        for tx in pending {
            let _ = tx.send(ListenEvent {
                kind: self.kind,
                name: key.to_string(),
            });
        }
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop every watch registration on the backing store
    pub fn unwatch_all(&self) {
        let entries: Vec<(String, Arc<WatchEntry<T>>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        for (key, entry) in entries {
            if let Some(id) = entry.watch_id.lock().take() {
                self.store.unwatch(&key, id);
            }
        }
        self.store.shutdown();
    }

    pub fn start(&self) {
        self.store.start();
    }
}
