//! Client handle cache keyed by (routing key, host URI)
//!
//! Handles are created lazily on first lookup and rebuilt or reweighed
//! when the properties they were derived from change. Every slot has its
//! own write lock; lookups only read the published handle and never wait
//! for a rebuild in progress.

use arc_swap::ArcSwapOption;
use dashmap::{DashMap, DashSet};
use fleetlb_core::models::{PartitionData, PartitionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::listener::{ListenerRegistry, StateEvent};
use super::shutdown::ShutdownCoordinator;
use crate::client::{ClientConfig, ClientFactory, ClientHandle};

/// Everything needed to build a handle for one host
#[derive(Debug, Clone)]
pub struct ClientSpec {
    pub cluster_name: String,
    pub weights: HashMap<PartitionId, PartitionData>,
    pub config: ClientConfig,
}

/// Resolves the current [`ClientSpec`] of a (routing key, URI) pair;
/// `None` when the host must not be served
pub type Resolver<'a> = &'a dyn Fn(&str, &Url) -> Option<ClientSpec>;

/// How existing handles react to a property change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Cluster or service changed: build a new handle
    Rebuild,
    /// Host list changed: keep the handle, swap its weights
    Reweigh,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    routing_key: String,
    uri: Url,
}

struct ClientSlot {
    /// `true` once evicted; a closed slot is never reused
    write: Mutex<bool>,
    current: ArcSwapOption<ClientHandle>,
}

impl ClientSlot {
    fn new() -> Self {
        Self {
            write: Mutex::new(false),
            current: ArcSwapOption::empty(),
        }
    }
}

pub struct ClientCache {
    slots: DashMap<ClientKey, Arc<ClientSlot>>,
    routes_by_cluster: DashMap<String, DashSet<String>>,
    factories: HashMap<String, Arc<dyn ClientFactory>>,
}

impl ClientCache {
    #[must_use]
    pub fn new(factories: HashMap<String, Arc<dyn ClientFactory>>) -> Self {
        Self {
            slots: DashMap::new(),
            routes_by_cluster: DashMap::new(),
            factories,
        }
    }

    /// Published handle for the pair, creating it when `may_create`
    ///
    /// Never blocks: if another thread is building the same handle the
    /// currently published value (possibly `None`) is returned.
    pub fn get_or_create(
        &self,
        routing_key: &str,
        uri: &Url,
        resolve: Resolver<'_>,
        may_create: bool,
        listeners: &ListenerRegistry,
    ) -> Option<Arc<ClientHandle>> {
        let key = ClientKey {
            routing_key: routing_key.to_string(),
            uri: uri.clone(),
        };

        if let Some(handle) = self.slots.get(&key).and_then(|slot| slot.current.load_full()) {
            return Some(handle);
        }
        if !may_create {
            return None;
        }

        let slot = Arc::clone(
            self.slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(ClientSlot::new()))
                .value(),
        );
        let Some(mut closed) = slot.write.try_lock() else {
            return slot.current.load_full();
        };
        if *closed {
            return None;
        }
        if let Some(handle) = slot.current.load_full() {
            return Some(handle);
        }

        // The route is indexed before the final resolve. A host-list update
        // that missed the index entry published its data before we read it;
        // one that found it blocks on this slot and re-derives the handle.
        let built = self
            .resolve_indexed(routing_key, uri, resolve)
            .and_then(|spec| self.build(uri, &spec));
        let Some(handle) = built else {
            *closed = true;
            self.slots.remove_if(&key, |_, s| Arc::ptr_eq(s, &slot));
            return None;
        };

        slot.current.store(Some(Arc::clone(&handle)));
        drop(closed);

        debug!(routing_key = %routing_key, uri = %uri, "Client created");
        listeners.dispatch(&StateEvent::ClientAdded {
            routing_key: routing_key.to_string(),
            client: Arc::clone(&handle),
        });
        Some(handle)
    }

    /// Re-derive every handle cached under `routing_key`
    pub fn refresh_route(
        &self,
        routing_key: &str,
        mode: RefreshMode,
        resolve: Resolver<'_>,
        listeners: &ListenerRegistry,
        coordinator: &ShutdownCoordinator,
    ) {
        let slots: Vec<(ClientKey, Arc<ClientSlot>)> = self
            .slots
            .iter()
            .filter(|entry| entry.key().routing_key == routing_key)
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (key, slot) in slots {
            let mut closed = slot.write.lock();
            if *closed {
                continue;
            }
            let Some(current) = slot.current.load_full() else {
                continue;
            };

            let next = match resolve(&key.routing_key, &key.uri) {
                Some(spec) if mode == RefreshMode::Reweigh => {
                    current.update_partitions(spec.weights);
                    continue;
                }
                Some(spec) => self.build(&key.uri, &spec),
                None => None,
            };

            match next {
                Some(handle) => {
                    slot.current.store(Some(Arc::clone(&handle)));
                    drop(closed);
                    debug!(routing_key = %routing_key, uri = %key.uri, "Client rebuilt");
                    listeners.dispatch(&StateEvent::ClientRemoved {
                        routing_key: key.routing_key.clone(),
                        client: Arc::clone(&current),
                    });
                    listeners.dispatch(&StateEvent::ClientAdded {
                        routing_key: key.routing_key.clone(),
                        client: handle,
                    });
                }
                None => {
                    *closed = true;
                    slot.current.store(None);
                    self.slots.remove_if(&key, |_, s| Arc::ptr_eq(s, &slot));
                    drop(closed);
                    info!(routing_key = %routing_key, uri = %key.uri, "Client evicted");
                    listeners.dispatch(&StateEvent::ClientRemoved {
                        routing_key: key.routing_key.clone(),
                        client: Arc::clone(&current),
                    });
                }
            }
            coordinator.retire(current);
        }
    }

    /// Re-derive every handle whose routing key resolves through `cluster`
    pub fn refresh_cluster(
        &self,
        cluster: &str,
        mode: RefreshMode,
        resolve: Resolver<'_>,
        listeners: &ListenerRegistry,
        coordinator: &ShutdownCoordinator,
    ) {
        let routes: Vec<String> = self
            .routes_by_cluster
            .get(cluster)
            .map(|routes| routes.iter().map(|r| r.key().clone()).collect())
            .unwrap_or_default();

        for route in routes {
            self.refresh_route(&route, mode, resolve, listeners, coordinator);
        }
    }

    /// Published handles of `routing_key`
    #[must_use]
    pub fn clients(&self, routing_key: &str) -> Vec<Arc<ClientHandle>> {
        self.slots
            .iter()
            .filter(|entry| entry.key().routing_key == routing_key)
            .filter_map(|entry| entry.value().current.load_full())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().current.load().is_some())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every slot and hand back the handles they held
    pub fn drain(&self) -> Vec<Arc<ClientHandle>> {
        let slots: Vec<Arc<ClientSlot>> = self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        let mut handles = Vec::with_capacity(slots.len());
        for slot in slots {
            let mut closed = slot.write.lock();
            *closed = true;
            if let Some(handle) = slot.current.swap(None) {
                handles.push(handle);
            }
        }
        self.slots.clear();
        self.routes_by_cluster.clear();
        handles
    }

    /// Resolve until the cluster the route is indexed under stops moving
    fn resolve_indexed(&self, routing_key: &str, uri: &Url, resolve: Resolver<'_>) -> Option<ClientSpec> {
        let mut spec = resolve(routing_key, uri)?;
        loop {
            self.routes_by_cluster
                .entry(spec.cluster_name.clone())
                .or_default()
                .insert(routing_key.to_string());

            let next = resolve(routing_key, uri)?;
            if next.cluster_name == spec.cluster_name {
                return Some(next);
            }
            spec = next;
        }
    }

    fn build(&self, uri: &Url, spec: &ClientSpec) -> Option<Arc<ClientHandle>> {
        let Some(factory) = self.factories.get(uri.scheme()) else {
            debug!(uri = %uri, "No client factory for scheme");
            return None;
        };

        match factory.create_client(uri, &spec.config) {
            Ok(transport) => Some(Arc::new(ClientHandle::new(
                uri.clone(),
                spec.weights.clone(),
                transport,
                Arc::clone(factory),
            ))),
            Err(e) => {
                warn!(uri = %uri, cluster = %spec.cluster_name, error = %e, "Client creation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::listener::test_support::RecordingListener;
    use crate::client::NoopClientFactory;
    use parking_lot::RwLock;
    use std::time::Duration;

    struct Fixture {
        factory: Arc<NoopClientFactory>,
        cache: ClientCache,
        listeners: ListenerRegistry,
        recorder: Arc<RecordingListener>,
        coordinator: ShutdownCoordinator,
        hosts: RwLock<HashMap<Url, f64>>,
    }

    impl Fixture {
        fn new() -> Self {
            let factory = Arc::new(NoopClientFactory::new());
            let mut factories: HashMap<String, Arc<dyn ClientFactory>> = HashMap::new();
            factories.insert("http".to_string(), factory.clone());
            let listeners = ListenerRegistry::new();
            let recorder = Arc::new(RecordingListener::default());
            listeners.register(recorder.clone());
            Self {
                factory,
                cache: ClientCache::new(factories),
                listeners,
                recorder,
                coordinator: ShutdownCoordinator::new(Duration::ZERO, 0),
                hosts: RwLock::new(HashMap::new()),
            }
        }

        fn resolve(&self, _routing_key: &str, uri: &Url) -> Option<ClientSpec> {
            let weight = *self.hosts.read().get(uri)?;
            Some(ClientSpec {
                cluster_name: "cluster-1".to_string(),
                weights: HashMap::from([(0, PartitionData::new(weight))]),
                config: ClientConfig::new(),
            })
        }

        fn get(&self, uri: &Url) -> Option<Arc<ClientHandle>> {
            self.cache
                .get_or_create("service-1", uri, &|k, u| self.resolve(k, u), true, &self.listeners)
        }

        fn refresh(&self, mode: RefreshMode) {
            self.cache.refresh_cluster(
                "cluster-1",
                mode,
                &|k, u| self.resolve(k, u),
                &self.listeners,
                &self.coordinator,
            );
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_creates_once_and_caches() {
        let fx = Fixture::new();
        let uri = url("http://host-1/");
        fx.hosts.write().insert(uri.clone(), 1.0);

        let first = fx.get(&uri).unwrap();
        let second = fx.get(&uri).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fx.factory.created_count(), 1);
        assert_eq!(fx.cache.len(), 1);
        assert_eq!(fx.recorder.take(), vec!["client+ service-1 http://host-1/"]);
    }

    #[test]
    fn test_unknown_host_or_scheme_is_absent() {
        let fx = Fixture::new();
        assert!(fx.get(&url("http://host-1/")).is_none());

        let https = url("https://host-1/");
        fx.hosts.write().insert(https.clone(), 1.0);
        assert!(fx.get(&https).is_none());

        assert!(fx.cache.is_empty());
        assert_eq!(fx.factory.created_count(), 0);
    }

    #[test]
    fn test_lookup_without_create() {
        let fx = Fixture::new();
        let uri = url("http://host-1/");
        fx.hosts.write().insert(uri.clone(), 1.0);

        let found = fx
            .cache
            .get_or_create("service-1", &uri, &|k, u| fx.resolve(k, u), false, &fx.listeners);
        assert!(found.is_none());
        assert_eq!(fx.factory.created_count(), 0);
    }

    #[test]
    fn test_reweigh_keeps_handle() {
        let fx = Fixture::new();
        let uri = url("http://host-1/");
        fx.hosts.write().insert(uri.clone(), 1.0);
        let before = fx.get(&uri).unwrap();
        fx.recorder.take();

        fx.hosts.write().insert(uri.clone(), 3.0);
        fx.refresh(RefreshMode::Reweigh);

        let after = fx.get(&uri).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.partition_weight(0), Some(3.0));
        assert!(fx.recorder.take().is_empty());
    }

    #[test]
    fn test_rebuild_replaces_and_retires() {
        let fx = Fixture::new();
        let uri = url("http://host-1/");
        fx.hosts.write().insert(uri.clone(), 1.0);
        let before = fx.get(&uri).unwrap();
        fx.recorder.take();

        fx.refresh(RefreshMode::Rebuild);

        let after = fx.get(&uri).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(
            fx.recorder.take(),
            vec!["client- service-1 http://host-1/", "client+ service-1 http://host-1/"]
        );
        assert_eq!(fx.factory.created_count(), 2);
    }

    #[test]
    fn test_vanished_host_is_evicted() {
        let fx = Fixture::new();
        let uri = url("http://host-1/");
        fx.hosts.write().insert(uri.clone(), 1.0);
        fx.get(&uri).unwrap();
        fx.recorder.take();

        fx.hosts.write().clear();
        fx.refresh(RefreshMode::Reweigh);

        assert!(fx.get(&uri).is_none());
        assert!(fx.cache.clients("service-1").is_empty());
        assert_eq!(fx.recorder.take(), vec!["client- service-1 http://host-1/"]);
    }

    #[test]
    fn test_host_removed_during_first_lookup_is_not_cached() {
        let fx = Fixture::new();
        let uri = url("http://host-1/");
        fx.hosts.write().insert(uri.clone(), 1.0);
        let first_resolve = std::cell::Cell::new(true);

        // The host list loses the host right after the lookup read it
        let resolve = |key: &str, u: &Url| {
            let spec = fx.resolve(key, u);
            if first_resolve.replace(false) {
                fx.hosts.write().clear();
                fx.refresh(RefreshMode::Reweigh);
            }
            spec
        };
        let found = fx
            .cache
            .get_or_create("service-1", &uri, &resolve, true, &fx.listeners);

        assert!(found.is_none());
        assert!(fx.get(&uri).is_none());
        assert!(fx.cache.is_empty());
        assert_eq!(fx.factory.created_count(), 0);
        assert!(fx.recorder.take().is_empty());
    }

    #[test]
    fn test_drain_returns_live_handles() {
        let fx = Fixture::new();
        for host in ["http://host-1/", "http://host-2/"] {
            let uri = url(host);
            fx.hosts.write().insert(uri.clone(), 1.0);
            fx.get(&uri).unwrap();
        }

        let drained = fx.cache.drain();
        assert_eq!(drained.len(), 2);
        assert!(fx.cache.is_empty());
    }
}
