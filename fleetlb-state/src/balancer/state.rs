//! Live load balancer state
//!
//! Ties the three property directories to the strategy and client caches.
//! Feed notifications publish the new value, bump the version and then
//! rebuild whatever was derived from it. All lookups are lock-free reads
//! of published snapshots.

use dashmap::{DashMap, DashSet};
use fleetlb_core::config::StateConfig;
use fleetlb_core::models::{ClusterProperties, ServiceProperties, UriProperties};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use super::client_cache::{ClientCache, ClientSpec, RefreshMode};
use super::listener::{ListenerRegistry, LoadBalancerStateListener};
use super::shutdown::{Lifecycle, ShutdownCoordinator};
use super::strategy_cache::StrategyCache;
use super::version::VersionCounter;
use crate::client::{ClientConfig, ClientFactory, ClientHandle};
use crate::discovery::{
    Directory, ListenCompletion, PropertyItem, PropertyKind, PropertyStore, PropertySubscriber,
};
use crate::error::{Error, Result};
use crate::strategy::{LoadBalancerStrategy, StrategyFactory};

/// The backing feeds, one per property kind
pub struct PropertyStores {
    pub clusters: Arc<dyn PropertyStore<ClusterProperties>>,
    pub services: Arc<dyn PropertyStore<ServiceProperties>>,
    pub uris: Arc<dyn PropertyStore<UriProperties>>,
}

/// Client-side view of clusters, services and hosts
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct LoadBalancerState {
    inner: Arc<StateInner>,
}

struct StateInner {
    clusters: Directory<ClusterProperties>,
    services: Directory<ServiceProperties>,
    uris: Directory<UriProperties>,
    cluster_feed: Arc<dyn PropertySubscriber<ClusterProperties>>,
    service_feed: Arc<dyn PropertySubscriber<ServiceProperties>>,
    uri_feed: Arc<dyn PropertySubscriber<UriProperties>>,
    services_by_cluster: DashMap<String, DashSet<String>>,
    strategies: StrategyCache,
    clients: ClientCache,
    listeners: ListenerRegistry,
    version: VersionCounter,
    coordinator: ShutdownCoordinator,
}

struct ClusterFeed(Weak<StateInner>);
struct ServiceFeed(Weak<StateInner>);
struct UriFeed(Weak<StateInner>);

impl PropertySubscriber<ClusterProperties> for ClusterFeed {
    fn on_init(&self, key: &str, value: Option<Arc<ClusterProperties>>) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_cluster(key, value, true);
        }
    }

    fn on_add(&self, key: &str, value: Arc<ClusterProperties>) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_cluster(key, Some(value), false);
        }
    }

    fn on_remove(&self, key: &str) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_cluster(key, None, false);
        }
    }
}

impl PropertySubscriber<ServiceProperties> for ServiceFeed {
    fn on_init(&self, key: &str, value: Option<Arc<ServiceProperties>>) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_service(key, value, true);
        }
    }

    fn on_add(&self, key: &str, value: Arc<ServiceProperties>) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_service(key, Some(value), false);
        }
    }

    fn on_remove(&self, key: &str) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_service(key, None, false);
        }
    }
}

impl PropertySubscriber<UriProperties> for UriFeed {
    fn on_init(&self, key: &str, value: Option<Arc<UriProperties>>) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_uris(key, value, true);
        }
    }

    fn on_add(&self, key: &str, value: Arc<UriProperties>) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_uris(key, Some(value), false);
        }
    }

    fn on_remove(&self, key: &str) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_uris(key, None, false);
        }
    }
}

impl StateInner {
    fn on_cluster(&self, name: &str, value: Option<Arc<ClusterProperties>>, init: bool) {
        let Some(_gate) = self.coordinator.enter() else {
            debug!(cluster = %name, "Ignoring cluster update after shutdown");
            return;
        };

        if let Some(Err(e)) = value.as_deref().map(ClusterProperties::validate) {
            warn!(cluster = %name, error = %e, "Cluster properties failed validation");
        }

        self.clusters.set(name, value.clone());
        let version = self.version.bump();
        debug!(cluster = %name, version, present = value.is_some(), "Cluster properties updated");

        for service in self.services_for_cluster(name) {
            self.strategies.refresh_if_stale(
                &service,
                &|s| self.services.property(s),
                &|c| self.clusters.property(c),
                &self.listeners,
            );
        }

        self.clients.refresh_cluster(
            name,
            RefreshMode::Rebuild,
            &|key, uri| self.resolve_client(key, uri),
            &self.listeners,
            &self.coordinator,
        );

        if init {
            self.clusters.mark_initialized(name);
        }
    }

    fn on_service(&self, name: &str, value: Option<Arc<ServiceProperties>>, init: bool) {
        let Some(_gate) = self.coordinator.enter() else {
            debug!(service = %name, "Ignoring service update after shutdown");
            return;
        };

        let previous = self.services.property(name);
        self.services.set(name, value.clone());
        let version = self.version.bump();
        debug!(service = %name, version, present = value.is_some(), "Service properties updated");

        if let Some(previous) = previous {
            let moved = value.as_ref().is_none_or(|v| v.cluster_name != previous.cluster_name);
            if moved {
                if let Some(services) = self.services_by_cluster.get(&previous.cluster_name) {
                    services.remove(name);
                }
            }
        }

        match &value {
            Some(props) => {
                if props.service_name != name {
                    warn!(
                        service = %name,
                        declared = %props.service_name,
                        "Service properties declare a different name"
                    );
                }
                self.services_by_cluster
                    .entry(props.cluster_name.clone())
                    .or_default()
                    .insert(name.to_string());

                if !self.clusters.is_listening(&props.cluster_name) {
                    info!(service = %name, cluster = %props.cluster_name, "Listening to service cluster");
                    let _ = self.listen_cluster(&props.cluster_name);
                }

                self.strategies
                    .refresh(props, &|c| self.clusters.property(c), &self.listeners);
            }
            None => self.strategies.remove(name, &self.listeners),
        }

        self.clients.refresh_route(
            name,
            RefreshMode::Rebuild,
            &|key, uri| self.resolve_client(key, uri),
            &self.listeners,
            &self.coordinator,
        );

        if init {
            self.services.mark_initialized(name);
        }
    }

    fn on_uris(&self, cluster: &str, value: Option<Arc<UriProperties>>, init: bool) {
        let Some(_gate) = self.coordinator.enter() else {
            debug!(cluster = %cluster, "Ignoring host list update after shutdown");
            return;
        };

        let hosts = value.as_ref().map_or(0, |v| v.partition_desc.len());
        self.uris.set(cluster, value);
        let version = self.version.bump();
        debug!(cluster = %cluster, version, hosts, "Host list updated");

        self.clients.refresh_cluster(
            cluster,
            RefreshMode::Reweigh,
            &|key, uri| self.resolve_client(key, uri),
            &self.listeners,
            &self.coordinator,
        );

        if init {
            self.uris.mark_initialized(cluster);
        }
    }

    /// Watch the cluster and its host list
    fn listen_cluster(&self, name: &str) -> ListenCompletion {
        let uris = self.uris.listen_to(name, &self.uri_feed);
        let cluster = self.clusters.listen_to(name, &self.cluster_feed);
        ListenCompletion::new(PropertyKind::Cluster, name, vec![uris, cluster])
    }

    fn services_for_cluster(&self, cluster: &str) -> Vec<String> {
        self.services_by_cluster
            .get(cluster)
            .map(|services| services.iter().map(|s| s.key().clone()).collect())
            .unwrap_or_default()
    }

    /// A routing key names a watched service or, failing that, a cluster
    fn resolve_client(&self, routing_key: &str, uri: &Url) -> Option<ClientSpec> {
        let (cluster_name, config) = match self.services.get(routing_key) {
            Some(item) => {
                let service = item.property()?;
                if service.is_banned(uri) {
                    return None;
                }
                (
                    service.cluster_name.clone(),
                    service.transport_client_properties.clone(),
                )
            }
            None => (routing_key.to_string(), ClientConfig::new()),
        };

        let cluster = self.clusters.property(&cluster_name)?;
        if cluster.is_banned(uri) {
            return None;
        }
        let weights = self.uris.property(&cluster_name)?.routable_weights(uri)?;

        Some(ClientSpec {
            cluster_name,
            weights,
            config,
        })
    }
}

impl LoadBalancerState {
    /// Build a state over `stores`
    ///
    /// `client_factories` are keyed by URI scheme, `strategy_factories`
    /// by strategy name. Nothing is watched until a `listen_to_*` call.
    #[must_use]
    pub fn new(
        config: &StateConfig,
        stores: PropertyStores,
        client_factories: HashMap<String, Arc<dyn ClientFactory>>,
        strategy_factories: HashMap<String, Arc<dyn StrategyFactory>>,
    ) -> Self {
        let client_schemes: HashSet<String> = client_factories.keys().cloned().collect();
        let inner = Arc::new_cyclic(|weak: &Weak<StateInner>| StateInner {
            clusters: Directory::new(PropertyKind::Cluster, stores.clusters),
            services: Directory::new(PropertyKind::Service, stores.services),
            uris: Directory::new(PropertyKind::Uri, stores.uris),
            cluster_feed: Arc::new(ClusterFeed(weak.clone())),
            service_feed: Arc::new(ServiceFeed(weak.clone())),
            uri_feed: Arc::new(UriFeed(weak.clone())),
            services_by_cluster: DashMap::new(),
            strategies: StrategyCache::new(strategy_factories, client_schemes),
            clients: ClientCache::new(client_factories),
            listeners: ListenerRegistry::new(),
            version: VersionCounter::new(),
            coordinator: ShutdownCoordinator::new(config.client_retire_delay(), config.client_shutdown_retries),
        });
        Self { inner }
    }

    /// Start the backing feeds
    pub fn start(&self) -> Result<()> {
        let _gate = self.inner.coordinator.enter().ok_or(Error::ShutDown)?;
        self.inner.clusters.start();
        self.inner.services.start();
        self.inner.uris.start();
        info!("Balancer state started");
        Ok(())
    }

    /// Watch a cluster and its host list
    pub fn listen_to_cluster(&self, cluster: &str) -> Result<ListenCompletion> {
        let _gate = self.inner.coordinator.enter().ok_or(Error::ShutDown)?;
        Ok(self.inner.listen_cluster(cluster))
    }

    /// Watch a service; its cluster is watched as soon as it is known
    pub fn listen_to_service(&self, service: &str) -> Result<ListenCompletion> {
        let _gate = self.inner.coordinator.enter().ok_or(Error::ShutDown)?;
        let done = self.inner.services.listen_to(service, &self.inner.service_feed);
        Ok(ListenCompletion::new(PropertyKind::Service, service, vec![done]))
    }

    #[must_use]
    pub fn is_listening_to_cluster(&self, cluster: &str) -> bool {
        self.inner.clusters.is_listening(cluster)
    }

    #[must_use]
    pub fn is_listening_to_service(&self, service: &str) -> bool {
        self.inner.services.is_listening(service)
    }

    #[must_use]
    pub fn is_listening_to_uri(&self, cluster: &str) -> bool {
        self.inner.uris.is_listening(cluster)
    }

    /// `None` if never watched; an item without a value if watched but
    /// absent from the feed
    #[must_use]
    pub fn get_cluster_properties(&self, cluster: &str) -> Option<Arc<PropertyItem<ClusterProperties>>> {
        self.inner.clusters.get(cluster)
    }

    #[must_use]
    pub fn get_service_properties(&self, service: &str) -> Option<Arc<PropertyItem<ServiceProperties>>> {
        self.inner.services.get(service)
    }

    #[must_use]
    pub fn get_uri_properties(&self, cluster: &str) -> Option<Arc<PropertyItem<UriProperties>>> {
        self.inner.uris.get(cluster)
    }

    /// Client for `uri` under a service or cluster name
    ///
    /// Created on first use. `None` unless the routing key's properties
    /// are present and list `uri` with a positive weight.
    #[must_use]
    pub fn get_client(&self, routing_key: &str, uri: &Url) -> Option<Arc<ClientHandle>> {
        let gate = self.inner.coordinator.try_enter();
        self.inner.clients.get_or_create(
            routing_key,
            uri,
            &|key, uri| self.inner.resolve_client(key, uri),
            gate.is_some(),
            &self.inner.listeners,
        )
    }

    /// Clients already created under `routing_key`
    #[must_use]
    pub fn get_clients(&self, routing_key: &str) -> Vec<Arc<ClientHandle>> {
        self.inner.clients.clients(routing_key)
    }

    #[must_use]
    pub fn get_client_count(&self) -> usize {
        self.inner.clients.len()
    }

    #[must_use]
    pub fn get_strategy(&self, service: &str, scheme: &str) -> Option<Arc<dyn LoadBalancerStrategy>> {
        self.inner.strategies.get(service, scheme)
    }

    #[must_use]
    pub fn get_strategies(&self, service: &str) -> HashMap<String, Arc<dyn LoadBalancerStrategy>> {
        self.inner.strategies.get_all(service)
    }

    /// Rebuild the strategies of `service` from the given properties
    ///
    /// Every call publishes fresh instances, even for unchanged input.
    pub fn refresh_service_strategies(&self, service: &ServiceProperties) -> Result<()> {
        let _gate = self.inner.coordinator.enter().ok_or(Error::ShutDown)?;
        self.inner
            .strategies
            .refresh(service, &|c| self.inner.clusters.property(c), &self.inner.listeners);
        Ok(())
    }

    /// Watched services whose properties point at `cluster`
    #[must_use]
    pub fn services_for_cluster(&self, cluster: &str) -> Vec<String> {
        let mut services = self.inner.services_for_cluster(cluster);
        services.sort_unstable();
        services
    }

    /// Number of feed notifications processed so far
    #[must_use]
    pub fn get_version(&self) -> u64 {
        self.inner.version.current()
    }

    pub fn register(&self, listener: Arc<dyn LoadBalancerStateListener>) {
        self.inner.listeners.register(listener);
    }

    pub fn unregister(&self, listener: &Arc<dyn LoadBalancerStateListener>) -> bool {
        self.inner.listeners.unregister(listener)
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.coordinator.lifecycle()
    }

    #[must_use]
    pub fn subscribe_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.inner.coordinator.subscribe()
    }

    /// Shut down clients whose retirement was deferred for lack of a runtime
    pub async fn reap_retired_clients(&self) -> usize {
        self.inner.coordinator.reap_deferred().await
    }

    /// Stop watching, shut down every client and mark the state stopped
    ///
    /// Strategies stay readable afterwards; client lookups return `None`.
    /// Must not be called from inside a listener notification.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.coordinator.begin_shutdown()?;

        self.inner.clusters.unwatch_all();
        self.inner.services.unwatch_all();
        self.inner.uris.unwatch_all();

        let live = self.inner.clients.drain();
        self.inner.coordinator.finish(live).await;
        Ok(())
    }
}

impl fmt::Debug for LoadBalancerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancerState")
            .field("version", &self.get_version())
            .field("lifecycle", &self.lifecycle())
            .field("clients", &self.get_client_count())
            .finish_non_exhaustive()
    }
}
