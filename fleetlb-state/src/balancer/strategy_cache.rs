//! Per-service strategy cache
//!
//! Each service owns a scheme -> strategy map that is rebuilt off to the
//! side and published with one atomic swap. Rebuilds of the same service
//! are serialized, and read their inputs under that serialization; readers
//! never wait on them.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use fleetlb_core::models::{ClusterProperties, PartitionDescriptor, ServiceProperties};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::listener::{ListenerRegistry, StateEvent};
use crate::strategy::{ClusterContext, LoadBalancerStrategy, StrategyFactory};

/// Current service properties by name
pub type ServiceLookup<'a> = &'a dyn Fn(&str) -> Option<Arc<ServiceProperties>>;

/// Current cluster properties by name
pub type ClusterLookup<'a> = &'a dyn Fn(&str) -> Option<Arc<ClusterProperties>>;

/// A published strategy and the partitioning it was built against
#[derive(Debug)]
struct StrategyEntry {
    strategy: Arc<dyn LoadBalancerStrategy>,
    partitioning: Option<PartitionDescriptor>,
}

type SchemeMap = HashMap<String, Arc<StrategyEntry>>;

struct ServiceStrategies {
    write: Mutex<()>,
    published: ArcSwap<SchemeMap>,
}

impl ServiceStrategies {
    fn new() -> Self {
        Self {
            write: Mutex::new(()),
            published: ArcSwap::from_pointee(HashMap::new()),
        }
    }
}

pub struct StrategyCache {
    services: DashMap<String, Arc<ServiceStrategies>>,
    factories: HashMap<String, Arc<dyn StrategyFactory>>,
    client_schemes: HashSet<String>,
}

impl StrategyCache {
    /// `client_schemes` are the schemes some client factory can serve
    #[must_use]
    pub fn new(factories: HashMap<String, Arc<dyn StrategyFactory>>, client_schemes: HashSet<String>) -> Self {
        Self {
            services: DashMap::new(),
            factories,
            client_schemes,
        }
    }

    #[must_use]
    pub fn get(&self, service: &str, scheme: &str) -> Option<Arc<dyn LoadBalancerStrategy>> {
        let slot = self.services.get(service)?;
        let published = slot.published.load();
        published.get(scheme).map(|entry| Arc::clone(&entry.strategy))
    }

    /// Every published strategy of `service`, by scheme
    #[must_use]
    pub fn get_all(&self, service: &str) -> HashMap<String, Arc<dyn LoadBalancerStrategy>> {
        self.services
            .get(service)
            .map(|slot| {
                slot.published
                    .load()
                    .iter()
                    .map(|(scheme, entry)| (scheme.clone(), Arc::clone(&entry.strategy)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rebuild and publish every scheme's strategy for `service`
    ///
    /// The cluster is looked up under the service's write lock.
    pub fn refresh(&self, service: &ServiceProperties, clusters: ClusterLookup<'_>, listeners: &ListenerRegistry) {
        let slot = self.slot(&service.service_name);
        let _write = slot.write.lock();
        let cluster = clusters(&service.cluster_name);
        self.publish(&slot, service, cluster, listeners);
    }

    /// Rebuild `service` if its published strategies were built against a
    /// different partitioning than its cluster now has
    ///
    /// Both lookups run under the write lock. A service that has never
    /// published is left to its own service update.
    pub fn refresh_if_stale(
        &self,
        service: &str,
        services: ServiceLookup<'_>,
        clusters: ClusterLookup<'_>,
        listeners: &ListenerRegistry,
    ) -> bool {
        let Some(slot) = self.services.get(service).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        let _write = slot.write.lock();

        let Some(props) = services(service) else {
            return false;
        };
        let cluster = clusters(&props.cluster_name);
        let partitioning = cluster.as_ref().and_then(|c| c.partitioning.as_ref());
        if !is_stale(&slot.published.load(), partitioning) {
            return false;
        }

        debug!(service = %service, cluster = %props.cluster_name, "Cluster partitioning changed");
        self.publish(&slot, &props, cluster, listeners);
        true
    }

    /// Drop every strategy of `service`
    pub fn remove(&self, service: &str, listeners: &ListenerRegistry) {
        let Some(slot) = self.services.get(service).map(|s| Arc::clone(s.value())) else {
            return;
        };
        let _write = slot.write.lock();

        let previous = slot.published.swap(Arc::new(SchemeMap::new()));
        if !previous.is_empty() {
            info!(service = %service, "Removed service strategies");
        }
        self.notify(service, &previous, &SchemeMap::new(), listeners);
    }

    fn slot(&self, service: &str) -> Arc<ServiceStrategies> {
        if let Some(slot) = self.services.get(service) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.services
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(ServiceStrategies::new()))
                .value(),
        )
    }

    /// Caller holds `slot.write`
    fn publish(
        &self,
        slot: &ServiceStrategies,
        service: &ServiceProperties,
        cluster: Option<Arc<ClusterProperties>>,
        listeners: &ListenerRegistry,
    ) {
        let ctx = ClusterContext::new(&service.cluster_name, cluster);
        let mut next = SchemeMap::new();
        for scheme in &service.prioritized_schemes {
            if let Some(entry) = self.resolve(service, scheme, &ctx) {
                next.insert(scheme.clone(), Arc::new(entry));
            }
        }

        info!(
            service = %service.service_name,
            schemes = next.len(),
            "Publishing service strategies"
        );
        let next = Arc::new(next);
        let previous = slot.published.swap(Arc::clone(&next));
        self.notify(&service.service_name, &previous, &next, listeners);
    }

    /// First preferred strategy that builds for `scheme`
    fn resolve(&self, service: &ServiceProperties, scheme: &str, ctx: &ClusterContext) -> Option<StrategyEntry> {
        if !self.client_schemes.contains(scheme) {
            debug!(service = %service.service_name, scheme = %scheme, "No client factory for scheme");
            return None;
        }

        for name in service.strategy_preferences() {
            let Some(factory) = self.factories.get(name) else {
                debug!(service = %service.service_name, strategy = %name, "Unknown strategy, skipping");
                continue;
            };

            match factory.create(&service.service_name, &service.load_balancer_strategy_properties, ctx) {
                Ok(strategy) => {
                    debug!(service = %service.service_name, scheme = %scheme, strategy = %name, "Strategy built");
                    return Some(StrategyEntry {
                        strategy,
                        partitioning: ctx.partitioning().cloned(),
                    });
                }
                Err(e) => {
                    warn!(
                        service = %service.service_name,
                        strategy = %name,
                        error = %e,
                        "Strategy creation failed, trying next"
                    );
                }
            }
        }

        warn!(service = %service.service_name, scheme = %scheme, "No usable strategy for scheme");
        None
    }

    fn notify(&self, service: &str, previous: &SchemeMap, next: &SchemeMap, listeners: &ListenerRegistry) {
        for (scheme, old) in previous {
            listeners.dispatch(&StateEvent::StrategyRemoved {
                service: service.to_string(),
                scheme: scheme.clone(),
                strategy: Arc::clone(&old.strategy),
            });
            if let Some(new) = next.get(scheme) {
                listeners.dispatch(&StateEvent::StrategyAdded {
                    service: service.to_string(),
                    scheme: scheme.clone(),
                    strategy: Arc::clone(&new.strategy),
                });
            }
        }

        for (scheme, new) in next {
            if !previous.contains_key(scheme) {
                listeners.dispatch(&StateEvent::StrategyAdded {
                    service: service.to_string(),
                    scheme: scheme.clone(),
                    strategy: Arc::clone(&new.strategy),
                });
            }
        }
    }
}

fn is_stale(published: &SchemeMap, partitioning: Option<&PartitionDescriptor>) -> bool {
    published
        .values()
        .any(|entry| entry.partitioning.as_ref() != partitioning)
}
