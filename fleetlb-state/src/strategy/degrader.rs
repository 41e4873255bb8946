//! Weighted consistent-hash selection
//!
//! Each partition gets a hash ring where the heaviest host holds
//! `points_per_weight` points and every other host a share proportional to
//! its weight, so ring size depends on the host count only. Rings are rebuilt off to the side whenever the candidate set
//! or its weights change and then published with a single swap, so a
//! concurrent select always sees either the old or the new ring.

use arc_swap::ArcSwap;
use fleetlb_core::config::StateConfig;
use fleetlb_core::models::PartitionId;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

use super::{routable_candidates, ClusterContext, LoadBalancerStrategy, RequestContext, StrategyFactory};
use crate::client::ClientHandle;
use crate::error::{Error, Result};

pub const DEGRADER_STRATEGY: &str = "degraderV3";

/// Strategy property overriding the ring density
pub const POINTS_PER_WEIGHT_PROPERTY: &str = "pointsPerWeight";

/// Upper bound on ring points per host
pub const MAX_POINTS_PER_HOST: u32 = 10_000;

/// (uri, weight bits) of every routable candidate, sorted
type Fingerprint = Vec<(String, u64)>;

#[derive(Debug)]
struct Ring {
    fingerprint: Fingerprint,
    points: Vec<(u64, usize)>,
    clients: Vec<Arc<ClientHandle>>,
}

impl Ring {
    fn build(fingerprint: Fingerprint, routable: &[(&Arc<ClientHandle>, f64)], points_per_weight: u32) -> Self {
        let max_weight = routable.iter().map(|(_, weight)| *weight).fold(0.0, f64::max);
        let mut points = Vec::with_capacity(routable.len() * points_per_weight as usize);
        let mut clients = Vec::with_capacity(routable.len());

        for (index, (client, weight)) in routable.iter().enumerate() {
            let share = if max_weight > 0.0 { weight / max_weight } else { 1.0 };
            let count = (share * f64::from(points_per_weight)).round().max(1.0) as u64;
            for point in 0..count {
                points.push((hash_of(&(client.uri().as_str(), point)), index));
            }
            clients.push(Arc::clone(client));
        }
        points.sort_unstable();

        Self {
            fingerprint,
            points,
            clients,
        }
    }

    fn pick(&self, hash: u64) -> Option<Arc<ClientHandle>> {
        let position = self.points.partition_point(|(point, _)| *point < hash);
        let (_, index) = self.points.get(position).or_else(|| self.points.first())?;
        self.clients.get(*index).cloned()
    }
}

fn hash_of<H: Hash + ?Sized>(value: &H) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn fingerprint(routable: &[(&Arc<ClientHandle>, f64)]) -> Fingerprint {
    let mut fingerprint: Fingerprint = routable
        .iter()
        .map(|(client, weight)| (client.uri().to_string(), weight.to_bits()))
        .collect();
    fingerprint.sort_unstable();
    fingerprint
}

#[derive(Debug)]
pub struct DegraderStrategy {
    service_name: String,
    points_per_weight: u32,
    rings: ArcSwap<HashMap<PartitionId, Arc<Ring>>>,
}

impl DegraderStrategy {
    #[must_use]
    pub fn new(service_name: impl Into<String>, points_per_weight: u32) -> Self {
        Self {
            service_name: service_name.into(),
            points_per_weight: points_per_weight.clamp(1, MAX_POINTS_PER_HOST),
            rings: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn points_per_weight(&self) -> u32 {
        self.points_per_weight
    }

    fn ring_for(&self, partition_id: PartitionId, routable: &[(&Arc<ClientHandle>, f64)]) -> Arc<Ring> {
        let fingerprint = fingerprint(routable);
        if let Some(ring) = self.rings.load().get(&partition_id) {
            if ring.fingerprint == fingerprint {
                return Arc::clone(ring);
            }
        }

        debug!(
            service = %self.service_name,
            partition_id,
            hosts = routable.len(),
            "Rebuilding hash ring"
        );
        let ring = Arc::new(Ring::build(fingerprint, routable, self.points_per_weight));
        self.rings.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(partition_id, Arc::clone(&ring));
            next
        });
        ring
    }
}

impl LoadBalancerStrategy for DegraderStrategy {
    fn name(&self) -> &str {
        DEGRADER_STRATEGY
    }

    fn select_client(
        &self,
        ctx: &RequestContext,
        partition_id: PartitionId,
        candidates: &[Arc<ClientHandle>],
    ) -> Option<Arc<ClientHandle>> {
        let routable = routable_candidates(candidates, partition_id);
        if routable.is_empty() {
            debug!(service = %self.service_name, partition_id, "No routable candidates");
            return None;
        }

        let hash = ctx
            .hash_key
            .as_deref()
            .map_or_else(rand::random::<u64>, hash_of::<str>);
        self.ring_for(partition_id, &routable).pick(hash)
    }
}

#[derive(Debug)]
pub struct DegraderStrategyFactory {
    default_points_per_weight: u32,
}

impl DegraderStrategyFactory {
    #[must_use]
    pub const fn new(default_points_per_weight: u32) -> Self {
        Self {
            default_points_per_weight,
        }
    }

    #[must_use]
    pub const fn from_config(config: &StateConfig) -> Self {
        Self::new(config.default_points_per_weight)
    }
}

impl Default for DegraderStrategyFactory {
    fn default() -> Self {
        Self::from_config(&StateConfig::default())
    }
}

impl StrategyFactory for DegraderStrategyFactory {
    fn create(
        &self,
        service_name: &str,
        strategy_properties: &HashMap<String, Value>,
        cluster: &ClusterContext,
    ) -> Result<Arc<dyn LoadBalancerStrategy>> {
        let points_per_weight = match strategy_properties.get(POINTS_PER_WEIGHT_PROPERTY) {
            None => self.default_points_per_weight,
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    Error::StrategyCreation(format!(
                        "{POINTS_PER_WEIGHT_PROPERTY} must be a positive integer, got {value}"
                    ))
                })?,
        };

        debug!(
            service = %service_name,
            cluster = %cluster.cluster_name,
            partitions = cluster.partitioning().map(|p| p.partition_count()),
            points_per_weight,
            "Creating degrader strategy"
        );
        Ok(Arc::new(DegraderStrategy::new(service_name, points_per_weight)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NoopClientFactory;
    use crate::strategy::test_support::client;
    use serde_json::json;

    #[test]
    fn test_sticky_key_maps_to_same_host() {
        let factory = Arc::new(NoopClientFactory::new());
        let clients = vec![
            client(&factory, "http://host-1/", &[(0, 1.0)]),
            client(&factory, "http://host-2/", &[(0, 1.0)]),
            client(&factory, "http://host-3/", &[(0, 1.0)]),
        ];
        let strategy = DegraderStrategy::new("service-1", 50);
        let ctx = RequestContext::new().with_hash_key("member-7");

        let first = strategy.select_client(&ctx, 0, &clients).unwrap();
        for _ in 0..20 {
            let again = strategy.select_client(&ctx, 0, &clients).unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
    }

    #[test]
    fn test_never_picks_unroutable_host() {
        let factory = Arc::new(NoopClientFactory::new());
        let clients = vec![
            client(&factory, "http://host-1/", &[(0, 0.0)]),
            client(&factory, "http://host-2/", &[(2, 1.0)]),
            client(&factory, "http://host-3/", &[(1, 1.0)]),
        ];
        let strategy = DegraderStrategy::new("service-1", 10);

        for i in 0..50 {
            let ctx = RequestContext::new().with_hash_key(format!("key-{i}"));
            let chosen = strategy.select_client(&ctx, 2, &clients).unwrap();
            assert_eq!(chosen.uri().as_str(), "http://host-2/");
        }
        assert!(strategy.select_client(&RequestContext::new(), 5, &clients).is_none());
    }

    #[test]
    fn test_ring_follows_candidate_changes() {
        let factory = Arc::new(NoopClientFactory::new());
        let strategy = DegraderStrategy::new("service-1", 10);
        let ctx = RequestContext::new().with_hash_key("member-1");

        let only_one = vec![client(&factory, "http://host-1/", &[(0, 1.0)])];
        assert_eq!(
            strategy.select_client(&ctx, 0, &only_one).unwrap().uri().as_str(),
            "http://host-1/"
        );

        let only_two = vec![client(&factory, "http://host-2/", &[(0, 1.0)])];
        assert_eq!(
            strategy.select_client(&ctx, 0, &only_two).unwrap().uri().as_str(),
            "http://host-2/"
        );
    }

    #[test]
    fn test_ring_size_ignores_weight_magnitude() {
        let factory = Arc::new(NoopClientFactory::new());
        let clients = vec![
            client(&factory, "http://host-1/", &[(0, 1e12)]),
            client(&factory, "http://host-2/", &[(0, 5e11)]),
            client(&factory, "http://host-3/", &[(0, 1e-3)]),
        ];
        let strategy = DegraderStrategy::new("service-1", 10);
        let ctx = RequestContext::new().with_hash_key("member-1");

        assert!(strategy.select_client(&ctx, 0, &clients).is_some());
        let ring = strategy.ring_for(0, &routable_candidates(&clients, 0));
        assert_eq!(ring.points.len(), 10 + 5 + 1);

        let capped = DegraderStrategy::new("service-1", u32::MAX);
        assert_eq!(capped.points_per_weight(), MAX_POINTS_PER_HOST);
    }

    #[test]
    fn test_factory_reads_points_per_weight() {
        let factory = DegraderStrategyFactory::new(100);
        let ctx = ClusterContext::new("cluster-1", None);

        let strategy = factory.create("service-1", &HashMap::new(), &ctx).unwrap();
        assert_eq!(strategy.name(), DEGRADER_STRATEGY);

        let props = HashMap::from([(POINTS_PER_WEIGHT_PROPERTY.to_string(), json!(0))]);
        assert!(matches!(
            factory.create("service-1", &props, &ctx),
            Err(Error::StrategyCreation(_))
        ));

        let props = HashMap::from([(POINTS_PER_WEIGHT_PROPERTY.to_string(), json!(7))]);
        assert!(factory.create("service-1", &props, &ctx).is_ok());
    }
}
