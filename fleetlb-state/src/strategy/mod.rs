//! Load balancing strategies
//!
//! A strategy picks one client handle among the candidates for a request.
//! Strategies are built by name through a [`StrategyFactory`]; the state
//! caches one instance per (service, scheme) and replaces it wholesale
//! when the service or its cluster context changes.

pub mod degrader;
pub mod random;

pub use degrader::{DegraderStrategy, DegraderStrategyFactory};
pub use random::{RandomStrategy, RandomStrategyFactory};

use fleetlb_core::models::{ClusterProperties, PartitionDescriptor, PartitionId};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::client::ClientHandle;
use crate::error::Result;

/// Per-request routing inputs
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Sticky key; requests with the same key prefer the same host
    pub hash_key: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_hash_key(mut self, key: impl Into<String>) -> Self {
        self.hash_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Cluster-derived inputs a strategy is built with
#[derive(Debug, Clone)]
pub struct ClusterContext {
    pub cluster_name: String,
    pub cluster: Option<Arc<ClusterProperties>>,
}

impl ClusterContext {
    #[must_use]
    pub fn new(cluster_name: impl Into<String>, cluster: Option<Arc<ClusterProperties>>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            cluster,
        }
    }

    #[must_use]
    pub fn partitioning(&self) -> Option<&PartitionDescriptor> {
        self.cluster.as_ref().and_then(|c| c.partitioning.as_ref())
    }
}

pub trait LoadBalancerStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Choose a client among `candidates` for `partition_id`
    ///
    /// Candidates without a positive weight for the partition are never
    /// chosen. `None` only when no candidate qualifies.
    fn select_client(
        &self,
        ctx: &RequestContext,
        partition_id: PartitionId,
        candidates: &[Arc<ClientHandle>],
    ) -> Option<Arc<ClientHandle>>;
}

/// Builds strategies of one named kind
pub trait StrategyFactory: Send + Sync {
    fn create(
        &self,
        service_name: &str,
        strategy_properties: &HashMap<String, Value>,
        cluster: &ClusterContext,
    ) -> Result<Arc<dyn LoadBalancerStrategy>>;
}

/// Candidates with a positive weight for `partition_id`, in input order
pub(crate) fn routable_candidates(
    candidates: &[Arc<ClientHandle>],
    partition_id: PartitionId,
) -> Vec<(&Arc<ClientHandle>, f64)> {
    candidates
        .iter()
        .filter_map(|client| {
            client
                .partition_weight(partition_id)
                .filter(|weight| *weight > 0.0)
                .map(|weight| (client, weight))
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::client;
    use super::*;
    use crate::client::NoopClientFactory;

    #[test]
    fn test_routable_candidates_skip_missing_and_zero_weights() {
        let factory = Arc::new(NoopClientFactory::new());
        let clients = vec![
            client(&factory, "http://host-1/", &[(0, 1.0)]),
            client(&factory, "http://host-2/", &[(0, 0.0)]),
            client(&factory, "http://host-3/", &[(1, 1.0)]),
            client(&factory, "http://host-4/", &[(0, 2.0), (1, 1.0)]),
        ];

        let routable = routable_candidates(&clients, 0);
        let hosts: Vec<&str> = routable.iter().map(|(c, _)| c.uri().as_str()).collect();
        assert_eq!(hosts, vec!["http://host-1/", "http://host-4/"]);
        assert_eq!(routable[1].1, 2.0);
    }

    #[test]
    fn test_request_context_builder() {
        let ctx = RequestContext::new()
            .with_hash_key("member-42")
            .with_attribute("region", "us-east");
        assert_eq!(ctx.hash_key.as_deref(), Some("member-42"));
        assert_eq!(ctx.attributes.get("region").map(String::as_str), Some("us-east"));
    }
}
