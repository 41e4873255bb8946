//! Weighted random selection

use fleetlb_core::models::PartitionId;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{routable_candidates, ClusterContext, LoadBalancerStrategy, RequestContext, StrategyFactory};
use crate::client::ClientHandle;
use crate::error::Result;

pub const RANDOM_STRATEGY: &str = "random";

/// Picks a candidate at random, proportionally to its partition weight
#[derive(Debug)]
pub struct RandomStrategy {
    service_name: String,
}

impl RandomStrategy {
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl LoadBalancerStrategy for RandomStrategy {
    fn name(&self) -> &str {
        RANDOM_STRATEGY
    }

    fn select_client(
        &self,
        _ctx: &RequestContext,
        partition_id: PartitionId,
        candidates: &[Arc<ClientHandle>],
    ) -> Option<Arc<ClientHandle>> {
        let routable = routable_candidates(candidates, partition_id);
        if routable.is_empty() {
            debug!(service = %self.service_name, partition_id, "No routable candidates");
            return None;
        }

        let mut rng = rand::thread_rng();
        routable
            .choose_weighted(&mut rng, |(_, weight)| *weight)
            .ok()
            .map(|(client, _)| Arc::clone(client))
    }
}

#[derive(Debug, Default)]
pub struct RandomStrategyFactory;

impl StrategyFactory for RandomStrategyFactory {
    fn create(
        &self,
        service_name: &str,
        _strategy_properties: &HashMap<String, Value>,
        _cluster: &ClusterContext,
    ) -> Result<Arc<dyn LoadBalancerStrategy>> {
        Ok(Arc::new(RandomStrategy::new(service_name)))
    }
}
