use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use super::partition::{PartitionData, PartitionId};

/// Host list of a cluster with per-partition weights
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UriProperties {
    pub cluster_name: String,
    #[serde(default)]
    pub partition_desc: HashMap<Url, HashMap<PartitionId, PartitionData>>,
}

impl UriProperties {
    #[must_use]
    pub fn new(
        cluster_name: impl Into<String>,
        partition_desc: HashMap<Url, HashMap<PartitionId, PartitionData>>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            partition_desc,
        }
    }

    /// Convenience for single-partition hosts
    #[must_use]
    pub fn with_weights<I>(cluster_name: impl Into<String>, partition_id: PartitionId, weights: I) -> Self
    where
        I: IntoIterator<Item = (Url, f64)>,
    {
        let partition_desc = weights
            .into_iter()
            .map(|(uri, weight)| (uri, HashMap::from([(partition_id, PartitionData::new(weight))])))
            .collect();
        Self::new(cluster_name, partition_desc)
    }

    #[must_use]
    pub fn uris(&self) -> Vec<&Url> {
        self.partition_desc.keys().collect()
    }

    #[must_use]
    pub fn contains(&self, uri: &Url) -> bool {
        self.partition_desc.contains_key(uri)
    }

    #[must_use]
    pub fn partition_data(&self, uri: &Url) -> Option<&HashMap<PartitionId, PartitionData>> {
        self.partition_desc.get(uri)
    }

    /// Positive weights for `uri`, or `None` if the host carries no routable partition
    #[must_use]
    pub fn routable_weights(&self, uri: &Url) -> Option<HashMap<PartitionId, PartitionData>> {
        let weights: HashMap<PartitionId, PartitionData> = self
            .partition_desc
            .get(uri)?
            .iter()
            .filter(|(_, data)| data.is_routable())
            .map(|(id, data)| (*id, *data))
            .collect();
        (!weights.is_empty()).then_some(weights)
    }

    /// Hosts that advertise a positive weight for `partition_id`
    #[must_use]
    pub fn uris_for_partition(&self, partition_id: PartitionId) -> Vec<&Url> {
        self.partition_desc
            .iter()
            .filter(|(_, partitions)| partitions.get(&partition_id).is_some_and(PartitionData::is_routable))
            .map(|(uri, _)| uri)
            .collect()
    }
}
