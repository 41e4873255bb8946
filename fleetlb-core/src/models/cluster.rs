use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use url::Url;

use super::partition::PartitionDescriptor;
use crate::error::Result;

/// Topology of a named group of hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProperties {
    pub cluster_name: String,
    #[serde(default)]
    pub prioritized_schemes: Vec<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub banned_uris: HashSet<Url>,
    /// `None` means a single implicit partition
    #[serde(default)]
    pub partitioning: Option<PartitionDescriptor>,
}

impl ClusterProperties {
    #[must_use]
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            prioritized_schemes: Vec::new(),
            properties: HashMap::new(),
            banned_uris: HashSet::new(),
            partitioning: None,
        }
    }

    #[must_use]
    pub fn with_schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prioritized_schemes = schemes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_partitioning(mut self, partitioning: PartitionDescriptor) -> Self {
        self.partitioning = Some(partitioning);
        self
    }

    #[must_use]
    pub fn with_banned_uris<I: IntoIterator<Item = Url>>(mut self, uris: I) -> Self {
        self.banned_uris = uris.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        self.partitioning.is_some()
    }

    #[must_use]
    pub fn is_banned(&self, uri: &Url) -> bool {
        self.banned_uris.contains(uri)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(partitioning) = &self.partitioning {
            partitioning.validate()?;
        }
        Ok(())
    }
}
