use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Partition identifier within a cluster's key space
pub type PartitionId = u32;

/// Partition used by clusters without a partitioning descriptor
pub const DEFAULT_PARTITION_ID: PartitionId = 0;

/// Per-partition data a host advertises
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionData {
    pub weight: f64,
}

impl PartitionData {
    #[must_use]
    pub const fn new(weight: f64) -> Self {
        Self { weight }
    }

    /// Weights must be strictly positive (and finite) to route traffic
    #[must_use]
    pub fn is_routable(&self) -> bool {
        self.weight.is_finite() && self.weight > 0.0
    }
}

/// Hash function used by hash-based partitioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Modulo,
    Md5,
}

/// How a cluster splits its key space into partitions
///
/// Partition assignment for requests happens outside the balancer state;
/// the descriptor is carried as context for strategies and for sanity checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionDescriptor {
    Range {
        key_pattern: String,
        key_range_start: i64,
        partition_size: i64,
        partition_count: u32,
    },
    Hash {
        key_pattern: String,
        partition_count: u32,
        algorithm: HashAlgorithm,
    },
}

impl PartitionDescriptor {
    #[must_use]
    pub fn range(key_pattern: impl Into<String>, key_range_start: i64, partition_size: i64, partition_count: u32) -> Self {
        Self::Range {
            key_pattern: key_pattern.into(),
            key_range_start,
            partition_size,
            partition_count,
        }
    }

    #[must_use]
    pub fn hash(key_pattern: impl Into<String>, partition_count: u32, algorithm: HashAlgorithm) -> Self {
        Self::Hash {
            key_pattern: key_pattern.into(),
            partition_count,
            algorithm,
        }
    }

    #[must_use]
    pub const fn partition_count(&self) -> u32 {
        match self {
            Self::Range { partition_count, .. } | Self::Hash { partition_count, .. } => *partition_count,
        }
    }

    #[must_use]
    pub fn key_pattern(&self) -> &str {
        match self {
            Self::Range { key_pattern, .. } | Self::Hash { key_pattern, .. } => key_pattern,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition_count() == 0 {
            return Err(Error::InvalidProperty(
                "partition count must be greater than zero".to_string(),
            ));
        }
        if let Self::Range { partition_size, .. } = self {
            if *partition_size <= 0 {
                return Err(Error::InvalidProperty(format!(
                    "range partition size must be positive, got {partition_size}"
                )));
            }
        }
        Ok(())
    }
}
