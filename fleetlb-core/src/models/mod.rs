//! Property types carried by the cluster, service and URI feeds

pub mod cluster;
pub mod partition;
pub mod service;
pub mod uri;

pub use cluster::ClusterProperties;
pub use partition::{HashAlgorithm, PartitionData, PartitionDescriptor, PartitionId, DEFAULT_PARTITION_ID};
pub use service::ServiceProperties;
pub use uri::UriProperties;
