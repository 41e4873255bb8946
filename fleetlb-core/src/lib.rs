pub mod models;
pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, LoggingConfig, StateConfig};
pub use error::{Error, Result};
pub use models::{
    ClusterProperties, PartitionData, PartitionDescriptor, PartitionId, ServiceProperties,
    UriProperties, DEFAULT_PARTITION_ID,
};
