//! Transport client seam and the per-host handles cached by the state

pub mod handle;
pub mod noop;

pub use handle::{ClientHandle, HandleState};
pub use noop::{NoopClientFactory, NoopTransportClient};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::error::Result;

/// Transport-level client configuration taken from service properties
pub type ClientConfig = HashMap<String, Value>;

/// A connection-level client to one host
pub trait TransportClient: Send + Sync + fmt::Debug {
    fn uri(&self) -> &Url;
}

/// Builds and tears down transport clients for one URI scheme
#[async_trait]
pub trait ClientFactory: Send + Sync {
    fn create_client(&self, uri: &Url, config: &ClientConfig) -> Result<Arc<dyn TransportClient>>;

    async fn shutdown_client(&self, client: Arc<dyn TransportClient>) -> Result<()>;

    /// Clients created and not yet shut down
    fn running_clients(&self) -> usize;
}
