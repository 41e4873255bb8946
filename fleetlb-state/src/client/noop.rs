//! Client factory that opens no connections
//!
//! Used for tests and local wiring; it only tracks how many clients are
//! alive so callers can check that every handle was shut down.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;
use url::Url;

use super::{ClientConfig, ClientFactory, TransportClient};
use crate::error::Result;

#[derive(Debug)]
pub struct NoopTransportClient {
    uri: Url,
    id: u64,
}

impl NoopTransportClient {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl TransportClient for NoopTransportClient {
    fn uri(&self) -> &Url {
        &self.uri
    }
}

#[derive(Debug, Default)]
pub struct NoopClientFactory {
    running: AtomicUsize,
    created: AtomicU64,
    shut_down: AtomicUsize,
}

impl NoopClientFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total clients ever created
    #[must_use]
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn shutdown_count(&self) -> usize {
        self.shut_down.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ClientFactory for NoopClientFactory {
    fn create_client(&self, uri: &Url, _config: &ClientConfig) -> Result<Arc<dyn TransportClient>> {
        let id = self.created.fetch_add(1, Ordering::AcqRel) + 1;
        self.running.fetch_add(1, Ordering::AcqRel);
        trace!(uri = %uri, id, "Created noop client");
        Ok(Arc::new(NoopTransportClient {
            uri: uri.clone(),
            id,
        }))
    }

    async fn shutdown_client(&self, client: Arc<dyn TransportClient>) -> Result<()> {
        let _ = self
            .running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.shut_down.fetch_add(1, Ordering::AcqRel);
        trace!(uri = %client.uri(), "Shut down noop client");
        Ok(())
    }

    fn running_clients(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }
}
