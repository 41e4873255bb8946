//! Per-host client handle
//!
//! A handle pairs a transport client with the host's partition weights.
//! Weights are swapped atomically on host-list updates; the transport
//! client is shut down exactly once, by whoever wins the `Alive` ->
//! `ShuttingDown` transition.

use arc_swap::ArcSwap;
use fleetlb_core::models::{PartitionData, PartitionId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use url::Url;

use super::{ClientFactory, TransportClient};
use crate::error::Result;

/// Shutdown state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Alive,
    ShuttingDown,
    ShutDown,
}

impl HandleState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Alive,
            1 => Self::ShuttingDown,
            _ => Self::ShutDown,
        }
    }
}

pub struct ClientHandle {
    uri: Url,
    partitions: ArcSwap<HashMap<PartitionId, PartitionData>>,
    transport: Arc<dyn TransportClient>,
    factory: Arc<dyn ClientFactory>,
    state: AtomicU8,
}

impl ClientHandle {
    #[must_use]
    pub fn new(
        uri: Url,
        partitions: HashMap<PartitionId, PartitionData>,
        transport: Arc<dyn TransportClient>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            uri,
            partitions: ArcSwap::from_pointee(partitions),
            transport,
            factory,
            state: AtomicU8::new(HandleState::Alive as u8),
        }
    }

    #[must_use]
    pub const fn uri(&self) -> &Url {
        &self.uri
    }

    #[must_use]
    pub const fn transport(&self) -> &Arc<dyn TransportClient> {
        &self.transport
    }

    #[must_use]
    pub fn partition_weight(&self, partition_id: PartitionId) -> Option<f64> {
        self.partitions.load().get(&partition_id).map(|data| data.weight)
    }

    /// Snapshot of the current partition weights
    #[must_use]
    pub fn partitions(&self) -> Arc<HashMap<PartitionId, PartitionData>> {
        self.partitions.load_full()
    }

    #[must_use]
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        let mut ids: Vec<PartitionId> = self.partitions.load().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn update_partitions(&self, partitions: HashMap<PartitionId, PartitionData>) {
        if **self.partitions.load() != partitions {
            debug!(uri = %self.uri, "Client partition weights updated");
            self.partitions.store(Arc::new(partitions));
        }
    }

    #[must_use]
    pub fn state(&self) -> HandleState {
        HandleState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state() == HandleState::Alive
    }

    /// Shut the transport client down through its factory
    ///
    /// Only the first call does any work; later calls return `Ok(())`.
    /// Failures are retried `retries` times, after which the handle is
    /// still marked `ShutDown` and the last error is returned.
    pub async fn shutdown(&self, retries: u32) -> Result<()> {
        if self
            .state
            .compare_exchange(
                HandleState::Alive as u8,
                HandleState::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }

        let mut attempt = 0;
        let result = loop {
            match self.factory.shutdown_client(Arc::clone(&self.transport)).await {
                Ok(()) => break Ok(()),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(uri = %self.uri, attempt, error = %e, "Client shutdown failed, retrying");
                }
                Err(e) => {
                    error!(uri = %self.uri, attempts = attempt + 1, error = %e, "Giving up on client shutdown");
                    break Err(e);
                }
            }
        };

        self.state.store(HandleState::ShutDown as u8, Ordering::Release);
        debug!(uri = %self.uri, "Client shut down");
        result
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("uri", &self.uri.as_str())
            .field("partitions", &self.partitions.load())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, NoopClientFactory};

    fn handle(factory: &Arc<NoopClientFactory>) -> ClientHandle {
        let uri = Url::parse("http://host-1/test").unwrap();
        let transport = factory.create_client(&uri, &ClientConfig::new()).unwrap();
        ClientHandle::new(
            uri,
            HashMap::from([(0, PartitionData::new(1.0)), (3, PartitionData::new(2.5))]),
            transport,
            factory.clone(),
        )
    }

    #[test]
    fn test_partition_lookup() {
        let factory = Arc::new(NoopClientFactory::new());
        let handle = handle(&factory);

        assert_eq!(handle.partition_weight(0), Some(1.0));
        assert_eq!(handle.partition_weight(3), Some(2.5));
        assert_eq!(handle.partition_weight(1), None);
        assert_eq!(handle.partition_ids(), vec![0, 3]);
    }

    #[test]
    fn test_update_partitions_swaps_snapshot() {
        let factory = Arc::new(NoopClientFactory::new());
        let handle = handle(&factory);
        let before = handle.partitions();

        handle.update_partitions(HashMap::from([(1, PartitionData::new(4.0))]));

        assert_eq!(before.len(), 2);
        assert_eq!(handle.partition_ids(), vec![1]);
        assert_eq!(handle.partition_weight(1), Some(4.0));
    }

    #[tokio::test]
    async fn test_shutdown_runs_once() {
        let factory = Arc::new(NoopClientFactory::new());
        let handle = handle(&factory);
        assert_eq!(factory.running_clients(), 1);
        assert!(handle.is_alive());

        handle.shutdown(0).await.unwrap();
        handle.shutdown(0).await.unwrap();

        assert_eq!(handle.state(), HandleState::ShutDown);
        assert_eq!(factory.running_clients(), 0);
        assert_eq!(factory.shutdown_count(), 1);
    }
}
