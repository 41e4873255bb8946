//! State change listeners
//!
//! Listeners hear about strategies and clients being published into or
//! removed from the caches. Notifications are delivered synchronously on
//! the thread that made the change, after the change is visible to
//! readers. When an entry is replaced, `removed(old)` always precedes
//! `added(new)`.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::client::ClientHandle;
use crate::strategy::LoadBalancerStrategy;

/// Observer of strategy and client cache changes
///
/// Implementations must not call back into the state's refresh paths for
/// the same service or routing key from inside a notification.
pub trait LoadBalancerStateListener: Send + Sync {
    fn on_strategy_added(&self, _service: &str, _scheme: &str, _strategy: &Arc<dyn LoadBalancerStrategy>) {}

    fn on_strategy_removed(&self, _service: &str, _scheme: &str, _strategy: &Arc<dyn LoadBalancerStrategy>) {}

    fn on_client_added(&self, _routing_key: &str, _client: &Arc<ClientHandle>) {}

    fn on_client_removed(&self, _routing_key: &str, _client: &Arc<ClientHandle>) {}
}

#[derive(Debug, Clone)]
pub enum StateEvent {
    StrategyAdded {
        service: String,
        scheme: String,
        strategy: Arc<dyn LoadBalancerStrategy>,
    },
    StrategyRemoved {
        service: String,
        scheme: String,
        strategy: Arc<dyn LoadBalancerStrategy>,
    },
    ClientAdded {
        routing_key: String,
        client: Arc<ClientHandle>,
    },
    ClientRemoved {
        routing_key: String,
        client: Arc<ClientHandle>,
    },
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn LoadBalancerStateListener>>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn LoadBalancerStateListener>) {
        let mut listeners = self.listeners.write();
        listeners.push(listener);
        debug!(listeners = listeners.len(), "Listener registered");
    }

    /// Remove `listener`; returns `false` if it was not registered
    pub fn unregister(&self, listener: &Arc<dyn LoadBalancerStateListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        before != listeners.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver `event` to a snapshot of the registered listeners
    pub fn dispatch(&self, event: &StateEvent) {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }

        for listener in &listeners {
            match event {
                StateEvent::StrategyAdded {
                    service,
                    scheme,
                    strategy,
                } => listener.on_strategy_added(service, scheme, strategy),
                StateEvent::StrategyRemoved {
                    service,
                    scheme,
                    strategy,
                } => listener.on_strategy_removed(service, scheme, strategy),
                StateEvent::ClientAdded {
                    routing_key,
                    client,
                } => listener.on_client_added(routing_key, client),
                StateEvent::ClientRemoved {
                    routing_key,
                    client,
                } => listener.on_client_removed(routing_key, client),
            }
        }
    }
}
