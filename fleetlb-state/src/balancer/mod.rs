//! Live balancer state and the caches derived from the property feeds

pub mod client_cache;
pub mod listener;
pub mod shutdown;
pub mod state;
pub mod strategy_cache;
pub mod version;

pub use client_cache::{ClientCache, ClientSpec, RefreshMode};
pub use listener::{ListenerRegistry, LoadBalancerStateListener, StateEvent};
pub use shutdown::{Lifecycle, ShutdownCoordinator};
pub use state::{LoadBalancerState, PropertyStores};
pub use strategy_cache::{ClusterLookup, ServiceLookup, StrategyCache};
pub use version::VersionCounter;
