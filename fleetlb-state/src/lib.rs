//! Client-side load balancer state
//!
//! Watches cluster, service and host-list properties and keeps, per
//! service and scheme, a load balancing strategy and, per host, a
//! transport client ready for request routing.

pub mod balancer;
pub mod client;
pub mod discovery;
pub mod error;
pub mod strategy;

pub use balancer::{Lifecycle, LoadBalancerState, LoadBalancerStateListener, PropertyStores};
pub use client::{ClientConfig, ClientFactory, ClientHandle, NoopClientFactory, TransportClient};
pub use discovery::{ListenCompletion, ListenEvent, MemoryStore, PropertyItem, PropertyKind, PropertyStore, PropertySubscriber};
pub use error::{Error, Result};
pub use strategy::{
    DegraderStrategyFactory, LoadBalancerStrategy, RandomStrategyFactory, RequestContext, StrategyFactory,
};
