//! Error types for the balancer state

use thiserror::Error;

/// Balancer state error types
///
/// Missing properties, unresolved strategies and unknown hosts are not
/// errors; lookups report them as `None`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Balancer state has been shut down")]
    ShutDown,

    #[error("Client creation failed: {0}")]
    ClientCreation(String),

    #[error("Client shutdown failed: {0}")]
    ClientShutdown(String),

    #[error("Strategy creation failed: {0}")]
    StrategyCreation(String),

    #[error(transparent)]
    Core(#[from] fleetlb_core::Error),
}

/// Result type for balancer state operations
pub type Result<T> = std::result::Result<T, Error>;
