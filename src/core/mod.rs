//! Core building blocks: errors, background tasks and the bounded resource pool.

pub mod error;
pub mod periodic;
pub mod resource_pool;

pub use error::{AppResult, ResilienceError};
pub use periodic::PeriodicTask;
pub use resource_pool::{
    ListenerId, PoolHandle, PoolLimits, PoolListener, PoolStatus, PooledResource, ResourcePool,
};
