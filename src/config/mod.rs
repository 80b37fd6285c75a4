//! Configuration models for the shutdown coordinator, pool monitor and cache.

pub mod resilience;

pub use resilience::{
    CacheConfig, MonitorConfig, PoolConfig, ResilienceConfig, ShutdownConfig, MAX_DURATION_SECS,
};
