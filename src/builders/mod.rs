//! Builders that wire components together from configuration.

pub mod runtime_builder;

pub use runtime_builder::{
    ResilienceRuntime, RuntimeBuilder, CACHE_SWEEPER_HANDLER, CACHE_SWEEPER_PRIORITY,
    RESOURCE_POOL_HANDLER, RESOURCE_POOL_PRIORITY, TELEMETRY_FLUSH_HANDLER,
    TELEMETRY_FLUSH_PRIORITY,
};
