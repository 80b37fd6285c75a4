//! # Resilience Core
//!
//! Lifecycle, concurrency and failure handling for a long-running service:
//!
//! - **Shutdown coordination**: drain in-flight work, then run registered
//!   cleanup handlers in priority order, each with its own timeout.
//! - **Resource pool monitoring**: utilization snapshots, monotonic counters,
//!   bounded history and cooldown-limited alerts for a shared bounded pool.
//! - **Ephemeral cache**: a thread-safe key/value store with per-entry TTL,
//!   glob-pattern invalidation and memoization.
//!
//! Components are plain values built once by a composition root and shared
//! through `Arc`; there are no global singletons.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use resilience_core::builders::RuntimeBuilder;
//! use resilience_core::config::ResilienceConfig;
//! use resilience_core::core::{PoolLimits, ResourcePool};
//! use resilience_core::util::init_tracing;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! init_tracing();
//! let config = ResilienceConfig::from_env()?;
//! let pool = Arc::new(ResourcePool::new(PoolLimits::from(&config.pool), || Ok(String::new())));
//!
//! let runtime: resilience_core::builders::ResilienceRuntime = RuntimeBuilder::new(config)
//!     .with_pool(pool.clone())
//!     .build()?;
//! let _exit = runtime.exit_guard();
//!
//! {
//!     let _request = runtime.track_request();
//!     let conn = pool.checkout()?;
//!     // ... use the connection ...
//!     drop(conn);
//! }
//!
//! runtime.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `tokio-runtime` (default): termination signal binding in [`runtime`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders that wire components together from configuration.
pub mod builders;
/// Expiring in-process cache.
pub mod cache;
/// Configuration models and environment loading.
pub mod config;
/// Errors, background tasks and the bounded resource pool.
pub mod core;
/// Resource pool health monitoring.
pub mod monitor;
/// Runtime adapters (signal binding).
#[cfg(feature = "tokio-runtime")]
pub mod runtime;
/// Shutdown coordination.
pub mod shutdown;
/// Shared utilities.
pub mod util;
