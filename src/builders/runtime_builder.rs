//! Composition root.
//!
//! Builds one cache, one pool monitor and one shutdown coordinator from a
//! validated [`ResilienceConfig`], starts their background loops and registers
//! the default shutdown handlers. Callers hold the returned
//! [`ResilienceRuntime`] and hand out clones of its `Arc`s.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::EphemeralCache;
use crate::config::ResilienceConfig;
use crate::core::{PoolHandle, ResilienceError};
use crate::monitor::PoolMonitor;
use crate::shutdown::{
    RequestGuard, ShutdownCoordinator, ShutdownHandler, ShutdownOnDrop, ShutdownReport,
};
use crate::util::telemetry::flush_telemetry;

/// Name of the handler that stops the cache sweeper.
pub const CACHE_SWEEPER_HANDLER: &str = "cache_sweeper";
/// Priority of [`CACHE_SWEEPER_HANDLER`].
pub const CACHE_SWEEPER_PRIORITY: i32 = 20;
/// Name of the handler that stops monitoring and disposes the pool.
pub const RESOURCE_POOL_HANDLER: &str = "resource_pool";
/// Priority of [`RESOURCE_POOL_HANDLER`].
pub const RESOURCE_POOL_PRIORITY: i32 = 30;
/// Name of the handler that flushes log output.
pub const TELEMETRY_FLUSH_HANDLER: &str = "telemetry_flush";
/// Priority of [`TELEMETRY_FLUSH_HANDLER`].
pub const TELEMETRY_FLUSH_PRIORITY: i32 = 90;

/// Builder for [`ResilienceRuntime`].
pub struct RuntimeBuilder {
    config: ResilienceConfig,
    pool: Option<Arc<dyn PoolHandle>>,
    handlers: Vec<ShutdownHandler>,
}

impl RuntimeBuilder {
    /// Start from an explicit configuration.
    #[must_use]
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            pool: None,
            handlers: Vec::new(),
        }
    }

    /// Start from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::InvalidConfig`] for bad values.
    pub fn from_env() -> Result<Self, ResilienceError> {
        ResilienceConfig::from_env().map(Self::new)
    }

    /// Monitor `pool` and dispose it during shutdown.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<dyn PoolHandle>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Register an extra shutdown handler alongside the defaults.
    #[must_use]
    pub fn with_handler(mut self, handler: ShutdownHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Validate configuration, construct the components and start their
    /// background loops.
    ///
    /// # Errors
    ///
    /// - [`ResilienceError::InvalidConfig`] if validation fails
    /// - [`ResilienceError::Spawn`] if a background thread can't start
    pub fn build<V>(self) -> Result<ResilienceRuntime<V>, ResilienceError>
    where
        V: Send + 'static,
    {
        let config = self.config;
        config.validate().map_err(ResilienceError::InvalidConfig)?;

        let cache = Arc::new(EphemeralCache::new(&config.cache));
        cache.start_sweeper(config.cache.sweep_interval())?;

        let monitor = Arc::new(PoolMonitor::new(&config.monitor));
        if let Some(pool) = self.pool {
            monitor.attach_pool(pool);
        }
        if config.monitor.background {
            monitor.start_background_monitoring(config.monitor.interval())?;
        }

        let coordinator = Arc::new(ShutdownCoordinator::new(&config.shutdown));

        let c = Arc::clone(&cache);
        coordinator.register(
            ShutdownHandler::new(CACHE_SWEEPER_HANDLER, move || {
                c.stop_sweeper();
                Ok(())
            })
            .with_priority(CACHE_SWEEPER_PRIORITY),
        )?;

        let m = Arc::clone(&monitor);
        coordinator.register(
            ShutdownHandler::new(RESOURCE_POOL_HANDLER, move || {
                m.stop_background_monitoring();
                if !m.dispose_pool() {
                    debug!("no pool attached, nothing to dispose");
                }
                Ok(())
            })
            .with_priority(RESOURCE_POOL_PRIORITY),
        )?;

        coordinator.register(
            ShutdownHandler::new(TELEMETRY_FLUSH_HANDLER, || {
                flush_telemetry()?;
                Ok(())
            })
            .with_priority(TELEMETRY_FLUSH_PRIORITY),
        )?;

        for handler in self.handlers {
            coordinator.register(handler)?;
        }

        info!(
            handlers = coordinator.get_status().handlers.len(),
            monitoring = monitor.is_monitoring(),
            "resilience runtime ready"
        );

        Ok(ResilienceRuntime {
            config,
            cache,
            monitor,
            coordinator,
        })
    }
}

/// The constructed components. One per process by convention.
pub struct ResilienceRuntime<V = serde_json::Value> {
    config: ResilienceConfig,
    cache: Arc<EphemeralCache<V>>,
    monitor: Arc<PoolMonitor>,
    coordinator: Arc<ShutdownCoordinator>,
}

impl<V> ResilienceRuntime<V> {
    /// Validated configuration.
    #[must_use]
    pub const fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Shared cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<EphemeralCache<V>> {
        &self.cache
    }

    /// Pool monitor.
    #[must_use]
    pub const fn monitor(&self) -> &Arc<PoolMonitor> {
        &self.monitor
    }

    /// Shutdown coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    /// Count a unit of work until the guard drops.
    pub fn track_request(&self) -> RequestGuard {
        self.coordinator.track_request()
    }

    /// Process-exit fallback guard for `main`.
    pub fn exit_guard(&self) -> ShutdownOnDrop {
        self.coordinator.exit_guard()
    }

    /// Trigger shutdown. See [`ShutdownCoordinator::shutdown`].
    pub fn shutdown(&self) -> Option<ShutdownReport> {
        self.coordinator.shutdown()
    }

    /// Bind termination signals to shutdown. Call from the main runtime.
    ///
    /// # Errors
    ///
    /// See [`crate::runtime::spawn_signal_listener`].
    #[cfg(feature = "tokio-runtime")]
    pub fn spawn_signal_listener(&self) -> Result<tokio::task::JoinHandle<()>, ResilienceError> {
        crate::runtime::spawn_signal_listener(Arc::clone(&self.coordinator))
    }
}
