//! Bounded resource pool with overflow and event hooks.
//!
//! The pool keeps up to `pool_size` resources open and may issue up to
//! `max_overflow` more under load. Overflow resources are closed as soon as
//! they are checked back in. Checkout blocks on a `parking_lot::Condvar` until a
//! resource is returned or the checkout budget runs out.
//!
//! Observers implement [`PoolListener`]; anything that wants to observe a pool
//! (the [`PoolMonitor`](crate::monitor::PoolMonitor) in particular) talks to it
//! through the object-safe [`PoolHandle`] trait, so other pool implementations
//! can be monitored the same way.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;
use crate::core::{AppResult, ResilienceError};
use crate::util::clock::deadline_after;

/// Point-in-time accounting of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Nominal pool size.
    pub pool_size: u32,
    /// Resources currently handed out.
    pub checked_out: u32,
    /// Open resources beyond `pool_size`.
    pub overflow: u32,
    /// Idle resources waiting in the pool.
    pub checked_in: u32,
}

/// Receives pool events. Called outside the pool lock, from whichever thread
/// performed the checkout/checkin, so implementations must be cheap and must
/// not block.
pub trait PoolListener: Send + Sync {
    /// A resource was handed out. `overflow` is true when it was created beyond
    /// the nominal pool size.
    fn on_checkout(&self, overflow: bool);
    /// A resource was returned (or discarded after invalidation).
    fn on_checkin(&self);
    /// A resource was invalidated and closed.
    fn on_invalidate(&self, reason: &str);
}

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Object-safe view of a pool used by the monitor and the shutdown handlers.
pub trait PoolHandle: Send + Sync {
    /// Live accounting.
    fn status(&self) -> PoolStatus;
    /// Maximum overflow the pool allows.
    fn max_overflow(&self) -> u32;
    /// Install an event listener.
    fn add_listener(&self, listener: Arc<dyn PoolListener>) -> ListenerId;
    /// Remove a previously installed listener. Returns false if unknown.
    fn remove_listener(&self, id: ListenerId) -> bool;
    /// Close idle resources and refuse further checkouts.
    fn dispose(&self);
}

/// Capacity limits for a [`ResourcePool`].
#[derive(Debug, Clone)]
pub struct PoolLimits {
    /// Nominal number of resources kept open.
    pub pool_size: u32,
    /// Resources that may be issued beyond `pool_size`.
    pub max_overflow: u32,
    /// How long a checkout waits for a free resource.
    pub checkout_timeout: Duration,
}

impl PoolLimits {
    const fn capacity(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow)
    }
}

impl From<&PoolConfig> for PoolLimits {
    fn from(cfg: &PoolConfig) -> Self {
        Self {
            pool_size: cfg.pool_size,
            max_overflow: cfg.max_overflow,
            checkout_timeout: cfg.checkout_timeout(),
        }
    }
}

type Factory<T> = Box<dyn Fn() -> AppResult<T> + Send + Sync>;

struct PoolState<T> {
    idle: VecDeque<T>,
    checked_out: u32,
    disposed: bool,
}

impl<T> PoolState<T> {
    fn open(&self) -> u32 {
        u32::try_from(self.idle.len())
            .unwrap_or(u32::MAX)
            .saturating_add(self.checked_out)
    }
}

/// Bounded pool of resources created on demand by a factory.
pub struct ResourcePool<T> {
    limits: PoolLimits,
    factory: Factory<T>,
    state: Mutex<PoolState<T>>,
    /// Signaled when a resource is returned, closed, or the pool is disposed.
    available: Condvar,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn PoolListener>)>>,
    next_listener_id: AtomicU64,
}

impl<T> ResourcePool<T> {
    /// Create an empty pool. Resources are created lazily on checkout.
    pub fn new<F>(limits: PoolLimits, factory: F) -> Self
    where
        F: Fn() -> AppResult<T> + Send + Sync + 'static,
    {
        Self {
            limits,
            factory: Box::new(factory),
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                checked_out: 0,
                disposed: false,
            }),
            available: Condvar::new(),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Configured limits.
    #[must_use]
    pub const fn limits(&self) -> &PoolLimits {
        &self.limits
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Check out a resource, waiting up to the configured checkout timeout.
    ///
    /// # Errors
    ///
    /// - [`ResilienceError::PoolTimeout`] if nothing frees up in time
    /// - [`ResilienceError::PoolDisposed`] after disposal
    /// - [`ResilienceError::ResourceCreation`] if the factory fails
    pub fn checkout(&self) -> Result<PooledResource<'_, T>, ResilienceError> {
        self.checkout_timeout(self.limits.checkout_timeout)
    }

    /// Check out a resource with an explicit wait budget.
    ///
    /// # Errors
    ///
    /// Same as [`checkout`](Self::checkout).
    pub fn checkout_timeout(
        &self,
        timeout: Duration,
    ) -> Result<PooledResource<'_, T>, ResilienceError> {
        let deadline = deadline_after(timeout);
        let mut state = self.state.lock();
        loop {
            if state.disposed {
                return Err(ResilienceError::PoolDisposed);
            }

            if let Some(item) = state.idle.pop_front() {
                state.checked_out += 1;
                drop(state);
                self.emit(|l| l.on_checkout(false));
                return Ok(PooledResource::new(self, item));
            }

            if state.open() < self.limits.capacity() {
                // Reserve the slot, then create outside the lock.
                state.checked_out += 1;
                let overflow = state.open() > self.limits.pool_size;
                drop(state);
                return self.create_reserved(overflow);
            }

            if deadline.is_some_and(|at| Instant::now() >= at) {
                tracing::warn!(
                    checked_out = state.checked_out,
                    timeout_ms = timeout.as_millis(),
                    "pool checkout timed out"
                );
                return Err(ResilienceError::PoolTimeout(timeout));
            }
            match deadline {
                Some(at) => {
                    self.available.wait_until(&mut state, at);
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    fn create_reserved(&self, overflow: bool) -> Result<PooledResource<'_, T>, ResilienceError> {
        match (self.factory)() {
            Ok(item) => {
                tracing::debug!(overflow, "created pool resource");
                self.emit(|l| l.on_checkout(overflow));
                Ok(PooledResource::new(self, item))
            }
            Err(e) => {
                {
                    let mut state = self.state.lock();
                    state.checked_out -= 1;
                }
                self.available.notify_one();
                tracing::error!(error = %e, "pool resource creation failed");
                Err(ResilienceError::ResourceCreation(e.to_string()))
            }
        }
    }

    fn checkin(&self, item: T) {
        let closed = {
            let mut state = self.state.lock();
            state.checked_out = state.checked_out.saturating_sub(1);
            if state.disposed || state.open() >= self.limits.pool_size {
                Some(item)
            } else {
                state.idle.push_front(item);
                None
            }
        };
        self.available.notify_one();
        // Overflow and post-disposal resources are closed here, outside the lock.
        drop(closed);
        self.emit(|l| l.on_checkin());
    }

    fn discard(&self, item: T, reason: &str) {
        {
            let mut state = self.state.lock();
            state.checked_out = state.checked_out.saturating_sub(1);
        }
        self.available.notify_one();
        drop(item);
        self.emit(|l| l.on_invalidate(reason));
        self.emit(|l| l.on_checkin());
    }

    fn emit<F>(&self, f: F)
    where
        F: Fn(&dyn PoolListener),
    {
        let listeners: Vec<Arc<dyn PoolListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }
}

impl<T: Send> PoolHandle for ResourcePool<T> {
    fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            pool_size: self.limits.pool_size,
            checked_out: state.checked_out,
            overflow: state.open().saturating_sub(self.limits.pool_size),
            checked_in: u32::try_from(state.idle.len()).unwrap_or(u32::MAX),
        }
    }

    fn max_overflow(&self) -> u32 {
        self.limits.max_overflow
    }

    fn add_listener(&self, listener: Arc<dyn PoolListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn dispose(&self) {
        let idle: Vec<T> = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.idle.drain(..).collect()
        };
        self.available.notify_all();
        tracing::info!(closed = idle.len(), "resource pool disposed");
        drop(idle);
    }
}

/// A checked-out resource. Returned to the pool on drop.
pub struct PooledResource<'a, T> {
    pool: &'a ResourcePool<T>,
    item: Option<T>,
}

impl<'a, T> PooledResource<'a, T> {
    const fn new(pool: &'a ResourcePool<T>, item: T) -> Self {
        Self {
            pool,
            item: Some(item),
        }
    }

    /// Close this resource instead of returning it to the pool.
    pub fn invalidate(mut self, reason: &str) {
        if let Some(item) = self.item.take() {
            self.pool.discard(item, reason);
        }
    }
}

impl<T> Deref for PooledResource<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("resource present until drop")
    }
}

impl<T> DerefMut for PooledResource<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("resource present until drop")
    }
}

impl<T> Drop for PooledResource<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.checkin(item);
        }
    }
}
