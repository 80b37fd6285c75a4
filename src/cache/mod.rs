//! Thread-safe in-process cache with per-entry TTL.
//!
//! Expired entries are never returned: `get` checks expiry and deletes stale
//! entries as it goes. The optional background sweeper only bounds memory held
//! by keys that are written once and never read again.
//!
//! ```
//! use resilience_core::cache::EphemeralCache;
//! use resilience_core::config::CacheConfig;
//!
//! let cache = EphemeralCache::new(&CacheConfig::default());
//! cache.set("campaigns:1", 42_u32, 60);
//! cache.set("users:1", 7_u32, 0);
//! assert_eq!(cache.get("campaigns:1"), Some(42));
//!
//! assert_eq!(cache.clear(Some("campaigns:*")).unwrap(), 1);
//! assert_eq!(cache.get("users:1"), Some(7));
//! ```

pub mod memoize;
pub mod pattern;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::core::{PeriodicTask, ResilienceError};

pub use memoize::{cache_key, Memoized};
pub use pattern::KeyPattern;

/// Convert a TTL in seconds to an expiry duration. `<= 0` means never expire.
#[must_use]
pub fn ttl_from_secs(ttl_secs: i64) -> Option<Duration> {
    u64::try_from(ttl_secs)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

/// A cached value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Owning key.
    pub key: String,
    /// Cached value.
    pub value: V,
    /// When the entry was written.
    pub created_at: Instant,
    /// When the entry stops being served. `None` never expires.
    pub expires_at: Option<Instant>,
    /// Last successful `get`.
    pub last_accessed: Instant,
    /// Successful `get`s since the entry was written.
    pub hit_count: u64,
}

impl<V> CacheEntry<V> {
    fn new(key: String, value: V, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            key,
            value,
            created_at: now,
            // An expiry past the end of `Instant` never arrives.
            expires_at: ttl.and_then(|t| now.checked_add(t)),
            last_accessed: now,
            hit_count: 0,
        }
    }

    /// Whether the entry has passed its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Read-only metadata about a live entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Successful `get`s since the entry was written.
    pub hit_count: u64,
    /// Time since the entry was written.
    pub age: Duration,
    /// Time left before expiry. `None` never expires.
    pub ttl_remaining: Option<Duration>,
    /// Time since the last successful `get` (or write).
    pub idle: Duration,
}

/// Cache statistics computed from live state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Successful lookups.
    pub hit_count: u64,
    /// Lookups for absent or expired keys.
    pub miss_count: u64,
    /// `hits / (hits + misses)`, 0 when nothing has been looked up.
    pub hit_rate: f64,
    /// Entries currently stored, expired-but-unswept included.
    pub entry_count: usize,
    /// Shallow size estimate: keys plus fixed entry overhead.
    pub memory_estimate_bytes: usize,
}

struct CacheInner<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> CacheInner<V> {
    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }
}

/// Expiring key/value store. All operations take one short mutex.
pub struct EphemeralCache<V> {
    inner: Arc<CacheInner<V>>,
    config: CacheConfig,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl<V> EphemeralCache<V> {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
            config: config.clone(),
            sweeper: Mutex::new(None),
        }
    }

    /// TTL applied by memoized functions that don't set their own.
    #[must_use]
    pub fn default_ttl(&self) -> Option<Duration> {
        ttl_from_secs(self.config.default_ttl_secs)
    }

    /// Store `value` under `key`, replacing any existing entry and its
    /// statistics. `ttl_secs <= 0` means the entry never expires.
    pub fn set(&self, key: impl Into<String>, value: V, ttl_secs: i64) {
        self.set_with_ttl(key, value, ttl_from_secs(ttl_secs));
    }

    /// Store `value` with an explicit TTL. `None` or a zero duration never
    /// expires.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let ttl = ttl.filter(|t| !t.is_zero());
        let entry = CacheEntry::new(key.clone(), value, ttl, Instant::now());
        self.inner.entries.lock().insert(key, entry);
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.entries.lock().remove(key).is_some()
    }

    /// Remove all entries, or only those whose key matches a `*` glob.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::InvalidPattern`] if the pattern cannot be
    /// compiled.
    pub fn clear(&self, pattern: Option<&str>) -> Result<usize, ResilienceError> {
        let removed = match pattern {
            None => {
                let mut entries = self.inner.entries.lock();
                let n = entries.len();
                entries.clear();
                n
            }
            Some(glob) => {
                let pattern = KeyPattern::compile(glob)?;
                let mut entries = self.inner.entries.lock();
                let before = entries.len();
                entries.retain(|key, _| !pattern.matches(key));
                before - entries.len()
            }
        };
        debug!(pattern = pattern.unwrap_or("*"), removed, "cache cleared");
        Ok(removed)
    }

    /// Delete every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    /// Entry metadata without counting a hit.
    #[must_use]
    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        let now = Instant::now();
        let entries = self.inner.entries.lock();
        let entry = entries.get(key).filter(|e| !e.is_expired(now))?;
        Some(EntryInfo {
            hit_count: entry.hit_count,
            age: now.saturating_duration_since(entry.created_at),
            ttl_remaining: entry.expires_at.map(|at| at.saturating_duration_since(now)),
            idle: now.saturating_duration_since(entry.last_accessed),
        })
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let (entry_count, key_bytes) = {
            let entries = self.inner.entries.lock();
            (entries.len(), entries.keys().map(String::len).sum::<usize>())
        };
        let hit_count = self.inner.hits.load(Ordering::Relaxed);
        let miss_count = self.inner.misses.load(Ordering::Relaxed);
        let total = hit_count + miss_count;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total == 0 {
            0.0
        } else {
            hit_count as f64 / total as f64
        };
        CacheStats {
            hit_count,
            miss_count,
            hit_rate,
            entry_count,
            // Keys are stored twice: map key and entry key.
            memory_estimate_bytes: entry_count * std::mem::size_of::<CacheEntry<V>>()
                + key_bytes * 2,
        }
    }

    /// Stop the background sweeper if it is running. Returns whether one was
    /// stopped.
    pub fn stop_sweeper(&self) -> bool {
        let Some(task) = self.sweeper.lock().take() else {
            return false;
        };
        task.stop();
        info!("cache sweeper stopped");
        true
    }

    /// Whether the background sweeper is running.
    #[must_use]
    pub fn sweeper_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }
}

impl<V: Clone> EphemeralCache<V> {
    /// Look up `key`. Expired entries count as a miss and are deleted.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        let mut expired = false;
        let hit = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.hit_count += 1;
                entry.last_accessed = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                expired = true;
                None
            }
            None => None,
        };
        if expired {
            entries.remove(key);
        }
        drop(entries);

        let counter = if hit.is_some() {
            &self.inner.hits
        } else {
            &self.inner.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// Concurrent misses for the same key may each run `f`; the last write
    /// wins.
    pub fn get_or_insert_with<F>(&self, key: &str, ttl: Option<Duration>, f: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = f();
        self.set_with_ttl(key, value.clone(), ttl);
        value
    }

    /// Fallible [`get_or_insert_with`](Self::get_or_insert_with). Errors are
    /// returned to the caller and nothing is cached.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `f`.
    pub fn try_get_or_insert_with<F, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = f()?;
        self.set_with_ttl(key, value.clone(), ttl);
        Ok(value)
    }
}

impl<V: Send + 'static> EphemeralCache<V> {
    /// Start the background sweeper. Returns `Ok(false)` if one is already
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::Spawn`] if the sweeper thread can't start.
    pub fn start_sweeper(&self, interval: Duration) -> Result<bool, ResilienceError> {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            debug!("cache sweeper already running");
            return Ok(false);
        }
        let inner = Arc::clone(&self.inner);
        let verbose = self.config.sweep_verbose;
        let task = PeriodicTask::spawn("cache-sweeper", interval, move || {
            let removed = inner.sweep_expired();
            if verbose {
                info!(removed, "cache sweep finished");
            } else if removed > 0 {
                debug!(removed, "cache sweep finished");
            }
        })?;
        *slot = Some(task);
        info!(interval_secs = interval.as_secs_f64(), "cache sweeper started");
        Ok(true)
    }
}

impl<V> Default for EphemeralCache<V> {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl<V> Drop for EphemeralCache<V> {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.stop();
        }
    }
}
