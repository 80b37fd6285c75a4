//! Compute-once, reuse-for-TTL wrappers over [`EphemeralCache`].
//!
//! There is no single-flight de-duplication: two callers that miss on the
//! same key at the same time both run the wrapped function, and the later
//! write wins. Callers that need at-most-once execution per key must add
//! their own coordination.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use super::{ttl_from_secs, EphemeralCache};
use crate::core::ResilienceError;

/// Build a deterministic cache key `"{prefix}:{hash}"` from serializable
/// arguments.
///
/// Keys are stable for the lifetime of the process, which is all an
/// in-process cache needs.
///
/// # Errors
///
/// Returns the serialization error if `args` can't be encoded as JSON.
pub fn cache_key<A>(prefix: &str, args: &A) -> Result<String, serde_json::Error>
where
    A: Serialize + ?Sized,
{
    let encoded = serde_json::to_string(args)?;
    let mut hasher = DefaultHasher::new();
    encoded.hash(&mut hasher);
    Ok(format!("{prefix}:{:016x}", hasher.finish()))
}

/// A function whose results are cached by argument.
///
/// ```
/// use std::sync::Arc;
/// use resilience_core::cache::{EphemeralCache, Memoized};
///
/// let cache = Arc::new(EphemeralCache::default());
/// let square = Memoized::new(Arc::clone(&cache), "square", 60, |n: &u64| n * n);
/// assert_eq!(square.call(&7), 49);
/// assert_eq!(square.call(&7), 49);
/// assert_eq!(cache.stats().hit_count, 1);
/// ```
pub struct Memoized<A: ?Sized, V, F> {
    cache: Arc<EphemeralCache<V>>,
    prefix: String,
    ttl: Option<Duration>,
    func: F,
    _args: PhantomData<fn(&A)>,
}

impl<A, V, F> Memoized<A, V, F>
where
    A: Serialize + ?Sized,
    V: Clone,
    F: Fn(&A) -> V,
{
    /// Wrap `func`, caching results under `prefix` for `ttl_secs` seconds
    /// (`<= 0` never expires).
    pub fn new(
        cache: Arc<EphemeralCache<V>>,
        prefix: impl Into<String>,
        ttl_secs: i64,
        func: F,
    ) -> Self {
        Self::with_ttl(cache, prefix, ttl_from_secs(ttl_secs), func)
    }

    /// Wrap `func` using the cache's configured default TTL.
    pub fn with_default_ttl(
        cache: Arc<EphemeralCache<V>>,
        prefix: impl Into<String>,
        func: F,
    ) -> Self {
        let ttl = cache.default_ttl();
        Self::with_ttl(cache, prefix, ttl, func)
    }

    /// Wrap `func` with an explicit TTL.
    pub fn with_ttl(
        cache: Arc<EphemeralCache<V>>,
        prefix: impl Into<String>,
        ttl: Option<Duration>,
        func: F,
    ) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
            ttl,
            func,
            _args: PhantomData,
        }
    }

    /// Return the cached result for `args`, computing it on a miss.
    ///
    /// Arguments that fail to serialize bypass the cache.
    pub fn call(&self, args: &A) -> V {
        match cache_key(&self.prefix, args) {
            Ok(key) => self
                .cache
                .get_or_insert_with(&key, self.ttl, || (self.func)(args)),
            Err(e) => {
                warn!(prefix = %self.prefix, error = %e, "memoize key failed, bypassing cache");
                (self.func)(args)
            }
        }
    }

    /// Drop every cached result of this function.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::InvalidPattern`] if the prefix can't be
    /// compiled into a key pattern.
    pub fn invalidate_all(&self) -> Result<usize, ResilienceError> {
        self.cache.clear(Some(&format!("{}:*", self.prefix)))
    }

    /// Key prefix shared by every cached result.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
