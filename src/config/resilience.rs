//! Resilience core configuration structures.
//!
//! All environment reads happen here, once, at startup. Components receive the
//! validated sections through their constructors.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ResilienceError;

/// Upper bound for every seconds-valued setting: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Shutdown coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Drain ceiling and default per-handler timeout, in seconds.
    pub timeout_secs: u64,
    /// How often the drain step re-reads the request counter, in milliseconds.
    pub drain_poll_ms: u64,
}

/// Pool monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Usage fraction (0–1) at or above which the high-usage alert fires.
    pub alert_threshold: f64,
    /// Background sampling interval in seconds.
    pub interval_secs: u64,
    /// Minimum seconds between alert batches.
    pub cooldown_secs: u64,
    /// Cumulative invalidations strictly above this value raise an alert.
    pub invalidation_alert_threshold: u64,
    /// Number of snapshots retained in the history ring.
    pub history_capacity: usize,
    /// Start the background sampler when the runtime is built.
    pub background: bool,
}

/// Bounded resource pool limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Nominal number of resources kept open.
    pub pool_size: u32,
    /// Resources that may be issued beyond `pool_size`.
    pub max_overflow: u32,
    /// Seconds a checkout waits before giving up.
    pub timeout_secs: u64,
}

/// Ephemeral cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds between background sweeps of expired entries.
    pub sweep_interval_secs: u64,
    /// Log every sweep at info level instead of debug.
    pub sweep_verbose: bool,
    /// TTL used by memoized functions that don't specify one. `<= 0` never expires.
    pub default_ttl_secs: i64,
}

/// Root configuration passed to the composition root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Shutdown coordinator section.
    pub shutdown: ShutdownConfig,
    /// Pool monitor section.
    pub monitor: MonitorConfig,
    /// Resource pool section.
    pub pool: PoolConfig,
    /// Cache section.
    pub cache: CacheConfig,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            drain_poll_ms: 100,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 0.8,
            interval_secs: 60,
            cooldown_secs: 300,
            invalidation_alert_threshold: 5,
            history_capacity: 60,
            background: true,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            max_overflow: 10,
            timeout_secs: 30,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            sweep_verbose: false,
            default_ttl_secs: 300,
        }
    }
}

impl ShutdownConfig {
    /// Validate shutdown configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".into());
        }
        check_secs("timeout_secs", self.timeout_secs)?;
        if self.drain_poll_ms == 0 {
            return Err("drain_poll_ms must be greater than 0".into());
        }
        check_secs("drain_poll_ms", self.drain_poll_ms / 1000)?;
        Ok(())
    }

    /// Maximum time spent waiting for in-flight requests.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Timeout applied to handlers registered without one.
    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Interval between request counter reads while draining.
    #[must_use]
    pub const fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }
}

impl MonitorConfig {
    /// Validate monitor configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.alert_threshold) {
            return Err(format!(
                "alert_threshold must be within 0..=1, got {}",
                self.alert_threshold
            ));
        }
        if self.interval_secs == 0 {
            return Err("interval_secs must be greater than 0".into());
        }
        check_secs("interval_secs", self.interval_secs)?;
        check_secs("cooldown_secs", self.cooldown_secs)?;
        if self.history_capacity == 0 {
            return Err("history_capacity must be greater than 0".into());
        }
        Ok(())
    }

    /// Sampling interval as a duration.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Alert cooldown as a duration.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl PoolConfig {
    /// Validate pool limits.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == 0 && self.max_overflow == 0 {
            return Err("pool_size and max_overflow cannot both be 0".into());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".into());
        }
        check_secs("timeout_secs", self.timeout_secs)
    }

    /// Checkout wait budget as a duration.
    #[must_use]
    pub const fn checkout_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CacheConfig {
    /// Validate cache configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be greater than 0".into());
        }
        check_secs("sweep_interval_secs", self.sweep_interval_secs)
    }

    /// Sweep interval as a duration.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ResilienceConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.shutdown
            .validate()
            .map_err(|e| format!("shutdown invalid: {e}"))?;
        self.monitor
            .validate()
            .map_err(|e| format!("monitor invalid: {e}"))?;
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        self.cache
            .validate()
            .map_err(|e| format!("cache invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the process environment, loading `.env` first
    /// if one is present.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::InvalidConfig`] for unparsable or
    /// out-of-range values.
    pub fn from_env() -> Result<Self, ResilienceError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "failed to load .env file");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::InvalidConfig`] for unparsable or
    /// out-of-range values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ResilienceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let cfg = Self {
            shutdown: ShutdownConfig {
                timeout_secs: parse_or(
                    &lookup,
                    "SHUTDOWN_TIMEOUT_SECONDS",
                    d.shutdown.timeout_secs,
                )?,
                drain_poll_ms: parse_or(
                    &lookup,
                    "SHUTDOWN_DRAIN_POLL_MS",
                    d.shutdown.drain_poll_ms,
                )?,
            },
            monitor: MonitorConfig {
                alert_threshold: parse_or(
                    &lookup,
                    "POOL_ALERT_THRESHOLD",
                    d.monitor.alert_threshold,
                )?,
                interval_secs: parse_or(
                    &lookup,
                    "POOL_MONITOR_INTERVAL_SECONDS",
                    d.monitor.interval_secs,
                )?,
                cooldown_secs: parse_or(
                    &lookup,
                    "POOL_ALERT_COOLDOWN_SECONDS",
                    d.monitor.cooldown_secs,
                )?,
                invalidation_alert_threshold: parse_or(
                    &lookup,
                    "POOL_INVALIDATION_ALERT_THRESHOLD",
                    d.monitor.invalidation_alert_threshold,
                )?,
                history_capacity: d.monitor.history_capacity,
                background: d.monitor.background,
            },
            pool: PoolConfig {
                pool_size: parse_or(&lookup, "POOL_SIZE", d.pool.pool_size)?,
                max_overflow: parse_or(&lookup, "POOL_MAX_OVERFLOW", d.pool.max_overflow)?,
                timeout_secs: parse_or(&lookup, "POOL_TIMEOUT_SECONDS", d.pool.timeout_secs)?,
            },
            cache: CacheConfig {
                sweep_interval_secs: parse_or(
                    &lookup,
                    "CACHE_SWEEP_INTERVAL_SECONDS",
                    d.cache.sweep_interval_secs,
                )?,
                sweep_verbose: parse_flag(&lookup, "CACHE_SWEEP_VERBOSE", d.cache.sweep_verbose)?,
                default_ttl_secs: parse_or(
                    &lookup,
                    "CACHE_DEFAULT_TTL_SECONDS",
                    d.cache.default_ttl_secs,
                )?,
            },
        };
        cfg.validate().map_err(ResilienceError::InvalidConfig)?;
        Ok(cfg)
    }
}

fn check_secs(field: &str, secs: u64) -> Result<(), String> {
    if secs > MAX_DURATION_SECS {
        return Err(format!(
            "{field} must be at most {MAX_DURATION_SECS} seconds, got {secs}"
        ));
    }
    Ok(())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ResilienceError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| ResilienceError::InvalidConfig(format!("{key}={raw}: {e}"))),
        _ => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ResilienceError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ResilienceError::InvalidConfig(format!(
            "{key}={other}: expected a boolean flag"
        ))),
    }
}
