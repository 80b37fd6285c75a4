//! Pool snapshots and cumulative counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::PoolStatus;
use crate::util::clock::now_ms;

/// Immutable point-in-time capture of pool metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: u128,
    /// Nominal pool size.
    pub pool_size: u32,
    /// Resources currently handed out.
    pub checked_out: u32,
    /// Open resources beyond the nominal size.
    pub overflow: u32,
    /// Idle resources in the pool.
    pub checked_in: u32,
    /// Maximum overflow the pool allows.
    pub max_overflow: u32,
    /// Checkouts since the monitor was created.
    pub total_checkouts: u64,
    /// Checkins since the monitor was created.
    pub total_checkins: u64,
    /// Checkouts that landed in overflow.
    pub total_overflows: u64,
    /// Invalidated resources.
    pub total_invalidations: u64,
    /// Callers that gave up waiting for a resource.
    pub total_timeouts: u64,
    /// `checked_out / (pool_size + max_overflow) * 100`, 0 when capacity is 0.
    pub usage_percent: f64,
}

/// Percentage of total capacity in use. Zero capacity yields 0.
#[must_use]
pub fn usage_percent(checked_out: u32, pool_size: u32, max_overflow: u32) -> f64 {
    let capacity = u64::from(pool_size) + u64::from(max_overflow);
    if capacity == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let pct = f64::from(checked_out) / capacity as f64 * 100.0;
    pct
}

/// Process-lifetime event counters. Only ever incremented.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub checkouts: AtomicU64,
    pub checkins: AtomicU64,
    pub overflows: AtomicU64,
    pub invalidations: AtomicU64,
    pub timeouts: AtomicU64,
}

impl PoolCounters {
    /// Combine live pool accounting with the counters.
    pub fn snapshot(&self, status: PoolStatus, max_overflow: u32) -> PoolSnapshot {
        PoolSnapshot {
            timestamp_ms: now_ms(),
            pool_size: status.pool_size,
            checked_out: status.checked_out,
            overflow: status.overflow,
            checked_in: status.checked_in,
            max_overflow,
            total_checkouts: self.checkouts.load(Ordering::Relaxed),
            total_checkins: self.checkins.load(Ordering::Relaxed),
            total_overflows: self.overflows.load(Ordering::Relaxed),
            total_invalidations: self.invalidations.load(Ordering::Relaxed),
            total_timeouts: self.timeouts.load(Ordering::Relaxed),
            usage_percent: usage_percent(status.checked_out, status.pool_size, max_overflow),
        }
    }
}
