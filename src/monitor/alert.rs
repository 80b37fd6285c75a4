//! Alert conditions and callback dispatch.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::PoolSnapshot;
use crate::config::MonitorConfig;
use crate::core::error::panic_message;
use crate::core::{AppResult, ResilienceError};

/// Alert callback. Receives the triggering snapshot and the alert message.
pub type AlertCallback = Arc<dyn Fn(&PoolSnapshot, &str) -> AppResult<()> + Send + Sync>;

/// Which condition raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Usage at or above the configured threshold.
    HighUsage,
    /// Resources issued beyond the nominal pool size.
    OverflowActive,
    /// Cumulative invalidations above the configured threshold.
    InvalidationSpike,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HighUsage => "high_usage",
            Self::OverflowActive => "overflow_active",
            Self::InvalidationSpike => "invalidation_spike",
        })
    }
}

/// A fired alert. Derived from a snapshot; never stored by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Condition that fired.
    pub kind: AlertKind,
    /// Human-readable message passed to callbacks.
    pub message: String,
    /// Snapshot the condition was evaluated against.
    pub snapshot: PoolSnapshot,
}

/// Evaluate every alert condition against `snapshot`, ignoring cooldown.
#[must_use]
pub fn evaluate_conditions(snapshot: &PoolSnapshot, config: &MonitorConfig) -> Vec<AlertEvent> {
    let mut fired = Vec::new();
    let mut push = |kind, message: String| {
        fired.push(AlertEvent {
            kind,
            message,
            snapshot: snapshot.clone(),
        });
    };

    if snapshot.usage_percent >= config.alert_threshold * 100.0 {
        push(
            AlertKind::HighUsage,
            format!("High pool usage: {:.1}%", snapshot.usage_percent),
        );
    }
    if snapshot.overflow > 0 {
        push(
            AlertKind::OverflowActive,
            format!("Pool overflow active: {} resources", snapshot.overflow),
        );
    }
    if snapshot.total_invalidations > config.invalidation_alert_threshold {
        push(
            AlertKind::InvalidationSpike,
            format!("Invalidation spike: {} total", snapshot.total_invalidations),
        );
    }
    fired
}

/// Invoke one callback, converting both errors and panics into a result.
pub(crate) fn invoke(callback: &AlertCallback, event: &AlertEvent) -> Result<(), ResilienceError> {
    match catch_unwind(AssertUnwindSafe(|| callback(&event.snapshot, &event.message))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ResilienceError::CallbackFailed(format!("{e:#}"))),
        Err(payload) => Err(ResilienceError::CallbackFailed(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(usage: f64, overflow: u32, invalidations: u64) -> PoolSnapshot {
        PoolSnapshot {
            timestamp_ms: 1,
            pool_size: 5,
            checked_out: 0,
            overflow,
            checked_in: 0,
            max_overflow: 10,
            total_checkouts: 0,
            total_checkins: 0,
            total_overflows: 0,
            total_invalidations: invalidations,
            total_timeouts: 0,
            usage_percent: usage,
        }
    }

    #[test]
    fn test_quiet_pool_fires_nothing() {
        let fired = evaluate_conditions(&snapshot(10.0, 0, 0), &MonitorConfig::default());
        assert!(fired.is_empty());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let fired = evaluate_conditions(&snapshot(80.0, 0, 0), &MonitorConfig::default());
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, AlertKind::HighUsage);
        assert_eq!(fired[0].message, "High pool usage: 80.0%");
    }

    #[test]
    fn test_invalidations_strictly_above_threshold() {
        let cfg = MonitorConfig::default();
        assert!(evaluate_conditions(&snapshot(0.0, 0, 5), &cfg).is_empty());
        let fired = evaluate_conditions(&snapshot(0.0, 0, 6), &cfg);
        assert_eq!(fired[0].kind, AlertKind::InvalidationSpike);
    }

    #[test]
    fn test_all_conditions_fire_together() {
        let fired = evaluate_conditions(&snapshot(95.0, 2, 9), &MonitorConfig::default());
        let kinds: Vec<_> = fired.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AlertKind::HighUsage,
                AlertKind::OverflowActive,
                AlertKind::InvalidationSpike
            ]
        );
    }

    #[test]
    fn test_invoke_converts_errors_and_panics() {
        let event = evaluate_conditions(&snapshot(0.0, 1, 0), &MonitorConfig::default()).remove(0);

        let ok: AlertCallback = Arc::new(|_: &PoolSnapshot, _: &str| -> AppResult<()> { Ok(()) });
        assert!(invoke(&ok, &event).is_ok());

        let failing: AlertCallback = Arc::new(|_: &PoolSnapshot, _: &str| -> AppResult<()> {
            Err(anyhow::anyhow!("pager down"))
        });
        let err = invoke(&failing, &event).unwrap_err();
        assert_eq!(err.to_string(), "alert callback failed: pager down");

        let panicking: AlertCallback = Arc::new(|_: &PoolSnapshot, _: &str| -> AppResult<()> {
            panic!("bad callback")
        });
        let err = invoke(&panicking, &event).unwrap_err();
        assert!(err.to_string().contains("bad callback"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(AlertKind::OverflowActive.to_string(), "overflow_active");
    }
}
