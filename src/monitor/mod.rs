//! Resource pool health monitoring.
//!
//! The monitor observes a pool through [`PoolHandle`]: it installs a listener
//! that bumps cumulative counters on checkout, checkin and invalidation, reads
//! live accounting on demand, and optionally samples on a background thread,
//! keeping a bounded history and raising alerts.
//!
//! Alerts share one cooldown window per monitor. While the window is open no
//! condition is evaluated at all, so a pool stuck at saturation produces one
//! batch of alerts per window instead of one per sample.

pub mod alert;
pub mod export;
pub mod snapshot;

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::core::{
    AppResult, ListenerId, PeriodicTask, PoolHandle, PoolListener, ResilienceError,
};

pub use crate::core::PoolStatus;
pub use alert::{evaluate_conditions, AlertCallback, AlertEvent, AlertKind};
pub use export::{render_snapshot, MetricKind};
pub use snapshot::{usage_percent, PoolSnapshot};

use snapshot::PoolCounters;

/// Pool listener that only touches the shared counters, so the pool never
/// holds a reference back to the monitor.
struct CounterListener {
    counters: Arc<PoolCounters>,
}

impl PoolListener for CounterListener {
    fn on_checkout(&self, overflow: bool) {
        self.counters.checkouts.fetch_add(1, Ordering::Relaxed);
        if overflow {
            self.counters.overflows.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_checkin(&self) {
        self.counters.checkins.fetch_add(1, Ordering::Relaxed);
    }

    fn on_invalidate(&self, reason: &str) {
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        warn!(reason, "pool resource invalidated");
    }
}

struct AttachedPool {
    handle: Arc<dyn PoolHandle>,
    listener: ListenerId,
}

struct MonitorInner {
    config: MonitorConfig,
    pool: RwLock<Option<AttachedPool>>,
    counters: Arc<PoolCounters>,
    history: Mutex<VecDeque<PoolSnapshot>>,
    callbacks: RwLock<Vec<AlertCallback>>,
    last_alert: Mutex<Option<Instant>>,
}

impl MonitorInner {
    fn pool_status(&self) -> (PoolStatus, u32) {
        self.pool
            .read()
            .as_ref()
            .map_or((PoolStatus::default(), 0), |p| {
                (p.handle.status(), p.handle.max_overflow())
            })
    }

    fn metrics(&self) -> PoolSnapshot {
        let (status, max_overflow) = self.pool_status();
        self.counters.snapshot(status, max_overflow)
    }

    fn record(&self, snapshot: PoolSnapshot) {
        let mut history = self.history.lock();
        while history.len() >= self.config.history_capacity {
            history.pop_front();
        }
        history.push_back(snapshot);
    }

    fn evaluate_alerts(&self, snapshot: &PoolSnapshot) -> Vec<AlertEvent> {
        let now = Instant::now();
        let mut last = self.last_alert.lock();
        if let Some(at) = *last {
            if now.saturating_duration_since(at) < self.config.cooldown() {
                debug!("alert cooldown active, skipping evaluation");
                return Vec::new();
            }
        }
        let fired = evaluate_conditions(snapshot, &self.config);
        if fired.is_empty() {
            return fired;
        }
        *last = Some(now);
        drop(last);
        self.dispatch(&fired);
        fired
    }

    fn dispatch(&self, fired: &[AlertEvent]) {
        let callbacks: Vec<AlertCallback> =
            self.callbacks.read().iter().map(Arc::clone).collect();
        for event in fired {
            warn!(
                kind = %event.kind,
                usage_percent = event.snapshot.usage_percent,
                checked_out = event.snapshot.checked_out,
                overflow = event.snapshot.overflow,
                "{}",
                event.message
            );
            for callback in &callbacks {
                if let Err(e) = alert::invoke(callback, event) {
                    error!(kind = %event.kind, error = %e, "alert callback failed");
                }
            }
        }
    }

    fn sample(&self) {
        let snapshot = self.metrics();
        self.record(snapshot.clone());
        self.evaluate_alerts(&snapshot);
    }
}

/// Observes a bounded resource pool and raises rate-limited alerts.
pub struct PoolMonitor {
    inner: Arc<MonitorInner>,
    sampler: Mutex<Option<PeriodicTask>>,
}

impl PoolMonitor {
    /// Create a monitor with no pool attached.
    ///
    /// A `history_capacity` of 0 is raised to 1 so the latest sample is kept.
    #[must_use]
    pub fn new(config: &MonitorConfig) -> Self {
        let mut config = config.clone();
        config.history_capacity = config.history_capacity.max(1);
        let history = VecDeque::with_capacity(config.history_capacity.min(1024));
        Self {
            inner: Arc::new(MonitorInner {
                config,
                pool: RwLock::new(None),
                counters: Arc::new(PoolCounters::default()),
                history: Mutex::new(history),
                callbacks: RwLock::new(Vec::new()),
                last_alert: Mutex::new(None),
            }),
            sampler: Mutex::new(None),
        }
    }

    /// Start observing `pool`, replacing any previously attached pool.
    pub fn attach_pool(&self, pool: Arc<dyn PoolHandle>) {
        self.detach_pool();
        let listener = pool.add_listener(Arc::new(CounterListener {
            counters: Arc::clone(&self.inner.counters),
        }));
        *self.inner.pool.write() = Some(AttachedPool {
            handle: pool,
            listener,
        });
        debug!("pool attached to monitor");
    }

    /// Stop observing the current pool. Counters are kept.
    pub fn detach_pool(&self) -> bool {
        let Some(old) = self.inner.pool.write().take() else {
            return false;
        };
        old.handle.remove_listener(old.listener);
        true
    }

    /// Dispose the attached pool, if any. Returns whether a pool was disposed.
    ///
    /// The pool stays attached so status reads keep working; counters are
    /// untouched.
    pub fn dispose_pool(&self) -> bool {
        let handle = self.inner.pool.read().as_ref().map(|p| Arc::clone(&p.handle));
        handle.is_some_and(|h| {
            h.dispose();
            true
        })
    }

    /// Live pool accounting. All zero when no pool is attached.
    #[must_use]
    pub fn get_pool_status(&self) -> PoolStatus {
        self.inner.pool_status().0
    }

    /// Live accounting combined with cumulative counters.
    #[must_use]
    pub fn get_metrics(&self) -> PoolSnapshot {
        self.inner.metrics()
    }

    /// Count a caller that gave up waiting for a pool resource.
    pub fn record_timeout(&self) {
        let total = self.inner.counters.timeouts.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(total_timeouts = total, "pool checkout timeout recorded");
    }

    /// Register a function called once per fired alert with the triggering
    /// snapshot and message.
    pub fn add_alert_callback<F>(&self, callback: F)
    where
        F: Fn(&PoolSnapshot, &str) -> AppResult<()> + Send + Sync + 'static,
    {
        self.inner.callbacks.write().push(Arc::new(callback));
    }

    /// Evaluate alert conditions against `snapshot` now, honoring cooldown.
    /// Returns the alerts that fired.
    pub fn evaluate_alerts(&self, snapshot: &PoolSnapshot) -> Vec<AlertEvent> {
        self.inner.evaluate_alerts(snapshot)
    }

    /// Take a fresh snapshot and evaluate alerts against it without recording
    /// it in the history.
    pub fn check_now(&self) -> Vec<AlertEvent> {
        let snapshot = self.inner.metrics();
        self.inner.evaluate_alerts(&snapshot)
    }

    /// The most recent `limit` snapshots, oldest first.
    #[must_use]
    pub fn get_history(&self, limit: usize) -> Vec<PoolSnapshot> {
        let history = self.inner.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Render current metrics in the text exposition format.
    #[must_use]
    pub fn render_metrics(&self) -> String {
        render_snapshot(&self.get_metrics())
    }

    /// Start the background sampler. Returns `Ok(false)` if already running.
    ///
    /// Each tick snapshots the pool, appends to the history and evaluates
    /// alerts. Stopping wakes the sampler immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::Spawn`] if the sampler thread can't start.
    pub fn start_background_monitoring(
        &self,
        interval: Duration,
    ) -> Result<bool, ResilienceError> {
        let mut slot = self.sampler.lock();
        if slot.is_some() {
            debug!("pool monitoring already running");
            return Ok(false);
        }
        let inner = Arc::clone(&self.inner);
        *slot = Some(PeriodicTask::spawn("pool-monitor", interval, move || inner.sample())?);
        info!(interval_secs = interval.as_secs_f64(), "pool monitoring started");
        Ok(true)
    }

    /// Stop the background sampler. Returns whether one was running.
    pub fn stop_background_monitoring(&self) -> bool {
        let Some(task) = self.sampler.lock().take() else {
            return false;
        };
        task.stop();
        info!("pool monitoring stopped");
        true
    }

    /// Whether the background sampler is running.
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.sampler.lock().is_some()
    }
}

impl Drop for PoolMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.sampler.get_mut().take() {
            task.stop();
        }
        self.detach_pool();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PoolLimits, ResourcePool};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn pool(pool_size: u32, max_overflow: u32) -> Arc<ResourcePool<u32>> {
        Arc::new(ResourcePool::new(
            PoolLimits {
                pool_size,
                max_overflow,
                checkout_timeout: Duration::from_millis(50),
            },
            || Ok(0),
        ))
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            history_capacity: 3,
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn test_status_without_pool_is_zero() {
        let monitor = PoolMonitor::new(&config());
        assert_eq!(monitor.get_pool_status(), PoolStatus::default());
        let snap = monitor.get_metrics();
        assert!(snap.usage_percent.abs() < f64::EPSILON);
        assert!(!monitor.detach_pool());
        assert!(!monitor.dispose_pool());
    }

    #[test]
    fn test_counters_follow_pool_events() {
        let monitor = PoolMonitor::new(&config());
        let pool = pool(1, 1);
        monitor.attach_pool(pool.clone());

        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        b.invalidate("stale");
        drop(a);
        monitor.record_timeout();

        let snap = monitor.get_metrics();
        assert_eq!(snap.total_checkouts, 2);
        assert_eq!(snap.total_overflows, 1);
        assert_eq!(snap.total_invalidations, 1);
        assert_eq!(snap.total_checkins, 2);
        assert_eq!(snap.total_timeouts, 1);
        assert_eq!(snap.checked_in, 1);
    }

    #[test]
    fn test_detach_stops_counting() {
        let monitor = PoolMonitor::new(&config());
        let pool = pool(1, 0);
        monitor.attach_pool(pool.clone());
        drop(pool.checkout().unwrap());
        assert!(monitor.detach_pool());
        drop(pool.checkout().unwrap());
        assert_eq!(monitor.get_metrics().total_checkouts, 1);
        assert_eq!(monitor.get_pool_status(), PoolStatus::default());
    }

    #[test]
    fn test_history_is_bounded_oldest_first() {
        let monitor = PoolMonitor::new(&config());
        for _ in 0..5 {
            monitor.inner.sample();
            thread::sleep(Duration::from_millis(2));
        }
        let history = monitor.get_history(10);
        assert_eq!(history.len(), 3);
        assert!(history[0].timestamp_ms <= history[2].timestamp_ms);
        assert_eq!(monitor.get_history(1).len(), 1);
        assert_eq!(monitor.get_history(1)[0], history[2]);
    }

    #[test]
    fn test_zero_history_capacity_keeps_latest() {
        let monitor = PoolMonitor::new(&MonitorConfig {
            history_capacity: 0,
            ..MonitorConfig::default()
        });
        monitor.inner.sample();
        monitor.inner.sample();
        assert_eq!(monitor.get_history(10).len(), 1);
    }

    #[test]
    fn test_cooldown_suppresses_second_batch() {
        let monitor = PoolMonitor::new(&config());
        let pool = pool(1, 1);
        monitor.attach_pool(pool.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        monitor.add_alert_callback(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let _a = pool.checkout().unwrap();
        let _b = pool.checkout().unwrap();
        let first = monitor.check_now();
        // 100% usage and overflow active.
        assert_eq!(first.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(monitor.check_now().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_cooldown_allows_every_batch() {
        let monitor = PoolMonitor::new(&MonitorConfig {
            cooldown_secs: 0,
            ..config()
        });
        let pool = pool(1, 0);
        monitor.attach_pool(pool.clone());
        let _held = pool.checkout().unwrap();
        assert_eq!(monitor.check_now().len(), 1);
        assert_eq!(monitor.check_now().len(), 1);
    }

    #[test]
    fn test_failing_callbacks_do_not_stop_others() {
        let monitor = PoolMonitor::new(&config());
        let calls = Arc::new(AtomicUsize::new(0));
        monitor.add_alert_callback(|_, _| Err(anyhow::anyhow!("webhook 500")));
        monitor.add_alert_callback(|_, _| panic!("callback bug"));
        let c = Arc::clone(&calls);
        monitor.add_alert_callback(move |_, msg| {
            assert!(msg.starts_with("Pool overflow"));
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut snap = monitor.get_metrics();
        snap.overflow = 1;
        let fired = monitor.evaluate_alerts(&snap);
        assert_eq!(fired.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_background_monitoring_start_stop() {
        let monitor = PoolMonitor::new(&config());
        assert!(monitor
            .start_background_monitoring(Duration::from_millis(10))
            .unwrap());
        assert!(!monitor
            .start_background_monitoring(Duration::from_millis(10))
            .unwrap());
        assert!(monitor.is_monitoring());
        thread::sleep(Duration::from_millis(60));
        assert!(monitor.stop_background_monitoring());
        assert!(!monitor.is_monitoring());
        assert!(!monitor.get_history(60).is_empty());
    }

    #[test]
    fn test_dispose_keeps_counters() {
        let monitor = PoolMonitor::new(&config());
        let pool = pool(2, 0);
        monitor.attach_pool(pool.clone());
        drop(pool.checkout().unwrap());
        let before = monitor.get_metrics().total_checkouts;
        assert!(monitor.dispose_pool());
        assert!(pool.is_disposed());
        assert_eq!(monitor.get_metrics().total_checkouts, before);
    }
}
