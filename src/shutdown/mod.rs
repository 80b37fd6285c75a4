//! Orderly process shutdown.
//!
//! The coordinator moves through `Idle → Draining → RunningHandlers →
//! Complete` exactly once. Draining waits for the request counter to reach
//! zero, bounded by the configured ceiling; it never blocks shutdown
//! indefinitely. Handlers then run one at a time in ascending priority, each on
//! its own thread with its own timeout, so one stuck or failing handler can't
//! keep the rest from running.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use resilience_core::config::ShutdownConfig;
//! use resilience_core::shutdown::{ShutdownCoordinator, ShutdownHandler, ShutdownState};
//!
//! let coordinator = Arc::new(ShutdownCoordinator::new(&ShutdownConfig::default()));
//! coordinator
//!     .register(ShutdownHandler::new("flush", || Ok(())).with_priority(90))
//!     .unwrap();
//!
//! let report = coordinator.shutdown().unwrap();
//! assert!(report.drained);
//! assert!(report.all_succeeded());
//! assert!(coordinator.shutdown().is_none());
//! assert_eq!(coordinator.get_status().state, ShutdownState::Complete);
//! ```

pub mod guard;
pub mod handler;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::ShutdownConfig;
use crate::core::{AppResult, ResilienceError};
use crate::util::clock::{deadline_after, now_ms};

pub use guard::{RequestGuard, ShutdownOnDrop};
pub use handler::{
    HandlerAction, HandlerOutcome, HandlerResult, ShutdownHandler, DEFAULT_PRIORITY,
};

use handler::run_bounded;

/// Coordinator lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownState {
    /// Accepting work and handler registrations.
    Idle,
    /// Waiting for in-flight requests.
    Draining,
    /// Executing cleanup handlers.
    RunningHandlers,
    /// Done.
    Complete,
}

/// Diagnostic view of the coordinator. Safe to take at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownStatus {
    /// Current lifecycle state.
    pub state: ShutdownState,
    /// In-flight requests.
    pub active_requests: u64,
    /// Registered handler names in execution order.
    pub handlers: Vec<String>,
    /// When shutdown was triggered, in milliseconds since the Unix epoch.
    pub shutdown_at_ms: Option<u128>,
}

/// What happened during a shutdown run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Whether the request counter reached zero before the drain ceiling.
    pub drained: bool,
    /// Requests still in flight when draining ended.
    pub remaining_requests: u64,
    /// Per-handler results in execution order.
    pub handlers: Vec<HandlerResult>,
    /// Total time from trigger to completion.
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Whether every handler completed successfully.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.handlers.iter().all(|h| h.outcome.is_success())
    }

    /// Handlers that failed, panicked or timed out.
    pub fn failures(&self) -> impl Iterator<Item = &HandlerResult> {
        self.handlers.iter().filter(|h| !h.outcome.is_success())
    }
}

struct Lifecycle {
    state: ShutdownState,
    shutdown_at_ms: Option<u128>,
    report: Option<ShutdownReport>,
}

/// Drains in-flight work and runs registered cleanup handlers once.
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    lifecycle: Mutex<Lifecycle>,
    /// Signaled when the lifecycle reaches `Complete`.
    completed: Condvar,
    /// Sorted by priority; equal priorities keep registration order.
    handlers: Mutex<Vec<ShutdownHandler>>,
    requests: Mutex<u64>,
    /// Signaled when the request counter drops to zero.
    idle: Condvar,
}

impl ShutdownCoordinator {
    /// Create an idle coordinator with no handlers.
    #[must_use]
    pub fn new(config: &ShutdownConfig) -> Self {
        Self {
            config: config.clone(),
            lifecycle: Mutex::new(Lifecycle {
                state: ShutdownState::Idle,
                shutdown_at_ms: None,
                report: None,
            }),
            completed: Condvar::new(),
            handlers: Mutex::new(Vec::new()),
            requests: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    /// Configuration this coordinator was built with.
    #[must_use]
    pub const fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Register a handler. A handler with the same name is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::RegistrationClosed`] once shutdown has begun.
    pub fn register(&self, handler: ShutdownHandler) -> Result<(), ResilienceError> {
        // Lock order: lifecycle, then handlers.
        let lifecycle = self.lifecycle.lock();
        if lifecycle.state != ShutdownState::Idle {
            warn!(
                handler = %handler.name,
                state = ?lifecycle.state,
                "handler registration rejected"
            );
            return Err(ResilienceError::RegistrationClosed(handler.name));
        }

        let mut handlers = self.handlers.lock();
        let replaced = handlers
            .iter()
            .position(|h| h.name == handler.name)
            .map(|i| handlers.remove(i));
        let at = handlers.partition_point(|h| h.priority <= handler.priority);
        debug!(
            handler = %handler.name,
            priority = handler.priority,
            replaced = replaced.is_some(),
            "shutdown handler registered"
        );
        handlers.insert(at, handler);
        Ok(())
    }

    /// Register a handler from its parts.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_handler<F>(
        &self,
        name: impl Into<String>,
        priority: i32,
        timeout: Duration,
        action: F,
    ) -> Result<(), ResilienceError>
    where
        F: Fn() -> AppResult<()> + Send + Sync + 'static,
    {
        self.register(
            ShutdownHandler::new(name, action)
                .with_priority(priority)
                .with_timeout(timeout),
        )
    }

    /// Remove a handler by name. Returns whether one was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|h| h.name != name);
        handlers.len() != before
    }

    /// Mark the start of a unit of work.
    pub fn request_started(&self) {
        *self.requests.lock() += 1;
    }

    /// Mark the end of a unit of work. Never drops below zero.
    pub fn request_finished(&self) {
        let mut active = self.requests.lock();
        if *active == 0 {
            debug!("request_finished without a matching request_started");
            return;
        }
        *active -= 1;
        if *active == 0 {
            self.idle.notify_all();
        }
    }

    /// Bracket a unit of work with a guard.
    pub fn track_request(self: &Arc<Self>) -> RequestGuard {
        RequestGuard::new(Arc::clone(self))
    }

    /// In-flight requests.
    #[must_use]
    pub fn active_requests(&self) -> u64 {
        *self.requests.lock()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ShutdownState {
        self.lifecycle.lock().state
    }

    /// Whether shutdown has been triggered.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state() != ShutdownState::Idle
    }

    /// Diagnostic snapshot.
    #[must_use]
    pub fn get_status(&self) -> ShutdownStatus {
        let (state, shutdown_at_ms) = {
            let lifecycle = self.lifecycle.lock();
            (lifecycle.state, lifecycle.shutdown_at_ms)
        };
        ShutdownStatus {
            state,
            active_requests: self.active_requests(),
            handlers: self.handlers.lock().iter().map(|h| h.name.clone()).collect(),
            shutdown_at_ms,
        }
    }

    /// Report of the completed shutdown, if it has finished.
    #[must_use]
    pub fn last_report(&self) -> Option<ShutdownReport> {
        self.lifecycle.lock().report.clone()
    }

    /// Block until shutdown completes or `timeout` elapses. Returns whether it
    /// completed.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut lifecycle = self.lifecycle.lock();
        while lifecycle.state != ShutdownState::Complete {
            match deadline {
                Some(at) => {
                    if self.completed.wait_until(&mut lifecycle, at).timed_out() {
                        break;
                    }
                }
                None => self.completed.wait(&mut lifecycle),
            }
        }
        lifecycle.state == ShutdownState::Complete
    }

    /// Guard that runs shutdown when dropped, unless already complete.
    pub fn exit_guard(self: &Arc<Self>) -> ShutdownOnDrop {
        ShutdownOnDrop::new(Arc::clone(self))
    }

    /// Drain and run every handler. Blocks the calling thread.
    ///
    /// Returns `None` without doing anything if shutdown was already
    /// triggered, so concurrent callers run the handlers exactly once.
    pub fn shutdown(&self) -> Option<ShutdownReport> {
        let started = Instant::now();
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != ShutdownState::Idle {
                info!(state = ?lifecycle.state, "shutdown already in progress, ignoring trigger");
                return None;
            }
            lifecycle.state = ShutdownState::Draining;
            lifecycle.shutdown_at_ms = Some(now_ms());
        }
        info!("shutdown started, draining requests");

        let (drained, remaining_requests) = self.drain();

        self.lifecycle.lock().state = ShutdownState::RunningHandlers;
        let handlers = self.handlers.lock().clone();
        info!(count = handlers.len(), "running shutdown handlers");

        let mut results = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            let timeout = handler.timeout.unwrap_or_else(|| self.config.handler_timeout());
            debug!(
                handler = %handler.name,
                priority = handler.priority,
                "running shutdown handler"
            );
            let result = run_bounded(handler, timeout);
            log_result(&result);
            results.push(result);
        }

        let report = ShutdownReport {
            drained,
            remaining_requests,
            handlers: results,
            elapsed: started.elapsed(),
        };
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = ShutdownState::Complete;
            lifecycle.report = Some(report.clone());
        }
        self.completed.notify_all();
        info!(
            elapsed_ms = report.elapsed.as_millis(),
            failures = report.failures().count(),
            "shutdown complete"
        );
        Some(report)
    }

    /// Wait for the request counter to hit zero, re-checking every poll
    /// interval, up to the drain ceiling.
    fn drain(&self) -> (bool, u64) {
        let deadline = deadline_after(self.config.drain_timeout());
        let poll = self.config.drain_poll();
        let mut active = self.requests.lock();
        while *active > 0 {
            let now = Instant::now();
            let left = deadline.map_or(poll, |at| at.saturating_duration_since(now));
            if left.is_zero() {
                warn!(
                    remaining = *active,
                    timeout_secs = self.config.timeout_secs,
                    "drain timed out, proceeding with shutdown"
                );
                return (false, *active);
            }
            debug!(remaining = *active, "waiting for in-flight requests");
            self.idle.wait_for(&mut active, poll.min(left));
        }
        debug!("all requests drained");
        (true, 0)
    }
}

fn log_result(result: &HandlerResult) {
    let elapsed_ms = result.elapsed.as_millis();
    let Some(e) = result.outcome.to_error(&result.name) else {
        info!(handler = %result.name, elapsed_ms, "shutdown handler completed");
        return;
    };
    match &result.outcome {
        HandlerOutcome::TimedOut { .. } => {
            warn!(handler = %result.name, elapsed_ms, "{e}, abandoning and continuing");
        }
        HandlerOutcome::Panicked { message } => {
            error!(handler = %result.name, panic = %message, "{e}");
        }
        _ => error!(handler = %result.name, elapsed_ms, "{e}"),
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("config", &self.config)
            .field("status", &self.get_status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;
    use std::thread;

    fn fast_config() -> ShutdownConfig {
        ShutdownConfig {
            timeout_secs: 1,
            drain_poll_ms: 10,
        }
    }

    #[test]
    fn test_initial_status() {
        let c = ShutdownCoordinator::new(&fast_config());
        let status = c.get_status();
        assert_eq!(status.state, ShutdownState::Idle);
        assert_eq!(status.active_requests, 0);
        assert!(status.handlers.is_empty());
        assert!(status.shutdown_at_ms.is_none());
        assert!(!c.is_shutting_down());
    }

    #[test]
    fn test_request_counter_clamps_at_zero() {
        let c = ShutdownCoordinator::new(&fast_config());
        c.request_finished();
        assert_eq!(c.active_requests(), 0);
        c.request_started();
        c.request_started();
        c.request_finished();
        assert_eq!(c.active_requests(), 1);
    }

    #[test]
    fn test_register_orders_by_priority_then_insertion() {
        let c = ShutdownCoordinator::new(&fast_config());
        c.register(ShutdownHandler::new("a", || Ok(())).with_priority(10)).unwrap();
        c.register(ShutdownHandler::new("b", || Ok(())).with_priority(5)).unwrap();
        c.register(ShutdownHandler::new("c", || Ok(())).with_priority(10)).unwrap();
        assert_eq!(c.get_status().handlers, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let c = ShutdownCoordinator::new(&fast_config());
        c.register(ShutdownHandler::new("cache", || Ok(())).with_priority(20)).unwrap();
        c.register(ShutdownHandler::new("pool", || Ok(())).with_priority(30)).unwrap();
        c.register(ShutdownHandler::new("cache", || Ok(())).with_priority(40)).unwrap();
        assert_eq!(c.get_status().handlers, vec!["pool", "cache"]);
        assert!(c.unregister("pool"));
        assert!(!c.unregister("pool"));
        assert_eq!(c.get_status().handlers, vec!["cache"]);
    }

    #[test]
    fn test_registration_rejected_after_shutdown() {
        let c = ShutdownCoordinator::new(&fast_config());
        assert!(c.shutdown().is_some());
        let err = c
            .register(ShutdownHandler::new("late", || Ok(())))
            .unwrap_err();
        assert!(matches!(err, ResilienceError::RegistrationClosed(name) if name == "late"));
    }

    #[test]
    fn test_second_shutdown_is_noop() {
        let c = ShutdownCoordinator::new(&fast_config());
        let first = c.shutdown().unwrap();
        assert!(first.drained);
        assert!(c.shutdown().is_none());
        assert_eq!(c.last_report(), Some(first));
        assert!(c.get_status().shutdown_at_ms.is_some());
    }

    #[test]
    fn test_drain_waits_for_guard() {
        let c = Arc::new(ShutdownCoordinator::new(&ShutdownConfig {
            timeout_secs: 5,
            drain_poll_ms: 50,
        }));
        let guard = c.track_request();
        assert_eq!(c.active_requests(), 1);

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            drop(guard);
        });
        let started = Instant::now();
        let report = c.shutdown().unwrap();
        releaser.join().unwrap();

        assert!(report.drained);
        assert_eq!(report.remaining_requests, 0);
        assert!(started.elapsed() >= Duration::from_millis(90));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_drain_timeout_proceeds() {
        let c = Arc::new(ShutdownCoordinator::new(&fast_config()));
        let _stuck = c.track_request();
        let ran = Arc::new(Mutex::new(false));
        let r = Arc::clone(&ran);
        c.register(ShutdownHandler::new("after-drain", move || {
            *r.lock() = true;
            Ok(())
        }))
        .unwrap();

        let report = c.shutdown().unwrap();
        assert!(!report.drained);
        assert_eq!(report.remaining_requests, 1);
        assert!(*ran.lock());
        assert_eq!(c.state(), ShutdownState::Complete);
    }

    #[test]
    fn test_status_readable_mid_shutdown() {
        let c = Arc::new(ShutdownCoordinator::new(&fast_config()));
        let seen = Arc::new(Mutex::new(None));
        let weak: Weak<ShutdownCoordinator> = Arc::downgrade(&c);
        let s = Arc::clone(&seen);
        c.register(ShutdownHandler::new("inspect", move || {
            if let Some(c) = weak.upgrade() {
                *s.lock() = Some(c.get_status().state);
            }
            Ok(())
        }))
        .unwrap();

        c.shutdown().unwrap();
        assert_eq!(*seen.lock(), Some(ShutdownState::RunningHandlers));
    }

    #[test]
    fn test_wait_for_completion() {
        let c = Arc::new(ShutdownCoordinator::new(&fast_config()));
        assert!(!c.wait_for_completion(Duration::from_millis(20)));

        c.register(ShutdownHandler::new("slowish", || {
            thread::sleep(Duration::from_millis(50));
            Ok(())
        }))
        .unwrap();
        let runner = Arc::clone(&c);
        let t = thread::spawn(move || runner.shutdown());
        assert!(c.wait_for_completion(Duration::from_secs(2)));
        assert!(t.join().unwrap().is_some());
    }

    #[test]
    fn test_wait_for_completion_unbounded() {
        let c = Arc::new(ShutdownCoordinator::new(&fast_config()));
        let runner = Arc::clone(&c);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            runner.shutdown()
        });
        assert!(c.wait_for_completion(Duration::MAX));
        assert!(t.join().unwrap().is_some());
    }

    #[test]
    fn test_report_collects_failures() {
        let c = ShutdownCoordinator::new(&fast_config());
        let bad = ShutdownHandler::new("bad", || Err(anyhow::anyhow!("nope"))).with_priority(1);
        c.register(bad).unwrap();
        c.register(ShutdownHandler::new("good", || Ok(())).with_priority(2)).unwrap();
        let report = c.shutdown().unwrap();
        assert!(!report.all_succeeded());
        let failed: Vec<&str> = report.failures().map(|h| h.name.as_str()).collect();
        assert_eq!(failed, vec!["bad"]);
        assert_eq!(report.handlers[1].outcome, HandlerOutcome::Completed);
    }
}
