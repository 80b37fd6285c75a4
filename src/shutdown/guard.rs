//! RAII guards around the coordinator.

use std::sync::Arc;

use tracing::warn;

use super::{ShutdownCoordinator, ShutdownState};

/// Counts one in-flight request for as long as it lives.
///
/// Created by [`ShutdownCoordinator::track_request`].
#[must_use = "the request is finished as soon as the guard is dropped"]
pub struct RequestGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl RequestGuard {
    pub(crate) fn new(coordinator: Arc<ShutdownCoordinator>) -> Self {
        coordinator.request_started();
        Self { coordinator }
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.coordinator.request_finished();
    }
}

/// Process-exit fallback. Runs shutdown on drop unless it already completed.
///
/// Keep it alive in `main` so early returns and unwinding still clean up:
///
/// ```
/// use std::sync::Arc;
/// use resilience_core::config::ShutdownConfig;
/// use resilience_core::shutdown::{ShutdownCoordinator, ShutdownState};
///
/// let coordinator = Arc::new(ShutdownCoordinator::new(&ShutdownConfig::default()));
/// {
///     let _exit = coordinator.exit_guard();
/// }
/// assert_eq!(coordinator.get_status().state, ShutdownState::Complete);
/// ```
#[must_use = "shutdown runs as soon as the guard is dropped"]
pub struct ShutdownOnDrop {
    coordinator: Arc<ShutdownCoordinator>,
    armed: bool,
}

impl ShutdownOnDrop {
    pub(crate) const fn new(coordinator: Arc<ShutdownCoordinator>) -> Self {
        Self {
            coordinator,
            armed: true,
        }
    }

    /// Skip the fallback, e.g. when the process hands off to another owner.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.coordinator.state() {
            ShutdownState::Complete => {}
            ShutdownState::Idle => {
                warn!("process exiting without shutdown, running fallback");
                let _ = self.coordinator.shutdown();
            }
            ShutdownState::Draining | ShutdownState::RunningHandlers => {
                // Another thread is mid-shutdown; give it the drain ceiling to finish.
                let budget = self.coordinator.config().drain_timeout();
                if !self.coordinator.wait_for_completion(budget) {
                    warn!("shutdown still running at process exit");
                }
            }
        }
    }
}
