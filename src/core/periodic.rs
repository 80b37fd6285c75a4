//! Stoppable periodic background task on a dedicated OS thread.
//!
//! The thread parks on a `parking_lot::Condvar` between ticks instead of
//! sleeping, so [`PeriodicTask::stop`] wakes it immediately regardless of the
//! interval length.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::core::error::{panic_message, ResilienceError};
use crate::util::clock::deadline_after;

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    fn trigger(&self) {
        *self.stopped.lock() = true;
        self.condvar.notify_all();
    }

    /// Park for up to `interval`. Returns true once stop has been requested.
    fn wait_for(&self, interval: Duration) -> bool {
        let deadline = deadline_after(interval);
        let mut stopped = self.stopped.lock();
        while !*stopped {
            match deadline {
                Some(at) => {
                    if self.condvar.wait_until(&mut stopped, at).timed_out() {
                        break;
                    }
                }
                None => self.condvar.wait(&mut stopped),
            }
        }
        *stopped
    }
}

/// A closure run every `interval` on its own thread until stopped.
pub struct PeriodicTask {
    name: String,
    stop: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn the task. `tick` runs once immediately, then once per interval.
    ///
    /// A panicking tick is logged and the loop keeps going.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::Spawn`] if the OS refuses the thread.
    pub fn spawn<F>(
        name: impl Into<String>,
        interval: Duration,
        mut tick: F,
    ) -> Result<Self, ResilienceError>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let stop = Arc::new(StopSignal::default());
        let thread_stop = Arc::clone(&stop);
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(
                    task = %thread_name,
                    interval_ms = interval.as_millis(),
                    "periodic task started"
                );
                loop {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(&mut tick)) {
                        error!(
                            task = %thread_name,
                            panic = %panic_message(payload.as_ref()),
                            "periodic task tick panicked"
                        );
                    }
                    if thread_stop.wait_for(interval) {
                        break;
                    }
                }
                debug!(task = %thread_name, "periodic task stopped");
            })
            .map_err(|e| ResilienceError::Spawn(e.to_string()))?;

        Ok(Self {
            name,
            stop,
            handle: Some(handle),
        })
    }

    /// Task name (also the thread name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the background thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal the thread to stop and wait for the current tick to finish.
    pub fn stop(mut self) {
        self.stop.trigger();
        let Some(handle) = self.handle.take() else {
            return;
        };
        // Stopping from inside the tick would deadlock on join.
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(task = %self.name, "periodic task thread panicked");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        // Signal only; explicit stop() is required to join.
        self.stop.trigger();
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}
