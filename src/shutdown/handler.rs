//! Shutdown handlers and bounded-time execution.
//!
//! Each handler runs on its own named thread and the coordinator waits on a
//! `crossbeam_channel` with `recv_timeout`. A handler that overruns is
//! abandoned: its thread keeps running detached and its late result is
//! discarded. The bound applies to the coordinator's wait, not to the handler.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};

use crate::core::error::panic_message;
use crate::core::{AppResult, ResilienceError};
use crate::util::clock::deadline_after;

/// Priority used when a handler doesn't set one.
pub const DEFAULT_PRIORITY: i32 = 50;

/// Cleanup action run once during shutdown.
pub type HandlerAction = Arc<dyn Fn() -> AppResult<()> + Send + Sync>;

/// A named cleanup step. Lower priorities run first.
#[derive(Clone)]
pub struct ShutdownHandler {
    pub(crate) name: String,
    pub(crate) priority: i32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) action: HandlerAction,
}

impl ShutdownHandler {
    /// Create a handler with [`DEFAULT_PRIORITY`] and the coordinator's
    /// default timeout.
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> AppResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            timeout: None,
            action: Arc::new(action),
        }
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Bound how long the coordinator waits for this handler.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Handler name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handler priority.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Explicit timeout, if one was set.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Debug for ShutdownHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandler")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// How a handler ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandlerOutcome {
    /// Returned `Ok` within its timeout.
    Completed,
    /// Returned an error.
    Failed {
        /// Error chain rendered as text.
        reason: String,
    },
    /// Panicked.
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
    /// Still running when its timeout elapsed; abandoned.
    TimedOut {
        /// Budget the handler exceeded.
        timeout: Duration,
    },
}

impl HandlerOutcome {
    /// Whether the handler completed successfully.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// The error this outcome represents, for logging.
    #[must_use]
    pub fn to_error(&self, name: &str) -> Option<ResilienceError> {
        match self {
            Self::Completed => None,
            Self::Failed { reason } => Some(ResilienceError::HandlerFailed {
                name: name.to_string(),
                reason: reason.clone(),
            }),
            Self::Panicked { .. } => Some(ResilienceError::HandlerPanicked(name.to_string())),
            Self::TimedOut { timeout } => Some(ResilienceError::HandlerTimeout {
                name: name.to_string(),
                timeout: *timeout,
            }),
        }
    }
}

/// Result of one handler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerResult {
    /// Handler name.
    pub name: String,
    /// Handler priority.
    pub priority: i32,
    /// How it ended.
    pub outcome: HandlerOutcome,
    /// Time the coordinator spent on it.
    pub elapsed: Duration,
}

/// Run `handler` on a dedicated thread and wait at most `timeout` for it.
pub(crate) fn run_bounded(handler: &ShutdownHandler, timeout: Duration) -> HandlerResult {
    let started = Instant::now();
    let (tx, rx) = bounded::<Result<AppResult<()>, String>>(1);
    let action = Arc::clone(&handler.action);

    let spawned = thread::Builder::new()
        .name(format!("shutdown-{}", handler.name))
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| action()))
                .map_err(|payload| panic_message(payload.as_ref()));
            // The receiver is gone if the coordinator already gave up.
            let _ = tx.send(result);
        });

    let outcome = match spawned {
        Err(e) => HandlerOutcome::Failed {
            reason: ResilienceError::Spawn(e.to_string()).to_string(),
        },
        Ok(_detached) => match wait_for_report(&rx, timeout) {
            Ok(Ok(Ok(()))) => HandlerOutcome::Completed,
            Ok(Ok(Err(e))) => HandlerOutcome::Failed {
                reason: format!("{e:#}"),
            },
            Ok(Err(message)) => HandlerOutcome::Panicked { message },
            Err(RecvTimeoutError::Timeout) => HandlerOutcome::TimedOut { timeout },
            Err(RecvTimeoutError::Disconnected) => HandlerOutcome::Failed {
                reason: "handler thread exited without reporting".to_string(),
            },
        },
    };

    HandlerResult {
        name: handler.name.clone(),
        priority: handler.priority,
        outcome,
        elapsed: started.elapsed(),
    }
}

fn wait_for_report<T>(rx: &Receiver<T>, timeout: Duration) -> Result<T, RecvTimeoutError> {
    match deadline_after(timeout) {
        Some(at) => rx.recv_deadline(at),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    }
}
