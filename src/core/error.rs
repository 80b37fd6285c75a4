//! Error types for the resilience core.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the cache, pool monitor and shutdown coordinator.
///
/// None of these are user-facing; they surface to operators through logs and
/// to callers that want to propagate their own domain errors.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// No pool resource became available within the checkout budget.
    #[error("timed out waiting for pool resource after {0:?}")]
    PoolTimeout(Duration),
    /// The pool has been disposed and no longer hands out resources.
    #[error("pool has been disposed")]
    PoolDisposed,
    /// The pool factory failed to create a new resource.
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),
    /// A shutdown handler was registered after shutdown began.
    #[error("handler `{0}` rejected: shutdown already in progress")]
    RegistrationClosed(String),
    /// A shutdown handler exceeded its time budget and was abandoned.
    #[error("handler `{name}` timed out after {timeout:?}")]
    HandlerTimeout {
        /// Handler name.
        name: String,
        /// Configured budget.
        timeout: Duration,
    },
    /// A shutdown handler returned an error.
    #[error("handler `{name}` failed: {reason}")]
    HandlerFailed {
        /// Handler name.
        name: String,
        /// Error reported by the handler.
        reason: String,
    },
    /// A shutdown handler panicked.
    #[error("handler `{0}` panicked")]
    HandlerPanicked(String),
    /// An alert callback returned an error or panicked.
    #[error("alert callback failed: {0}")]
    CallbackFailed(String),
    /// A cache key pattern could not be compiled.
    #[error("invalid key pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// The glob pattern as given.
        pattern: String,
        /// Compiler error.
        reason: String,
    },
    /// Configuration failed to parse or validate.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A background thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}

/// Application-facing result using anyhow for user-supplied actions.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
