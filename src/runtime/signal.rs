//! Termination signal binding.
//!
//! Signal streams must be installed from inside the main tokio runtime. Each
//! received signal triggers [`ShutdownCoordinator::shutdown`] on the blocking
//! pool; repeats after the first are no-ops inside the coordinator.

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::ResilienceError;
use crate::shutdown::ShutdownCoordinator;

/// Which termination signal arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// Ctrl-C / SIGINT.
    Interrupt,
    /// SIGTERM (unix only).
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        })
    }
}

/// Installed signal streams. Receives every termination signal, not just the
/// first.
///
/// Both streams are registered in [`install`](Self::install), so a signal that
/// arrives before the first [`recv`](Self::recv) is buffered instead of
/// running the default action.
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(windows)]
    interrupt: tokio::signal::windows::CtrlC,
}

impl SignalListener {
    /// Install the signal handlers.
    ///
    /// # Errors
    ///
    /// Fails if the OS refuses the registration or no tokio runtime with IO
    /// enabled is running.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Install the Ctrl-C handler.
    ///
    /// # Errors
    ///
    /// Fails if the OS refuses the registration or no tokio runtime with IO
    /// enabled is running.
    #[cfg(windows)]
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: tokio::signal::windows::ctrl_c()?,
        })
    }

    /// Wait for the next termination signal.
    ///
    /// # Errors
    ///
    /// Fails if a signal stream closes.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> io::Result<TerminationSignal> {
        tokio::select! {
            received = self.interrupt.recv() => received
                .map(|()| TerminationSignal::Interrupt)
                .ok_or_else(|| io::Error::other("SIGINT stream closed")),
            received = self.terminate.recv() => received
                .map(|()| TerminationSignal::Terminate)
                .ok_or_else(|| io::Error::other("SIGTERM stream closed")),
        }
    }

    /// Wait for the next Ctrl-C.
    ///
    /// # Errors
    ///
    /// Fails if the Ctrl-C stream closes.
    #[cfg(windows)]
    pub async fn recv(&mut self) -> io::Result<TerminationSignal> {
        self.interrupt
            .recv()
            .await
            .map(|()| TerminationSignal::Interrupt)
            .ok_or_else(|| io::Error::other("Ctrl-C stream closed"))
    }
}

/// Resolve on the first Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Same as [`SignalListener::install`] and [`SignalListener::recv`].
pub async fn wait_for_termination() -> io::Result<TerminationSignal> {
    SignalListener::install()?.recv().await
}

/// Install signal handlers now and spawn a task that triggers shutdown once per
/// received signal.
///
/// Call from the main runtime context, before any other work that could
/// receive a signal.
///
/// # Errors
///
/// [`ResilienceError::Spawn`] if called outside a tokio runtime or the signal
/// handlers can't be installed.
pub fn spawn_signal_listener(
    coordinator: Arc<ShutdownCoordinator>,
) -> Result<JoinHandle<()>, ResilienceError> {
    let handle = Handle::try_current().map_err(|e| ResilienceError::Spawn(e.to_string()))?;
    let mut listener = {
        let _enter = handle.enter();
        SignalListener::install().map_err(|e| ResilienceError::Spawn(e.to_string()))?
    };

    Ok(handle.spawn(async move {
        loop {
            let signal = match listener.recv().await {
                Ok(signal) => signal,
                Err(e) => {
                    error!(error = %e, "signal listener failed");
                    break;
                }
            };
            info!(%signal, "termination signal received");

            let c = Arc::clone(&coordinator);
            match tokio::task::spawn_blocking(move || c.shutdown()).await {
                Ok(Some(report)) if !report.all_succeeded() => {
                    warn!(
                        failures = report.failures().count(),
                        "shutdown finished with failures"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "shutdown task panicked"),
            }
        }
    }))
}
