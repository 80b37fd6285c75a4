//! Runtime adapters.
//!
//! Everything here needs the `tokio-runtime` feature. The rest of the crate is
//! plain threads and works without an async runtime.

pub mod signal;

pub use signal::{spawn_signal_listener, wait_for_termination, SignalListener, TerminationSignal};
