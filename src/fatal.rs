//! Unrecoverable conditions and the hook that acts on them.
//!
//! In production [`ExitProcess`] terminates with a non-zero status. Tests install
//! [`RecordingFatal`](crate::mock::RecordingFatal) instead, and the task that raised the
//! condition simply stops.

use tracing::error;

/// A condition the dispatcher cannot recover from.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Fatal {
    /// Channel open, exchange, queue or binding could not be set up.
    #[error("Topology setup failed: {0}")]
    Topology(String),

    /// A ready channel refused the subscription.
    #[error("Failed to consume: {0}")]
    Subscription(String),

    /// Deliberate crash used to exercise restart infrastructure.
    #[error("Crashing out: drew {roll} below error percent {error_percent}")]
    InjectedFault { roll: u32, error_percent: u8 },
}

/// Invoked when a task hits a [`Fatal`] condition.
pub trait FatalHook: Send + Sync + 'static {
    fn trigger(&self, fatal: &Fatal);
}

/// Logs the condition and exits the process with status 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitProcess;

impl FatalHook for ExitProcess {
    fn trigger(&self, fatal: &Fatal) {
        error!(error = %fatal, "Fatal condition, exiting");
        std::process::exit(1);
    }
}
