//! Harness-specific error wrapping: every failure surfaced by
//! `device_init`/`device_execute`/`device_teardown` is a [`cortex_core::CortexError`],
//! plus a narrow process-spawn failure mode that has no protocol-layer
//! equivalent.

use thiserror::Error;

/// Failures from the harness-side device session.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A transport, framing, chunking, or session-level failure.
    #[error(transparent)]
    Cortex(#[from] cortex_core::CortexError),
    /// Spawning or reaping the adapter child process failed.
    #[error("adapter process error: {0}")]
    Process(String),
    /// The adapter's first frame was not HELLO, or was ERROR.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl HarnessError {
    /// Whether this failure is a per-window failure the scheduler should
    /// record and continue past, rather than a fatal handshake error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Cortex(cortex_core::CortexError::Transport(err)) if err.is_transient())
    }
}
