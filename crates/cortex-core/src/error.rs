//! The composed error taxonomy: transport, framing/chunking (re-exported
//! from `cortex-proto`), and session-level errors.

use cortex_proto::ProtocolError;
use thiserror::Error;

/// Transport-layer errors. Every `recv` is bounded by a timeout so a dead
/// or hung peer surfaces as [`TransportError::Timeout`] rather than an
/// indefinite wait.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No byte arrived before the deadline.
    #[error("transport receive timed out")]
    Timeout,
    /// The peer closed the connection or the stream errored.
    #[error("connection reset")]
    ConnReset,
    /// Any other I/O failure constructing or operating a transport.
    #[error("transport I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether this failure is expected to be transient (worth retrying
    /// the next window) rather than indicative of a permanently broken
    /// transport.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                Self::ConnReset
            }
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Session-level errors surfaced by the adapter-side state machine and the
/// harness-side device session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// CONFIG named a plugin the adapter does not host.
    #[error("kernel not found")]
    KernelNotFound,
    /// The kernel failed to initialize with the given runtime config or
    /// calibration state.
    #[error("kernel initialization failed")]
    KernelInitFailed,
    /// The kernel failed during window execution.
    #[error("kernel execution failed")]
    KernelExecFailed,
    /// A RESULT's session_id did not match the handshake's session_id.
    #[error("session id mismatch")]
    SessionMismatch,
    /// CONFIG's calibration_state_size exceeded the maximum.
    #[error("calibration state too large")]
    CalibrationTooBig,
    /// CONFIG failed validation (bad Fs/W/H/C, unsupported dtype, etc).
    #[error("invalid configuration")]
    InvalidConfig,
}

impl SessionError {
    /// Stable numeric code, disjoint from [`ProtocolError::code`]'s range.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::KernelNotFound => 100,
            Self::KernelInitFailed => 101,
            Self::KernelExecFailed => 102,
            Self::SessionMismatch => 103,
            Self::CalibrationTooBig => 104,
            Self::InvalidConfig => 105,
        }
    }
}

/// Top-level error composing every layer a device session can fail at.
#[derive(Debug, Error)]
pub enum CortexError {
    /// Transport-layer failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Framing or chunking failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Session-level failure.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CortexError {
    /// Stable numeric error code used in telemetry's `error_code` column.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Transport(TransportError::Timeout) => -1,
            Self::Transport(TransportError::ConnReset) => -2,
            Self::Transport(TransportError::Io(_)) => -3,
            Self::Protocol(err) => err.code(),
            Self::Session(err) => err.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transient() {
        assert!(TransportError::Timeout.is_transient());
        assert!(!TransportError::ConnReset.is_transient());
    }

    #[test]
    fn session_and_protocol_codes_do_not_collide() {
        let session_codes: Vec<i32> = [
            SessionError::KernelNotFound,
            SessionError::KernelInitFailed,
            SessionError::KernelExecFailed,
            SessionError::SessionMismatch,
            SessionError::CalibrationTooBig,
            SessionError::InvalidConfig,
        ]
        .iter()
        .map(SessionError::code)
        .collect();
        assert!(session_codes.iter().all(|c| *c >= 100));
    }
}
