//! Transport abstraction: a reliable byte stream with bounded-timeout
//! receive, and the four concrete variants named by the protocol.

pub mod local;
pub mod shm;
pub mod tcp;
pub mod uart;
pub mod uri;

use std::time::{Duration, Instant};

use crate::error::TransportError;

/// A reliable, bidirectional byte-stream transport.
///
/// `recv_byte` guarantees termination by `deadline`, returning
/// [`TransportError::Timeout`] if no byte arrives in time. `send` blocks
/// until the full buffer is accepted by the peer or the connection is
/// observed lost ([`TransportError::ConnReset`]).
pub trait Transport: Send {
    /// Send `bytes` in full.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Receive exactly one byte, or time out at `deadline`.
    fn recv_byte(&mut self, deadline: Instant) -> Result<u8, TransportError>;

    /// Release the transport's resources. Must be safe to call more than
    /// once.
    fn close(&mut self) -> Result<(), TransportError>;

    /// A monotonic timestamp in nanoseconds, used to stamp device-side
    /// timing fields.
    fn monotonic_timestamp_ns(&self) -> u64;
}

/// Receive `len` bytes into a freshly allocated buffer, respecting
/// `deadline` across the whole read.
pub fn recv_exact(
    transport: &mut dyn Transport,
    len: usize,
    deadline: Instant,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::with_capacity(len);
    for _ in 0..len {
        buf.push(transport.recv_byte(deadline)?);
    }
    Ok(buf)
}

/// Compute an absolute deadline `timeout` from now.
#[must_use]
pub fn deadline_from(timeout: Duration) -> Instant {
    Instant::now() + timeout
}
