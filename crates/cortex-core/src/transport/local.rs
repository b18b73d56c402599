//! Local paired-FD transport: a `UnixStream` half of a socketpair, or the
//! co-located adapter's stdin/stdout.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Instant;

use crate::error::TransportError;
use crate::transport::Transport;

/// Transport over one end of a `socketpair`-created `UnixStream`.
pub struct LocalTransport {
    stream: UnixStream,
    epoch: Instant,
    closed: bool,
}

impl LocalTransport {
    /// Create a connected pair of local transports, for co-located harness
    /// and adapter processes that don't go through `fork`/`exec`.
    pub fn pair() -> Result<(Self, Self), TransportError> {
        let (a, b) = UnixStream::pair().map_err(TransportError::from)?;
        let epoch = Instant::now();
        Ok((
            Self { stream: a, epoch, closed: false },
            Self { stream: b, epoch, closed: false },
        ))
    }

    /// Wrap an existing connected stream (e.g. the harness's end of a
    /// socketpair whose other end was handed to a spawned child's stdio).
    #[must_use]
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream, epoch: Instant::now(), closed: false }
    }
}

impl Transport for LocalTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(bytes).map_err(TransportError::from)
    }

    fn recv_byte(&mut self, deadline: Instant) -> Result<u8, TransportError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::Timeout);
        }
        self.stream.set_read_timeout(Some(remaining)).map_err(TransportError::from)?;
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte) {
            Ok(0) => Err(TransportError::ConnReset),
            Ok(_) => Ok(byte[0]),
            Err(err) => Err(TransportError::from(err)),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // `shutdown` on an already-broken stream is not an error condition
        // worth surfacing; teardown must be infallible-ish here.
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    fn monotonic_timestamp_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pair_can_exchange_bytes() {
        let (mut a, mut b) = LocalTransport::pair().unwrap();
        a.send(b"hi").unwrap();
        let deadline = Instant::now() + Duration::from_millis(500);
        assert_eq!(b.recv_byte(deadline).unwrap(), b'h');
        assert_eq!(b.recv_byte(deadline).unwrap(), b'i');
    }

    #[test]
    fn close_is_idempotent() {
        let (mut a, _b) = LocalTransport::pair().unwrap();
        a.close().unwrap();
        a.close().unwrap();
    }

    #[test]
    fn recv_times_out_with_no_data() {
        let (_a, mut b) = LocalTransport::pair().unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(matches!(b.recv_byte(deadline), Err(TransportError::Timeout)));
    }
}
