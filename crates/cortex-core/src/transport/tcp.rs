//! TCP client and server transports.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::transport::Transport;

/// Harness-side TCP client transport, or an already-accepted adapter-side
/// connection.
pub struct TcpTransport {
    stream: TcpStream,
    epoch: Instant,
    closed: bool,
}

impl TcpTransport {
    /// Connect to `host:port`, bounded by `timeout`.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        use std::net::ToSocketAddrs;
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(TransportError::from)?
            .next()
            .ok_or_else(|| TransportError::Io(format!("could not resolve {host}:{port}")))?;
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(TransportError::from)?;
        stream.set_nodelay(true).map_err(TransportError::from)?;
        Ok(Self { stream, epoch: Instant::now(), closed: false })
    }

    /// Bind a server socket and accept exactly one connection, bounded by
    /// `accept_timeout`.
    pub fn accept_one(port: u16, accept_timeout: Duration) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind(("0.0.0.0", port)).map_err(TransportError::from)?;
        listener.set_nonblocking(true).map_err(TransportError::from)?;
        let deadline = Instant::now() + accept_timeout;
        loop {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).map_err(TransportError::from)?;
                    stream.set_nodelay(true).map_err(TransportError::from)?;
                    return Ok(Self { stream, epoch: Instant::now(), closed: false });
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(err) => return Err(TransportError::from(err)),
            }
        }
    }
}

impl Transport for TcpTransport {
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
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    fn monotonic_timestamp_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}
