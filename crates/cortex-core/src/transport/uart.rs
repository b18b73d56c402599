//! POSIX serial (UART) transport: 8N1, raw mode, no flow control,
//! `select()`-based timeout.
//!
//! This module talks to `termios`/`select` directly through `libc`; the
//! raw file descriptor is owned exclusively by [`UartTransport`] and closed
//! exactly once.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::os::fd::RawFd;
use std::time::Instant;

use crate::error::TransportError;
use crate::transport::Transport;

fn baud_constant(baud: u32) -> libc::speed_t {
    match baud {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        460_800 => libc::B460800,
        921_600 => libc::B921600,
        _ => libc::B115200,
    }
}

/// Transport over a POSIX serial device, configured 8N1 / raw mode.
pub struct UartTransport {
    fd: RawFd,
    epoch: Instant,
    closed: bool,
}

impl UartTransport {
    /// Open `device_path` at `baud`, configuring raw 8N1 mode with no flow
    /// control.
    pub fn open(device_path: &str, baud: u32) -> Result<Self, TransportError> {
        let path = CString::new(device_path)
            .map_err(|_| TransportError::Io("device path contains a nul byte".to_string()))?;
        // SAFETY: `path` is a valid, nul-terminated C string for the
        // duration of this call; `open` returns either a valid owned fd or
        // -1 with errno set.
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_NOCTTY) };
        if fd < 0 {
            return Err(TransportError::from(std::io::Error::last_os_error()));
        }

        // SAFETY: `termios` is a plain-old-data struct; zeroing it and then
        // populating it via `tcgetattr`/direct field writes is the standard
        // pattern for configuring a serial line.
        let mut term: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: `fd` is a valid, open fd for a terminal device and
        // `term` is a valid, writable `termios`.
        if unsafe { libc::tcgetattr(fd, &mut term) } != 0 {
            // SAFETY: `fd` was just opened above and not yet used elsewhere.
            unsafe { libc::close(fd) };
            return Err(TransportError::from(std::io::Error::last_os_error()));
        }

        let speed = baud_constant(baud);
        // SAFETY: `cfsetispeed`/`cfsetospeed` only mutate `term` in place.
        unsafe {
            libc::cfsetispeed(&mut term, speed);
            libc::cfsetospeed(&mut term, speed);
            libc::cfmakeraw(&mut term);
        }
        term.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;
        term.c_cflag &= !(libc::PARENB | libc::CSTOPB | libc::CRTSCTS);
        term.c_cc[libc::VMIN] = 0;
        term.c_cc[libc::VTIME] = 0;

        // SAFETY: `fd` is open and `term` is fully initialized above.
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &term) } != 0 {
            // SAFETY: see above; fd has no other owners yet.
            unsafe { libc::close(fd) };
            return Err(TransportError::from(std::io::Error::last_os_error()));
        }

        Ok(Self { fd, epoch: Instant::now(), closed: false })
    }

    fn wait_readable(&self, deadline: Instant) -> Result<(), TransportError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::Timeout);
        }
        let mut tv = libc::timeval {
            tv_sec: remaining.as_secs() as libc::time_t,
            tv_usec: libc::suseconds_t::from(remaining.subsec_micros()),
        };
        // SAFETY: `read_fds` is a local, fully-initialized `fd_set`; `self.fd`
        // is valid for the lifetime of this call.
        let mut read_fds: libc::fd_set = unsafe { std::mem::zeroed() };
        // SAFETY: `read_fds` was just zero-initialized above.
        unsafe { libc::FD_SET(self.fd, &mut read_fds) };
        // SAFETY: all pointers passed are valid for the duration of the
        // call; `self.fd + 1` correctly bounds the descriptor set.
        let ready = unsafe {
            libc::select(
                self.fd + 1,
                &mut read_fds,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut tv,
            )
        };
        match ready {
            0 => Err(TransportError::Timeout),
            n if n > 0 => Ok(()),
            _ => Err(TransportError::from(std::io::Error::last_os_error())),
        }
    }
}

impl Transport for UartTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut written = 0usize;
        while written < bytes.len() {
            // SAFETY: `fd` is open and owned by this transport; the slice
            // pointer and remaining length stay within `bytes`.
            let n = unsafe {
                libc::write(
                    self.fd,
                    bytes[written..].as_ptr().cast(),
                    bytes.len() - written,
                )
            };
            if n < 0 {
                return Err(TransportError::from(std::io::Error::last_os_error()));
            }
            written += n as usize;
        }
        Ok(())
    }

    fn recv_byte(&mut self, deadline: Instant) -> Result<u8, TransportError> {
        self.wait_readable(deadline)?;
        let mut byte = [0u8; 1];
        // SAFETY: `fd` is open; `byte` is a valid 1-byte buffer.
        let n = unsafe { libc::read(self.fd, byte.as_mut_ptr().cast(), 1) };
        match n {
            0 => Err(TransportError::ConnReset),
            1 => Ok(byte[0]),
            _ => Err(TransportError::from(std::io::Error::last_os_error())),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // SAFETY: `fd` is open and owned exclusively by this transport.
        unsafe { libc::close(self.fd) };
        Ok(())
    }

    fn monotonic_timestamp_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl Drop for UartTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
