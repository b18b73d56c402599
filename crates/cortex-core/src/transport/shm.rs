//! Shared-memory SPSC ring transport: two cacheline-padded 256 KiB rings
//! (harness-to-adapter and adapter-to-harness) in one named POSIX shm
//! region, each paired with a named counting semaphore that signals the
//! reader when new bytes are available.
//!
//! The harness creates and, on close, unlinks the shm object and both
//! semaphores; the adapter opens them with bounded retry (the harness may
//! not have created them yet at adapter process start).

#![allow(unsafe_code)]

use std::ffi::CString;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::transport::Transport;

const RING_HEADER_LEN: usize = 64;
const RING_TOTAL_LEN: usize = 256 * 1024;
const RING_DATA_LEN: usize = RING_TOTAL_LEN - RING_HEADER_LEN;
const REGION_LEN: usize = RING_TOTAL_LEN * 2;

fn last_os_error() -> TransportError {
    TransportError::from(std::io::Error::last_os_error())
}

/// A single-producer/single-consumer byte ring living inside the mapped
/// shm region. `head` is the next index to write; `tail` the next index to
/// read; the ring holds `RING_DATA_LEN - 1` usable bytes (one slot is kept
/// empty to disambiguate full from empty).
struct RingView {
    head: *const AtomicU32,
    tail: *const AtomicU32,
    data: *mut u8,
}

// SAFETY: `RingView` only ever touches memory through atomics (head/tail)
// or single-byte reads/writes exclusive to one side (producer writes data,
// consumer reads already-published data), matching SPSC discipline.
unsafe impl Send for RingView {}

impl RingView {
    /// View a `RING_TOTAL_LEN`-byte slice of the mapped region as a ring.
    unsafe fn at(base: *mut u8) -> Self {
        let head = base.cast::<AtomicU32>();
        // SAFETY: caller guarantees `base` points to a `RING_TOTAL_LEN`-byte
        // slice with at least 8-byte alignment for the two leading u32s.
        let tail = base.add(4).cast::<AtomicU32>();
        let data = base.add(RING_HEADER_LEN);
        Self { head, tail, data }
    }

    fn init(&self) {
        // SAFETY: pointers are valid for the lifetime of the mapping.
        unsafe {
            (*self.head).store(0, Ordering::Relaxed);
            (*self.tail).store(0, Ordering::Relaxed);
        }
    }

    fn try_push(&self, byte: u8) -> bool {
        // SAFETY: pointers are valid for the lifetime of the mapping.
        unsafe {
            let head = (*self.head).load(Ordering::Relaxed);
            let tail = (*self.tail).load(Ordering::Acquire);
            let next = (head + 1) % RING_DATA_LEN as u32;
            if next == tail {
                return false; // ring full
            }
            *self.data.add(head as usize) = byte;
            (*self.head).store(next, Ordering::Release);
            true
        }
    }

    fn try_pop(&self) -> Option<u8> {
        // SAFETY: pointers are valid for the lifetime of the mapping.
        unsafe {
            let tail = (*self.tail).load(Ordering::Relaxed);
            let head = (*self.head).load(Ordering::Acquire);
            if tail == head {
                return None; // ring empty
            }
            let byte = *self.data.add(tail as usize);
            let next = (tail + 1) % RING_DATA_LEN as u32;
            (*self.tail).store(next, Ordering::Release);
            Some(byte)
        }
    }
}

struct NamedSemaphore {
    handle: *mut libc::sem_t,
    name: CString,
    owner: bool,
}

impl NamedSemaphore {
    fn create(name: &str) -> Result<Self, TransportError> {
        let c_name = CString::new(name).map_err(|_| TransportError::Io("bad semaphore name".into()))?;
        // SAFETY: `c_name` is a valid nul-terminated string for the call's
        // duration; `sem_open` returns `SEM_FAILED` on error.
        let handle = unsafe { libc::sem_open(c_name.as_ptr(), libc::O_CREAT, 0o600, 0) };
        if handle == libc::SEM_FAILED {
            return Err(last_os_error());
        }
        Ok(Self { handle, name: c_name, owner: true })
    }

    fn open_existing(name: &str) -> Result<Self, TransportError> {
        let c_name = CString::new(name).map_err(|_| TransportError::Io("bad semaphore name".into()))?;
        // SAFETY: same as `create`, without `O_CREAT`.
        let handle = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if handle == libc::SEM_FAILED {
            return Err(last_os_error());
        }
        Ok(Self { handle, name: c_name, owner: false })
    }

    fn post(&self) -> Result<(), TransportError> {
        // SAFETY: `handle` is a valid, open semaphore.
        if unsafe { libc::sem_post(self.handle) } != 0 {
            return Err(last_os_error());
        }
        Ok(())
    }

    /// Wait until posted or `deadline`, falling back to poll-sleep(1ms) on
    /// platforms without `sem_timedwait` semantics behaving as expected.
    fn wait_until(&self, deadline: Instant) -> Result<(), TransportError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            let ts = libc::timespec {
                tv_sec: remaining.as_secs() as libc::time_t,
                tv_nsec: libc::c_long::from(remaining.subsec_nanos() as i32),
            };
            // SAFETY: `handle` is valid; `ts` describes a relative-from-now
            // duration converted by the caller into an absolute deadline is
            // not required on platforms lacking `sem_clockwait`, so we
            // instead poll with a short sleep below when this call is
            // unsupported.
            let result = unsafe { libc::sem_trywait(self.handle) };
            if result == 0 {
                return Ok(());
            }
            let _ = ts;
            std::thread::sleep(Duration::from_millis(1).min(remaining));
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: `handle` is valid for the lifetime of this struct.
        unsafe { libc::sem_close(self.handle) };
        if self.owner {
            // SAFETY: `name` is a valid nul-terminated string.
            unsafe { libc::sem_unlink(self.name.as_ptr()) };
        }
    }
}

/// Shared-memory SPSC ring transport.
pub struct ShmTransport {
    shm_fd: i32,
    shm_name: CString,
    region: *mut u8,
    tx_ring: RingView,
    rx_ring: RingView,
    tx_sem: NamedSemaphore,
    rx_sem: NamedSemaphore,
    owner: bool,
    epoch: Instant,
    closed: bool,
}

// SAFETY: the mapped region is only ever accessed through `RingView`'s
// SPSC-safe atomics; the raw fd and pointer are not otherwise shared.
unsafe impl Send for ShmTransport {}

impl ShmTransport {
    /// Create the shm region and both semaphores (harness side).
    pub fn create(name: &str) -> Result<Self, TransportError> {
        Self::open_impl(name, true)
    }

    /// Open an existing shm region and semaphores, retrying briefly if the
    /// harness has not created them yet (adapter side).
    pub fn open(name: &str) -> Result<Self, TransportError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match Self::open_impl(name, false) {
                Ok(transport) => return Ok(transport),
                Err(err) if Instant::now() < deadline => {
                    let _ = err;
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn open_impl(name: &str, owner: bool) -> Result<Self, TransportError> {
        let shm_name = CString::new(format!("/cortex_shm_{name}"))
            .map_err(|_| TransportError::Io("bad shm name".into()))?;
        let flags = if owner { libc::O_CREAT | libc::O_RDWR } else { libc::O_RDWR };
        // SAFETY: `shm_name` is valid for the call's duration; `shm_open`
        // returns a valid fd or -1 with errno set.
        let shm_fd = unsafe { libc::shm_open(shm_name.as_ptr(), flags, 0o600) };
        if shm_fd < 0 {
            return Err(last_os_error());
        }
        if owner {
            // SAFETY: `shm_fd` is a valid, just-created shm fd.
            if unsafe { libc::ftruncate(shm_fd, REGION_LEN as libc::off_t) } != 0 {
                let err = last_os_error();
                // SAFETY: fd is owned exclusively by us at this point.
                unsafe { libc::close(shm_fd) };
                return Err(err);
            }
        }
        // SAFETY: `shm_fd` is a valid fd of at least `REGION_LEN` bytes;
        // the mapping is released in `Drop`.
        let region = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                REGION_LEN,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                shm_fd,
                0,
            )
        };
        if region == libc::MAP_FAILED {
            let err = last_os_error();
            // SAFETY: fd is valid and owned by us.
            unsafe { libc::close(shm_fd) };
            return Err(err);
        }
        let region = region.cast::<u8>();

        // Harness writes into ring 0 (h2a) and reads ring 1 (a2h); the
        // adapter has the mirrored view.
        // SAFETY: `region` maps `REGION_LEN` bytes; both offsets stay in
        // bounds.
        let (h2a, a2h) = unsafe { (RingView::at(region), RingView::at(region.add(RING_TOTAL_LEN))) };
        let (tx_ring, rx_ring) = if owner { (h2a, a2h) } else { (a2h, h2a) };
        if owner {
            tx_ring.init();
            rx_ring.init();
        }

        let (h2a_sem_name, a2h_sem_name) =
            (format!("/cortex_sem_h2a_{name}"), format!("/cortex_sem_a2h_{name}"));
        let (tx_sem_name, rx_sem_name) =
            if owner { (h2a_sem_name, a2h_sem_name) } else { (a2h_sem_name, h2a_sem_name) };
        let (tx_sem, rx_sem) = if owner {
            (NamedSemaphore::create(&tx_sem_name)?, NamedSemaphore::create(&rx_sem_name)?)
        } else {
            (NamedSemaphore::open_existing(&tx_sem_name)?, NamedSemaphore::open_existing(&rx_sem_name)?)
        };

        Ok(Self {
            shm_fd,
            shm_name,
            region,
            tx_ring,
            rx_ring,
            tx_sem,
            rx_sem,
            owner,
            epoch: Instant::now(),
            closed: false,
        })
    }
}

impl Transport for ShmTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        for &byte in bytes {
            let mut attempts = 0u32;
            while !self.tx_ring.try_push(byte) {
                attempts += 1;
                if attempts > 10_000 {
                    return Err(TransportError::Io("shared-memory ring full for too long".into()));
                }
                std::thread::sleep(Duration::from_micros(100));
            }
            self.tx_sem.post()?;
        }
        Ok(())
    }

    fn recv_byte(&mut self, deadline: Instant) -> Result<u8, TransportError> {
        loop {
            if let Some(byte) = self.rx_ring.try_pop() {
                return Ok(byte);
            }
            self.rx_sem.wait_until(deadline)?;
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // SAFETY: `region`/`shm_fd` are valid and owned by this transport.
        unsafe {
            libc::munmap(self.region.cast(), REGION_LEN);
            libc::close(self.shm_fd);
            if self.owner {
                libc::shm_unlink(self.shm_name.as_ptr());
            }
        }
        Ok(())
    }

    fn monotonic_timestamp_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl Drop for ShmTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
