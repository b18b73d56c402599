//! Sliding-window scheduler: assembles windows from a contiguous sample
//! stream, dispatches each to every registered device in order, and
//! reports deadline status. Generalizes the teacher's
//! `ServerDriver::process_event` → `Vec<ServerAction>` shape into
//! `feed_samples`/`flush` → `Vec<SchedulerAction>`, keeping the scheduler
//! itself pure even though dispatch blocks on `device_execute`.

use std::time::{Duration, Instant};

use cortex_harness::{device_execute, DeviceHandle};
use thiserror::Error;

/// Errors raised by the scheduler itself, as opposed to a device failure
/// (which is recorded in telemetry, not raised).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A byte-size calculation (window buffer, output buffer) overflowed.
    #[error("size calculation overflowed")]
    SizeOverflow,
}

/// One registered device: its live handle and the identifying strings
/// telemetry records carry.
pub struct RegisteredDevice {
    /// Live harness-side handle.
    pub handle: DeviceHandle,
    /// Kernel/plugin name under test.
    pub plugin_name: String,
    /// Adapter's self-reported name, captured at `device_init`.
    pub adapter_name: String,
}

/// Outcome of dispatching one window to one device.
pub struct DispatchOutcome {
    /// Index into the scheduler's registered-device list.
    pub device_index: usize,
    /// Cumulative window index (post-warmup numbering starts at 0).
    pub window_index: u64,
    /// Host-clock timestamp just before `device_execute` was called.
    pub host_start_ns: u64,
    /// Host-clock timestamp just after `device_execute` returned.
    pub host_end_ns: u64,
    /// When this window was released to devices.
    pub release_ts_ns: u64,
    /// The deadline computed from `release_ts_ns + round(1e9 * H / Fs)`.
    pub deadline_ts_ns: u64,
    /// Whether `host_end_ns` exceeded `deadline_ts_ns`.
    pub deadline_missed: bool,
    /// Whether the device raised an error executing this window.
    pub window_failed: bool,
    /// Stable numeric error code when `window_failed`; `0` otherwise.
    pub error_code: i32,
    /// Device-side timestamps, all zero when `window_failed`.
    pub device_timing: DeviceWindowTiming,
    /// Was this window within the warmup period (and thus not recorded)?
    pub warmup: bool,
}

/// Device-reported timestamps for one window, copied out of its RESULT.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceWindowTiming {
    /// When the window's LAST chunk was decoded, device-monotonic.
    pub t_in: u64,
    /// Immediately before kernel execution, device-monotonic.
    pub t_start: u64,
    /// Immediately after kernel execution, device-monotonic.
    pub t_end: u64,
    /// First transmitted byte of the RESULT, device-monotonic.
    pub t_first_tx: u64,
    /// Last transmitted byte of the RESULT, device-monotonic.
    pub t_last_tx: u64,
}

/// Fixed window parameters and accumulation state for one plugin run.
pub struct Scheduler {
    sample_rate_hz: u32,
    window_samples: u32,
    hop_samples: u32,
    channels: u32,
    warmup_windows_remaining: u64,
    window_count: u64,
    input_buffer: Vec<f32>,
    epoch: Instant,
}

impl Scheduler {
    /// Build a scheduler for fixed (Fs, W, H, C), with a warmup period
    /// expressed in seconds and converted to a window count.
    ///
    /// # Errors
    /// Returns [`SchedulerError::SizeOverflow`] if `W * C` overflows.
    pub fn new(
        sample_rate_hz: u32,
        window_samples: u32,
        hop_samples: u32,
        channels: u32,
        warmup_seconds: f64,
    ) -> Result<Self, SchedulerError> {
        let capacity = (window_samples as usize)
            .checked_mul(channels as usize)
            .ok_or(SchedulerError::SizeOverflow)?;
        let warmup_windows = if hop_samples == 0 || sample_rate_hz == 0 {
            0
        } else {
            ((warmup_seconds * f64::from(sample_rate_hz)) / f64::from(hop_samples)) as u64
        };
        Ok(Self {
            sample_rate_hz,
            window_samples,
            hop_samples,
            channels,
            warmup_windows_remaining: warmup_windows,
            window_count: 0,
            input_buffer: Vec::with_capacity(capacity),
            epoch: Instant::now(),
        })
    }

    fn monotonic_now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn deadline_offset_ns(&self) -> u64 {
        (1_000_000_000u64.saturating_mul(u64::from(self.hop_samples))) / u64::from(self.sample_rate_hz.max(1))
    }

    /// Feed a chunk of interleaved samples; dispatch every complete window
    /// the accumulated buffer now contains, in order.
    ///
    /// # Errors
    /// Returns [`SchedulerError::SizeOverflow`] if the window/hop size in
    /// samples overflows a `usize` when combined with `channels`.
    pub fn feed_samples(
        &mut self,
        samples: &[f32],
        devices: &mut [RegisteredDevice],
    ) -> Result<Vec<DispatchOutcome>, SchedulerError> {
        let window_len = (self.window_samples as usize)
            .checked_mul(self.channels as usize)
            .ok_or(SchedulerError::SizeOverflow)?;
        let hop_len = (self.hop_samples as usize)
            .checked_mul(self.channels as usize)
            .ok_or(SchedulerError::SizeOverflow)?;

        let remaining = window_len.saturating_sub(self.input_buffer.len());
        let take = samples.len().min(remaining);
        if take < samples.len() {
            tracing::warn!(
                dropped = samples.len() - take,
                "scheduler input buffer overflow, dropping incoming samples"
            );
        }
        self.input_buffer.extend_from_slice(&samples[..take]);

        let mut outcomes = Vec::new();
        while self.input_buffer.len() >= window_len {
            let window = self.input_buffer[..window_len].to_vec();
            outcomes.extend(self.dispatch_window(&window, devices));
            if hop_len == 0 || hop_len > self.input_buffer.len() {
                self.input_buffer.clear();
                break;
            }
            self.input_buffer.drain(..hop_len);
        }
        Ok(outcomes)
    }

    /// Dispatch any remaining complete window (used at end of stream; a
    /// partial trailing window is discarded, matching the no-synthesis
    /// rule across stream boundaries).
    pub fn flush(&mut self, devices: &mut [RegisteredDevice]) -> Vec<DispatchOutcome> {
        let window_len = (self.window_samples as usize).saturating_mul(self.channels as usize);
        if self.input_buffer.len() < window_len {
            return Vec::new();
        }
        let window = self.input_buffer[..window_len].to_vec();
        self.input_buffer.clear();
        self.dispatch_window(&window, devices)
    }

    fn dispatch_window(&mut self, window: &[f32], devices: &mut [RegisteredDevice]) -> Vec<DispatchOutcome> {
        let release_ts_ns = self.monotonic_now_ns();
        let deadline_ts_ns = release_ts_ns + self.deadline_offset_ns();
        let warmup = self.warmup_windows_remaining > 0;
        let window_index = self.window_count;

        let input_bytes: Vec<u8> = window.iter().flat_map(|sample| sample.to_le_bytes()).collect();

        let mut outcomes = Vec::with_capacity(devices.len());
        for (device_index, device) in devices.iter_mut().enumerate() {
            let host_start_ns = self.monotonic_now_ns();
            let result = device_execute(&mut device.handle, &input_bytes);
            let host_end_ns = self.monotonic_now_ns();

            let (window_failed, error_code, device_timing) = match result {
                Ok((_output, timing)) => (
                    false,
                    0,
                    DeviceWindowTiming {
                        t_in: timing.t_in,
                        t_start: timing.t_start,
                        t_end: timing.t_end,
                        t_first_tx: timing.t_first_tx,
                        t_last_tx: timing.t_last_tx,
                    },
                ),
                Err(err) => {
                    tracing::warn!(plugin = %device.plugin_name, error = %err, "window execution failed");
                    (true, error_code_of(&err), DeviceWindowTiming::default())
                }
            };
            let deadline_missed = !window_failed && host_end_ns > deadline_ts_ns;

            outcomes.push(DispatchOutcome {
                device_index,
                window_index,
                host_start_ns,
                host_end_ns,
                release_ts_ns,
                deadline_ts_ns,
                deadline_missed,
                window_failed,
                error_code,
                device_timing,
                warmup,
            });
        }

        self.window_count += 1;
        if warmup {
            self.warmup_windows_remaining = self.warmup_windows_remaining.saturating_sub(1);
        }
        outcomes
    }

    /// Total windows dispatched so far, including warmup.
    #[must_use]
    pub fn window_count(&self) -> u64 {
        self.window_count
    }
}

fn error_code_of(err: &cortex_harness::HarnessError) -> i32 {
    match err {
        cortex_harness::HarnessError::Cortex(cortex_error) => cortex_error.code(),
        cortex_harness::HarnessError::Process(_) | cortex_harness::HarnessError::Handshake(_) => -100,
    }
}

/// Round `1e9 * hop_samples / sample_rate_hz` the way the scheduler does,
/// exposed standalone for telemetry and tests that need the same figure
/// without a live `Scheduler`.
#[must_use]
pub fn deadline_offset_ns(hop_samples: u32, sample_rate_hz: u32) -> u64 {
    (1_000_000_000u64.saturating_mul(u64::from(hop_samples))) / u64::from(sample_rate_hz.max(1))
}

/// Convert a warmup period in seconds to a window count at the given
/// hop size and sample rate, matching [`Scheduler::new`]'s conversion.
#[must_use]
pub fn warmup_windows(warmup_seconds: f64, sample_rate_hz: u32, hop_samples: u32) -> u64 {
    if hop_samples == 0 || sample_rate_hz == 0 {
        return 0;
    }
    ((warmup_seconds * f64::from(sample_rate_hz)) / f64::from(hop_samples)) as u64
}

/// How long a full window's samples take to arrive at `sample_rate_hz`,
/// used by callers choosing a `window_timeout` for `device_init`.
#[must_use]
pub fn window_duration(window_samples: u32, sample_rate_hz: u32) -> Duration {
    Duration::from_secs_f64(f64::from(window_samples) / f64::from(sample_rate_hz.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::transport::local::LocalTransport;
    use cortex_core::{recv_frame, send_frame, SimEnvironment};
    use cortex_harness::{device_init_with_transport, DeviceHandle, DeviceInitRequest};
    use cortex_proto::payload::{AckPayload, ConfigPayload, HelloPayload, ResultPayload};
    use cortex_proto::FrameType;
    use std::time::Instant as StdInstant;

    /// Spawns a thread that speaks just enough of the wire protocol to
    /// echo a zeroed window of the requested shape back as a RESULT, then
    /// drives `device_init_with_transport` against it over a `LocalTransport`
    /// pair (the same seam `cortex-harness`'s own local-transport tests use).
    fn spawn_echo_adapter(window_samples: u32, channels: u32) -> DeviceHandle {
        let (harness_side, mut fake_adapter) = LocalTransport::pair().unwrap();
        std::thread::spawn(move || {
            let hello = HelloPayload {
                boot_id: 1,
                adapter_abi_version: 1,
                max_window_samples: 8192,
                max_channels: 256,
                adapter_name: "echo".to_string(),
                kernel_names: vec!["identity".to_string()],
                hostname: "echo-host".to_string(),
                cpu_description: "test".to_string(),
                os_description: "test".to_string(),
            };
            send_frame(&mut fake_adapter, FrameType::Hello, &hello.encode()).unwrap();
            let config_frame =
                recv_frame(&mut fake_adapter, StdInstant::now() + Duration::from_secs(1)).unwrap();
            let config = ConfigPayload::decode(&config_frame.payload).unwrap();
            let ack = AckPayload { ack_type: 0, output_window_length_samples: 0, output_channels: 0 };
            send_frame(&mut fake_adapter, FrameType::Ack, &ack.encode()).unwrap();

            loop {
                let window_frame =
                    match recv_frame(&mut fake_adapter, StdInstant::now() + Duration::from_secs(1)) {
                        Ok(frame) => frame,
                        Err(_) => return,
                    };
                if window_frame.frame_type().unwrap() != FrameType::WindowChunk {
                    return;
                }
                let result = ResultPayload {
                    session_id: config.session_id,
                    sequence: 0,
                    t_in: 1,
                    t_start: 2,
                    t_end: 3,
                    t_first_tx: 4,
                    t_last_tx: 5,
                    output_length_samples: window_samples,
                    output_channels: channels,
                    output: vec![0u8; (window_samples * channels * 4) as usize],
                };
                send_frame(&mut fake_adapter, FrameType::Result, &result.encode()).unwrap();
            }
        });

        let env = SimEnvironment::new(1);
        let request = DeviceInitRequest {
            adapter_path: None,
            transport_uri: "",
            plugin_name: "identity",
            plugin_params: &[],
            sample_rate_hz: 160,
            window_samples,
            hop_samples: window_samples / 2,
            channels,
            calibration_state: &[],
            window_timeout: Some(Duration::from_millis(500)),
        };
        device_init_with_transport(&env, Box::new(harness_side), None, &request).unwrap()
    }

    #[test]
    fn feed_samples_dispatches_complete_windows() {
        let handle = spawn_echo_adapter(4, 1);
        let mut devices =
            vec![RegisteredDevice { handle, plugin_name: "identity".to_string(), adapter_name: "echo".to_string() }];
        let mut scheduler = Scheduler::new(160, 4, 2, 1, 0.0).unwrap();

        let samples = vec![0.0f32; 4];
        let outcomes = scheduler.feed_samples(&samples, &mut devices).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].window_failed);
        assert_eq!(outcomes[0].window_index, 0);
    }

    #[test]
    fn feed_samples_drops_excess_past_window_capacity() {
        let mut scheduler = Scheduler::new(160, 4, 4, 1, 0.0).unwrap();
        let mut devices: Vec<RegisteredDevice> = Vec::new();

        // One window's worth plus a large excess, fed in a single call; the
        // excess must be dropped rather than grown into the buffer, since
        // a full window is dispatched (and drained) before any residue
        // would accumulate.
        let samples = vec![0.0f32; 4096];
        scheduler.feed_samples(&samples, &mut devices).unwrap();
        assert_eq!(scheduler.window_count(), 1);
        assert!(scheduler.input_buffer.len() <= 4);
    }

    #[test]
    fn warmup_windows_are_marked_and_not_recorded() {
        let windows = warmup_windows(1.0, 160, 80);
        assert_eq!(windows, 2);
    }

    #[test]
    fn deadline_offset_matches_expected_rounding() {
        assert_eq!(deadline_offset_ns(80, 160), 500_000_000);
    }

    proptest::proptest! {
        #[test]
        fn deadline_offset_never_exceeds_one_second_per_hop_sample(
            hop_samples in 1u32..100_000,
            sample_rate_hz in 1u32..200_000,
        ) {
            let offset = deadline_offset_ns(hop_samples, sample_rate_hz);
            let expected = (1_000_000_000u64 * u64::from(hop_samples)) / u64::from(sample_rate_hz);
            proptest::prop_assert_eq!(offset, expected);
        }

        #[test]
        fn deadline_offset_is_zero_only_when_hop_is_zero(sample_rate_hz in 1u32..200_000) {
            proptest::prop_assert_eq!(deadline_offset_ns(0, sample_rate_hz), 0);
        }
    }
}
