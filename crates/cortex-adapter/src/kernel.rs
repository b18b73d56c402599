//! The kernel seam: a processing function hosted by the adapter, loaded by
//! name from CONFIG's `plugin_name`.
//!
//! The numerical content of specific kernels is out of scope for this
//! core; [`IdentityKernel`] and [`DelayKernel`] are reference
//! implementations used to exercise the adapter-side session, not
//! production kernels.

use std::time::Duration;

use cortex_core::SessionError;

/// Runtime configuration a kernel is initialized with, derived from
/// CONFIG.
#[derive(Debug, Clone)]
pub struct KernelRuntimeConfig {
    /// Sample rate in Hz.
    pub sample_rate_hz: u32,
    /// Window length in samples.
    pub window_samples: u32,
    /// Hop length in samples.
    pub hop_samples: u32,
    /// Channel count.
    pub channels: u32,
    /// Opaque kernel parameters from CONFIG's `plugin_params`.
    pub params: Vec<u8>,
    /// Opaque calibration state, if any.
    pub calibration_state: Vec<u8>,
}

/// A kernel's declared output shape; `0` in either field means "same as
/// input", matching the ACK payload's convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelOutputShape {
    /// Output window length in samples, or `0` for "same as input".
    pub output_window_length_samples: u32,
    /// Output channel count, or `0` for "same as input".
    pub output_channels: u32,
}

/// A hosted processing kernel.
///
/// `init` is called once per session after CONFIG is validated; `execute`
/// is called once per window, synchronously, from the session's window
/// loop. A kernel must not retain the harness's input slice beyond the
/// call: the adapter is free to reuse or free the chunk-reassembly buffer
/// once `execute` returns.
pub trait Kernel: Send {
    /// Initialize with `config`, returning the output shape the adapter
    /// should advertise in ACK.
    fn init(&mut self, config: &KernelRuntimeConfig) -> Result<KernelOutputShape, SessionError>;

    /// Process one window of interleaved little-endian float32 samples,
    /// writing the result into `output` (already sized to the output
    /// shape's byte length).
    fn execute(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(), SessionError>;
}

/// Copies input to output unchanged. Used by the identity-kernel
/// end-to-end round-trip scenario.
#[derive(Debug, Default)]
pub struct IdentityKernel;

impl Kernel for IdentityKernel {
    fn init(&mut self, _config: &KernelRuntimeConfig) -> Result<KernelOutputShape, SessionError> {
        Ok(KernelOutputShape { output_window_length_samples: 0, output_channels: 0 })
    }

    fn execute(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(), SessionError> {
        output.clear();
        output.extend_from_slice(input);
        Ok(())
    }
}

/// Sleeps a configurable duration before returning input unchanged; used
/// to exercise deadline-miss telemetry deliberately.
#[derive(Debug)]
pub struct DelayKernel {
    delay: Duration,
}

impl DelayKernel {
    /// Create a kernel that sleeps `delay` before completing each window.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Kernel for DelayKernel {
    fn init(&mut self, _config: &KernelRuntimeConfig) -> Result<KernelOutputShape, SessionError> {
        Ok(KernelOutputShape { output_window_length_samples: 0, output_channels: 0 })
    }

    fn execute(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(), SessionError> {
        std::thread::sleep(self.delay);
        output.clear();
        output.extend_from_slice(input);
        Ok(())
    }
}

/// Construct a kernel by name, or `KernelNotFound` if `name` is not one of
/// the adapter's advertised kernels.
pub fn load_kernel(name: &str) -> Result<Box<dyn Kernel>, SessionError> {
    match name {
        "identity" => Ok(Box::new(IdentityKernel)),
        "delay" => Ok(Box::new(DelayKernel::new(Duration::from_millis(2)))),
        _ => Err(SessionError::KernelNotFound),
    }
}

/// Names of kernels this adapter binary can host, advertised in HELLO.
pub const AVAILABLE_KERNELS: &[&str] = &["identity", "delay"];

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KernelRuntimeConfig {
        KernelRuntimeConfig {
            sample_rate_hz: 160,
            window_samples: 16,
            hop_samples: 8,
            channels: 2,
            params: Vec::new(),
            calibration_state: Vec::new(),
        }
    }

    #[test]
    fn identity_kernel_copies_input() {
        let mut kernel = IdentityKernel;
        kernel.init(&config()).unwrap();
        let input: Vec<u8> = (0..64).collect();
        let mut output = Vec::new();
        kernel.execute(&input, &mut output).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn unknown_kernel_name_is_rejected() {
        assert_eq!(load_kernel("does-not-exist").unwrap_err(), SessionError::KernelNotFound);
    }

    #[test]
    fn delay_kernel_still_copies_input() {
        let mut kernel = DelayKernel::new(Duration::from_millis(1));
        kernel.init(&config()).unwrap();
        let input = vec![1, 2, 3, 4];
        let mut output = Vec::new();
        kernel.execute(&input, &mut output).unwrap();
        assert_eq!(output, input);
    }
}
