//! Raw little-endian payload structs carried inside frames.
//!
//! Unlike the teacher protocol this one is grown from, payloads here are
//! encoded as explicit fixed-offset little-endian structs rather than a
//! self-describing serialization format: the wire protocol is bit-exact
//! and must decode identically regardless of host endianness or the
//! presence of a particular serde backend.

use crate::error::ProtocolError;
use crate::wire::{
    get_fixed_str, get_u16_le, get_u32_le, get_u64_le, put_fixed_str, put_u16_le, put_u32_le,
    put_u64_le,
};

const ADAPTER_NAME_LEN: usize = 32;
const KERNEL_NAME_LEN: usize = 32;
const HELLO_FIXED_LEN: usize = 56;

/// Adapter-to-harness capability announcement, sent once at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloPayload {
    /// Random identifier chosen by the adapter on process start; lets the
    /// harness detect adapter restarts.
    pub boot_id: u32,
    /// ABI version the adapter speaks; currently always `1`.
    pub adapter_abi_version: u32,
    /// Largest window (in samples) the adapter can accept.
    pub max_window_samples: u32,
    /// Largest channel count the adapter can accept.
    pub max_channels: u32,
    /// Short human-readable adapter name (truncated to 31 bytes + nul).
    pub adapter_name: String,
    /// Names of kernels this adapter can host.
    pub kernel_names: Vec<String>,
    /// Device hostname.
    pub hostname: String,
    /// Short CPU description string.
    pub cpu_description: String,
    /// Short OS description string.
    pub os_description: String,
}

impl HelloPayload {
    /// Serialize to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let kernel_section_len: usize =
            self.kernel_names.iter().map(|_| 2 + KERNEL_NAME_LEN).sum();
        let total = HELLO_FIXED_LEN
            + kernel_section_len
            + self.hostname.len()
            + self.cpu_description.len()
            + self.os_description.len();
        let mut out = vec![0u8; total];

        put_u32_le(&mut out, 0, self.boot_id);
        put_u32_le(&mut out, 4, self.adapter_abi_version);
        put_u32_le(&mut out, 8, self.max_window_samples);
        put_u32_le(&mut out, 12, self.max_channels);
        put_fixed_str(&mut out, 16, ADAPTER_NAME_LEN, &self.adapter_name);
        put_u16_le(&mut out, 48, self.kernel_names.len() as u16);
        put_u16_le(&mut out, 50, self.hostname.len() as u16);
        put_u16_le(&mut out, 52, self.cpu_description.len() as u16);
        put_u16_le(&mut out, 54, self.os_description.len() as u16);

        let mut offset = HELLO_FIXED_LEN;
        for name in &self.kernel_names {
            put_u16_le(&mut out, offset, name.len().min(KERNEL_NAME_LEN) as u16);
            put_fixed_str(&mut out, offset + 2, KERNEL_NAME_LEN, name);
            offset += 2 + KERNEL_NAME_LEN;
        }
        out[offset..offset + self.hostname.len()].copy_from_slice(self.hostname.as_bytes());
        offset += self.hostname.len();
        out[offset..offset + self.cpu_description.len()]
            .copy_from_slice(self.cpu_description.as_bytes());
        offset += self.cpu_description.len();
        out[offset..offset + self.os_description.len()]
            .copy_from_slice(self.os_description.as_bytes());

        out
    }

    /// Parse from bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HELLO_FIXED_LEN {
            return Err(ProtocolError::InvalidFrame);
        }
        let boot_id = get_u32_le(buf, 0);
        let adapter_abi_version = get_u32_le(buf, 4);
        let max_window_samples = get_u32_le(buf, 8);
        let max_channels = get_u32_le(buf, 12);
        let adapter_name = get_fixed_str(buf, 16, ADAPTER_NAME_LEN);
        let kernel_count = get_u16_le(buf, 48) as usize;
        let hostname_len = get_u16_le(buf, 50) as usize;
        let cpu_len = get_u16_le(buf, 52) as usize;
        let os_len = get_u16_le(buf, 54) as usize;

        let mut offset = HELLO_FIXED_LEN;
        let mut kernel_names = Vec::with_capacity(kernel_count);
        for _ in 0..kernel_count {
            if buf.len() < offset + 2 + KERNEL_NAME_LEN {
                return Err(ProtocolError::InvalidFrame);
            }
            kernel_names.push(get_fixed_str(buf, offset + 2, KERNEL_NAME_LEN));
            offset += 2 + KERNEL_NAME_LEN;
        }
        if buf.len() < offset + hostname_len + cpu_len + os_len {
            return Err(ProtocolError::InvalidFrame);
        }
        let hostname = String::from_utf8_lossy(&buf[offset..offset + hostname_len]).into_owned();
        offset += hostname_len;
        let cpu_description = String::from_utf8_lossy(&buf[offset..offset + cpu_len]).into_owned();
        offset += cpu_len;
        let os_description = String::from_utf8_lossy(&buf[offset..offset + os_len]).into_owned();

        Ok(Self {
            boot_id,
            adapter_abi_version,
            max_window_samples,
            max_channels,
            adapter_name,
            kernel_names,
            hostname,
            cpu_description,
            os_description,
        })
    }
}

const CONFIG_PLUGIN_NAME_OFFSET: usize = 20;
const CONFIG_PLUGIN_NAME_LEN: usize = 64;
const CONFIG_PLUGIN_PARAMS_OFFSET: usize = 84;
const CONFIG_PLUGIN_PARAMS_LEN: usize = 256;
const CONFIG_CALIBRATION_SIZE_OFFSET: usize = 340;
const CONFIG_FIXED_LEN: usize = 344;

/// Maximum calibration state accepted inline in a CONFIG payload.
pub const MAX_CALIBRATION_STATE: usize = 16 * 1024 * 1024;

/// Harness-to-adapter session configuration.
///
/// Field offsets follow the documentation layout named as authoritative:
/// `{0: session_id, 4: sample_rate_hz, 8: window_samples, 12: hop_samples,
/// 16: channels, 20: plugin_name[64], 84: plugin_params[256],
/// 340: calibration_state_size}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPayload {
    /// Non-zero session identifier chosen by the harness.
    pub session_id: u32,
    /// Sample rate in Hz.
    pub sample_rate_hz: u32,
    /// Window length in samples (W).
    pub window_samples: u32,
    /// Hop length in samples (H).
    pub hop_samples: u32,
    /// Channel count (C).
    pub channels: u32,
    /// Requested plugin/kernel name.
    pub plugin_name: String,
    /// Opaque kernel parameters, at most 256 bytes.
    pub plugin_params: Vec<u8>,
    /// Opaque calibration state, at most [`MAX_CALIBRATION_STATE`] bytes.
    pub calibration_state: Vec<u8>,
}

impl ConfigPayload {
    /// Serialize to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; CONFIG_FIXED_LEN + self.calibration_state.len()];
        put_u32_le(&mut out, 0, self.session_id);
        put_u32_le(&mut out, 4, self.sample_rate_hz);
        put_u32_le(&mut out, 8, self.window_samples);
        put_u32_le(&mut out, 12, self.hop_samples);
        put_u32_le(&mut out, 16, self.channels);
        put_fixed_str(&mut out, CONFIG_PLUGIN_NAME_OFFSET, CONFIG_PLUGIN_NAME_LEN, &self.plugin_name);
        let params_len = self.plugin_params.len().min(CONFIG_PLUGIN_PARAMS_LEN);
        out[CONFIG_PLUGIN_PARAMS_OFFSET..CONFIG_PLUGIN_PARAMS_OFFSET + params_len]
            .copy_from_slice(&self.plugin_params[..params_len]);
        put_u32_le(&mut out, CONFIG_CALIBRATION_SIZE_OFFSET, self.calibration_state.len() as u32);
        out[CONFIG_FIXED_LEN..].copy_from_slice(&self.calibration_state);
        out
    }

    /// Parse from bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < CONFIG_FIXED_LEN {
            return Err(ProtocolError::InvalidFrame);
        }
        let session_id = get_u32_le(buf, 0);
        let sample_rate_hz = get_u32_le(buf, 4);
        let window_samples = get_u32_le(buf, 8);
        let hop_samples = get_u32_le(buf, 12);
        let channels = get_u32_le(buf, 16);
        let plugin_name = get_fixed_str(buf, CONFIG_PLUGIN_NAME_OFFSET, CONFIG_PLUGIN_NAME_LEN);
        let plugin_params =
            buf[CONFIG_PLUGIN_PARAMS_OFFSET..CONFIG_PLUGIN_PARAMS_OFFSET + CONFIG_PLUGIN_PARAMS_LEN]
                .to_vec();
        let calibration_state_size = get_u32_le(buf, CONFIG_CALIBRATION_SIZE_OFFSET) as usize;
        if calibration_state_size > MAX_CALIBRATION_STATE {
            return Err(ProtocolError::InvalidFrame);
        }
        if buf.len() < CONFIG_FIXED_LEN + calibration_state_size {
            return Err(ProtocolError::InvalidFrame);
        }
        let calibration_state =
            buf[CONFIG_FIXED_LEN..CONFIG_FIXED_LEN + calibration_state_size].to_vec();
        Ok(Self {
            session_id,
            sample_rate_hz,
            window_samples,
            hop_samples,
            channels,
            plugin_name,
            plugin_params,
            calibration_state,
        })
    }
}

/// Adapter-to-harness configuration acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPayload {
    /// Reserved; always `0` on this protocol version.
    pub ack_type: u32,
    /// Output window length in samples; `0` means "same as input".
    pub output_window_length_samples: u32,
    /// Output channel count; `0` means "same as input".
    pub output_channels: u32,
}

impl AckPayload {
    const LEN: usize = 12;

    /// Serialize to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::LEN];
        put_u32_le(&mut out, 0, self.ack_type);
        put_u32_le(&mut out, 4, self.output_window_length_samples);
        put_u32_le(&mut out, 8, self.output_channels);
        out
    }

    /// Parse from bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::LEN {
            return Err(ProtocolError::InvalidFrame);
        }
        Ok(Self {
            ack_type: get_u32_le(buf, 0),
            output_window_length_samples: get_u32_le(buf, 4),
            output_channels: get_u32_le(buf, 8),
        })
    }
}

const RESULT_FIXED_LEN: usize = 56;

/// Adapter-to-harness window result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPayload {
    /// Session this result belongs to.
    pub session_id: u32,
    /// Sequence number of the window being answered.
    pub sequence: u32,
    /// Device-monotonic timestamp when the window's LAST chunk was decoded.
    pub t_in: u64,
    /// Device-monotonic timestamp immediately before kernel execution.
    pub t_start: u64,
    /// Device-monotonic timestamp immediately after kernel execution.
    pub t_end: u64,
    /// Device-monotonic timestamp of the first transmitted byte of the
    /// reply.
    pub t_first_tx: u64,
    /// Device-monotonic timestamp of the last transmitted byte of the
    /// reply.
    pub t_last_tx: u64,
    /// Output window length in samples.
    pub output_length_samples: u32,
    /// Output channel count.
    pub output_channels: u32,
    /// Raw little-endian float32 output samples, sample-major.
    pub output: Vec<u8>,
}

impl ResultPayload {
    /// Serialize to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; RESULT_FIXED_LEN + self.output.len()];
        put_u32_le(&mut out, 0, self.session_id);
        put_u32_le(&mut out, 4, self.sequence);
        put_u64_le(&mut out, 8, self.t_in);
        put_u64_le(&mut out, 16, self.t_start);
        put_u64_le(&mut out, 24, self.t_end);
        put_u64_le(&mut out, 32, self.t_first_tx);
        put_u64_le(&mut out, 40, self.t_last_tx);
        put_u32_le(&mut out, 48, self.output_length_samples);
        put_u32_le(&mut out, 52, self.output_channels);
        out[RESULT_FIXED_LEN..].copy_from_slice(&self.output);
        out
    }

    /// Parse from bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < RESULT_FIXED_LEN {
            return Err(ProtocolError::InvalidFrame);
        }
        let output_length_samples = get_u32_le(buf, 48);
        let output_channels = get_u32_le(buf, 52);
        let expected_output_len =
            (output_length_samples as usize).saturating_mul(output_channels as usize) * 4;
        if buf.len() != RESULT_FIXED_LEN + expected_output_len {
            return Err(ProtocolError::InvalidFrame);
        }
        Ok(Self {
            session_id: get_u32_le(buf, 0),
            sequence: get_u32_le(buf, 4),
            t_in: get_u64_le(buf, 8),
            t_start: get_u64_le(buf, 16),
            t_end: get_u64_le(buf, 24),
            t_first_tx: get_u64_le(buf, 32),
            t_last_tx: get_u64_le(buf, 40),
            output_length_samples,
            output_channels,
            output: buf[RESULT_FIXED_LEN..].to_vec(),
        })
    }
}

const ERROR_FIXED_LEN: usize = 6;

/// A protocol or session error reported on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Stable numeric error code (see [`crate::error::ProtocolError::code`]
    /// and the session-level error taxonomy in `cortex-core`).
    pub error_code: i32,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorPayload {
    /// Serialize to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let message_bytes = self.message.as_bytes();
        let mut out = vec![0u8; ERROR_FIXED_LEN + message_bytes.len()];
        out[0..4].copy_from_slice(&self.error_code.to_le_bytes());
        put_u16_le(&mut out, 4, message_bytes.len() as u16);
        out[ERROR_FIXED_LEN..].copy_from_slice(message_bytes);
        out
    }

    /// Parse from bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < ERROR_FIXED_LEN {
            return Err(ProtocolError::InvalidFrame);
        }
        let error_code = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let message_len = get_u16_le(buf, 4) as usize;
        if buf.len() < ERROR_FIXED_LEN + message_len {
            return Err(ProtocolError::InvalidFrame);
        }
        let message =
            String::from_utf8_lossy(&buf[ERROR_FIXED_LEN..ERROR_FIXED_LEN + message_len])
                .into_owned();
        Ok(Self { error_code, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trip() {
        let hello = HelloPayload {
            boot_id: 42,
            adapter_abi_version: 1,
            max_window_samples: 4096,
            max_channels: 64,
            adapter_name: "reference-adapter".to_string(),
            kernel_names: vec!["identity".to_string(), "delay".to_string()],
            hostname: "bench-node-1".to_string(),
            cpu_description: "Cortex-A78".to_string(),
            os_description: "linux 6.18".to_string(),
        };
        let encoded = hello.encode();
        assert_eq!(HelloPayload::decode(&encoded).unwrap(), hello);
    }

    #[test]
    fn config_round_trip_with_calibration_state() {
        let config = ConfigPayload {
            session_id: 0xABCD,
            sample_rate_hz: 160,
            window_samples: 160,
            hop_samples: 80,
            channels: 64,
            plugin_name: "identity".to_string(),
            plugin_params: vec![1, 2, 3],
            calibration_state: vec![9u8; 128],
        };
        let encoded = config.encode();
        assert_eq!(encoded.len(), CONFIG_FIXED_LEN + 128);
        assert_eq!(ConfigPayload::decode(&encoded).unwrap(), config);
    }

    #[test]
    fn config_rejects_oversized_calibration_state() {
        let mut buf = vec![0u8; CONFIG_FIXED_LEN];
        put_u32_le(&mut buf, CONFIG_CALIBRATION_SIZE_OFFSET, (MAX_CALIBRATION_STATE + 1) as u32);
        assert_eq!(ConfigPayload::decode(&buf), Err(ProtocolError::InvalidFrame));
    }

    #[test]
    fn ack_round_trip() {
        let ack = AckPayload { ack_type: 0, output_window_length_samples: 160, output_channels: 64 };
        assert_eq!(AckPayload::decode(&ack.encode()).unwrap(), ack);
    }

    #[test]
    fn result_round_trip() {
        let result = ResultPayload {
            session_id: 7,
            sequence: 3,
            t_in: 100,
            t_start: 110,
            t_end: 150,
            t_first_tx: 151,
            t_last_tx: 160,
            output_length_samples: 2,
            output_channels: 2,
            output: vec![0u8; 2 * 2 * 4],
        };
        assert_eq!(ResultPayload::decode(&result.encode()).unwrap(), result);
    }

    #[test]
    fn result_rejects_mismatched_output_length() {
        let mut buf = vec![0u8; RESULT_FIXED_LEN];
        put_u32_le(&mut buf, 48, 10);
        put_u32_le(&mut buf, 52, 2);
        assert_eq!(ResultPayload::decode(&buf), Err(ProtocolError::InvalidFrame));
    }

    #[test]
    fn error_round_trip() {
        let error = ErrorPayload { error_code: 7, message: "kernel not found".to_string() };
        assert_eq!(ErrorPayload::decode(&error.encode()).unwrap(), error);
    }
}
