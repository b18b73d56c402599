//! Adapter-side session state machine:
//! `UNCONFIGURED --CONFIG--> READY --WINDOW LAST chunk--> EXECUTING --RESULT--> READY`,
//! `any --ERROR/EOF--> TERMINATED`.
//!
//! Methods take an event and return the actions the binary's event loop
//! must execute (send a frame, terminate), mirroring the
//! action-returning driver pattern used elsewhere in this workspace: the
//! session never touches a transport directly, which keeps it unit
//! testable without any I/O.

use cortex_core::{Environment, SessionError};
use cortex_proto::chunk::ChunkReassembler;
use cortex_proto::payload::{AckPayload, ConfigPayload, ErrorPayload, ResultPayload};
use cortex_proto::FrameType;

use crate::kernel::{load_kernel, Kernel, KernelRuntimeConfig};

/// The session's externally observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for CONFIG.
    Unconfigured,
    /// Configured and idle between windows.
    Ready,
    /// Running the kernel for the window whose LAST chunk just arrived.
    Executing,
    /// Session ended; no further frames will be sent.
    Terminated,
}

/// An action the event loop must perform on the session's behalf.
#[derive(Debug, Clone)]
pub enum AdapterAction {
    /// Send one frame.
    SendFrame { frame_type: FrameType, payload: Vec<u8> },
    /// Close the transport and exit the process.
    Terminate,
}

fn error_action(code: i32, message: impl Into<String>) -> Vec<AdapterAction> {
    let payload = ErrorPayload { error_code: code, message: message.into() }.encode();
    vec![
        AdapterAction::SendFrame { frame_type: FrameType::Error, payload },
        AdapterAction::Terminate,
    ]
}

struct Configured {
    kernel: Box<dyn Kernel>,
    session_id: u32,
    output_window_length_samples: u32,
    output_channels: u32,
    reassembler: Option<ChunkReassembler>,
    next_sequence: u32,
}

/// The adapter-side session.
pub struct AdapterSession<E: Environment> {
    env: E,
    state: SessionState,
    configured: Option<Configured>,
    max_window_samples: u32,
    max_channels: u32,
}

impl<E: Environment> AdapterSession<E> {
    /// Create a session in the `UNCONFIGURED` state.
    #[must_use]
    pub fn new(env: E, max_window_samples: u32, max_channels: u32) -> Self {
        Self { env, state: SessionState::Unconfigured, configured: None, max_window_samples, max_channels }
    }

    /// Current state, for tests and diagnostics.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle a received CONFIG payload.
    pub fn on_config(&mut self, config: ConfigPayload) -> Vec<AdapterAction> {
        if self.state != SessionState::Unconfigured {
            return error_action(SessionError::InvalidConfig.code(), "CONFIG received outside UNCONFIGURED");
        }
        if config.session_id == 0 {
            return error_action(SessionError::InvalidConfig.code(), "session_id must be non-zero");
        }
        if config.sample_rate_hz == 0 {
            return error_action(SessionError::InvalidConfig.code(), "sample_rate_hz must be positive");
        }
        if config.window_samples > self.max_window_samples {
            return error_action(SessionError::InvalidConfig.code(), "window_samples exceeds adapter maximum");
        }
        if config.channels > self.max_channels {
            return error_action(SessionError::InvalidConfig.code(), "channels exceeds adapter maximum");
        }

        let mut kernel = match load_kernel(&config.plugin_name) {
            Ok(kernel) => kernel,
            Err(err) => return error_action(err.code(), format!("unknown kernel: {}", config.plugin_name)),
        };
        let runtime = KernelRuntimeConfig {
            sample_rate_hz: config.sample_rate_hz,
            window_samples: config.window_samples,
            hop_samples: config.hop_samples,
            channels: config.channels,
            params: config.plugin_params.clone(),
            calibration_state: config.calibration_state.clone(),
        };
        let shape = match kernel.init(&runtime) {
            Ok(shape) => shape,
            Err(err) => return error_action(err.code(), "kernel initialization failed"),
        };

        self.configured = Some(Configured {
            kernel,
            session_id: config.session_id,
            output_window_length_samples: shape.output_window_length_samples,
            output_channels: shape.output_channels,
            reassembler: None,
            next_sequence: 0,
        });
        self.state = SessionState::Ready;

        let ack = AckPayload {
            ack_type: 0,
            output_window_length_samples: shape.output_window_length_samples,
            output_channels: shape.output_channels,
        };
        vec![AdapterAction::SendFrame { frame_type: FrameType::Ack, payload: ack.encode() }]
    }

    /// Handle one `WINDOW_CHUNK` frame's payload. Returns `SendFrame(Result,
    /// ..)` once the chunked window's LAST chunk completes reassembly and
    /// the kernel has executed; `Ok(Vec::new())` while more chunks are
    /// expected.
    pub fn on_window_chunk(&mut self, frame_payload: &[u8]) -> Vec<AdapterAction> {
        if self.state != SessionState::Ready {
            return error_action(SessionError::InvalidConfig.code(), "WINDOW_CHUNK received outside READY");
        }
        let configured = self.configured.as_mut().expect("READY implies configured");
        let next_sequence = configured.next_sequence;
        let reassembler =
            configured.reassembler.get_or_insert_with(|| ChunkReassembler::new(next_sequence));

        let out_cap = (self.max_window_samples as usize)
            .saturating_mul(self.max_channels as usize)
            .saturating_mul(4);
        let window_bytes = match reassembler.push_frame_payload(frame_payload, out_cap) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(err) => return error_action(err.code(), "chunk reassembly failed"),
        };

        self.state = SessionState::Executing;
        let t_in = self.env.monotonic_now_ns();
        let sequence = configured.next_sequence;
        configured.reassembler = None;

        let t_start = self.env.monotonic_now_ns();
        let mut output = Vec::new();
        let exec_result = configured.kernel.execute(&window_bytes, &mut output);
        let t_end = self.env.monotonic_now_ns();

        let actions = match exec_result {
            Ok(()) => {
                let output_length_samples = if configured.output_window_length_samples == 0 {
                    (window_bytes.len() / 4 / configured.output_channels.max(1) as usize) as u32
                } else {
                    configured.output_window_length_samples
                };
                let output_channels = if configured.output_channels == 0 {
                    configured.channels_fallback()
                } else {
                    configured.output_channels
                };
                let t_first_tx = self.env.monotonic_now_ns();
                let result = ResultPayload {
                    session_id: configured.session_id,
                    sequence,
                    t_in,
                    t_start,
                    t_end,
                    t_first_tx,
                    t_last_tx: t_first_tx,
                    output_length_samples,
                    output_channels,
                    output,
                };
                vec![AdapterAction::SendFrame { frame_type: FrameType::Result, payload: result.encode() }]
            }
            Err(err) => error_action(err.code(), "kernel execution failed"),
        };

        configured.next_sequence = configured.next_sequence.wrapping_add(1);
        if self.state == SessionState::Executing {
            self.state = SessionState::Ready;
        }
        actions
    }

    /// Handle transport EOF: free kernel state and terminate.
    pub fn on_transport_eof(&mut self) -> Vec<AdapterAction> {
        self.state = SessionState::Terminated;
        self.configured = None;
        vec![AdapterAction::Terminate]
    }
}

impl Configured {
    fn channels_fallback(&self) -> u32 {
        // `output_channels == 0` means "same as input"; the session does
        // not track the negotiated channel count separately from the
        // kernel's declared shape, so fall back to 1 rather than 0 to keep
        // `RESULT`'s byte-length arithmetic well-defined.
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::SimEnvironment;

    fn config_payload() -> ConfigPayload {
        ConfigPayload {
            session_id: 0xABCD,
            sample_rate_hz: 160,
            window_samples: 16,
            hop_samples: 8,
            channels: 2,
            plugin_name: "identity".to_string(),
            plugin_params: Vec::new(),
            calibration_state: Vec::new(),
        }
    }

    #[test]
    fn config_transitions_to_ready_and_sends_ack() {
        let mut session = AdapterSession::new(SimEnvironment::new(1), 4096, 64);
        let actions = session.on_config(config_payload());
        assert_eq!(session.state(), SessionState::Ready);
        assert!(matches!(actions[0], AdapterAction::SendFrame { frame_type: FrameType::Ack, .. }));
    }

    #[test]
    fn unknown_kernel_sends_error_and_terminates() {
        let mut session = AdapterSession::new(SimEnvironment::new(1), 4096, 64);
        let mut config = config_payload();
        config.plugin_name = "no-such-kernel".to_string();
        let actions = session.on_config(config);
        assert_eq!(session.state(), SessionState::Unconfigured);
        assert!(matches!(actions[0], AdapterAction::SendFrame { frame_type: FrameType::Error, .. }));
        assert!(matches!(actions[1], AdapterAction::Terminate));
    }

    #[test]
    fn single_chunk_window_produces_a_result() {
        let mut session = AdapterSession::new(SimEnvironment::new(1), 4096, 64);
        session.on_config(config_payload());

        let data = vec![9u8; 16 * 2 * 4];
        let (header, chunk) = cortex_proto::chunk::split_chunks(0, &data).into_iter().next().unwrap();
        let frame_payload = cortex_proto::chunk::encode_chunk_frame_payload(&header, chunk);

        let actions = session.on_window_chunk(&frame_payload);
        assert_eq!(session.state(), SessionState::Ready);
        match &actions[0] {
            AdapterAction::SendFrame { frame_type, payload } => {
                assert_eq!(*frame_type, FrameType::Result);
                let result = ResultPayload::decode(payload).unwrap();
                assert_eq!(result.session_id, 0xABCD);
                assert_eq!(result.sequence, 0);
                assert_eq!(result.output, data);
            }
            other => panic!("expected SendFrame, got {other:?}"),
        }
    }

    #[test]
    fn transport_eof_terminates_from_any_state() {
        let mut session = AdapterSession::new(SimEnvironment::new(1), 4096, 64);
        let actions = session.on_transport_eof();
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(matches!(actions[0], AdapterAction::Terminate));
    }

    #[test]
    fn window_chunk_before_config_is_rejected() {
        let mut session = AdapterSession::new(SimEnvironment::new(1), 4096, 64);
        let actions = session.on_window_chunk(&[0u8; 24]);
        assert!(matches!(actions[0], AdapterAction::SendFrame { frame_type: FrameType::Error, .. }));
    }
}
