//! Wire framing, chunking, and payload encoding for the CORTEX adapter
//! protocol.
//!
//! This crate is transport-agnostic and does no I/O: [`frame::FrameDecoder`]
//! and [`chunk::ChunkReassembler`] are pure, byte-at-a-time state machines
//! that a transport-aware caller (`cortex-core`) drives under a timeout.

pub mod chunk;
pub mod error;
pub mod frame;
pub mod header;
pub mod opcode;
pub mod payload;
pub mod wire;

pub use chunk::{ChunkHeader, ChunkReassembler};
pub use error::ProtocolError;
pub use frame::{Frame, FrameDecoder};
pub use header::{FrameHeader, HEADER_LEN, MAGIC, MAX_FRAME_PAYLOAD};
pub use opcode::FrameType;
pub use payload::{AckPayload, ConfigPayload, ErrorPayload, HelloPayload, ResultPayload};
