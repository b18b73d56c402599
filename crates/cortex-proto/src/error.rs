//! Errors produced by the pure wire-format layer (framing and chunking).
//!
//! These are decode-time/structural errors only; transport and session
//! errors live in `cortex-core` and `cortex-harness`, which compose this
//! enum via `From`.

use thiserror::Error;

/// Framing and chunking errors, matching the stable taxonomy of the wire
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// No MAGIC constant was found within the scanned bytes.
    #[error("magic constant not found")]
    MagicNotFound,
    /// The frame's trailing CRC32 did not match the computed value.
    #[error("crc32 mismatch")]
    CrcMismatch,
    /// The frame's version field was not the one supported version.
    #[error("unsupported frame version")]
    VersionMismatch,
    /// `payload_length` exceeded the maximum single-frame payload size.
    #[error("frame payload too large")]
    FrameTooLarge,
    /// The caller-provided buffer is too small to hold the frame payload.
    #[error("destination buffer too small")]
    BufferTooSmall,
    /// The frame's type byte, or another structural field, was invalid.
    #[error("invalid frame")]
    InvalidFrame,
    /// A chunk's `sequence` did not match the sequence being reassembled.
    #[error("chunk sequence mismatch")]
    ChunkSequenceMismatch,
    /// The LAST chunk arrived but coverage of `[0, total_bytes)` is
    /// incomplete, or more chunks arrived after LAST.
    #[error("incomplete chunk sequence")]
    ChunkIncomplete,
    /// `total_bytes` for a chunked transfer exceeds the destination buffer.
    #[error("chunk reassembly buffer too small")]
    ChunkBufferTooSmall,
}

impl ProtocolError {
    /// Numeric error code, stable across versions, used on the wire inside
    /// ERROR frames and in telemetry's `error_code` column.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::MagicNotFound => 1,
            Self::CrcMismatch => 2,
            Self::VersionMismatch => 3,
            Self::FrameTooLarge => 4,
            Self::BufferTooSmall => 5,
            Self::InvalidFrame => 6,
            Self::ChunkSequenceMismatch => 7,
            Self::ChunkIncomplete => 8,
            Self::ChunkBufferTooSmall => 9,
        }
    }
}
