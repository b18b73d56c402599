//! Frame encoding and the incremental, byte-at-a-time frame decoder.
//!
//! `FrameDecoder` implements the MAGIC-hunting receive algorithm purely: it
//! consumes one byte at a time and has no notion of a transport or a
//! timeout. `cortex-core`'s transport-backed `recv_frame` drives it,
//! applying the timeout bound across the bytes it feeds in.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::header::{FrameHeader, HEADER_LEN, MAGIC};
use crate::opcode::FrameType;

/// A decoded frame: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame's header.
    pub header: FrameHeader,
    /// The frame's payload, exactly `header.payload_length()` bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Construct a frame, computing header `payload_length` and `crc32`
    /// from `payload`.
    #[must_use]
    pub fn new(frame_type: FrameType, payload: Bytes) -> Self {
        let header = FrameHeader::new(frame_type, &payload);
        Self { header, payload }
    }

    /// This frame's type.
    pub fn frame_type(&self) -> Result<FrameType, ProtocolError> {
        self.header.frame_type()
    }

    /// Serialize header and payload into a single byte vector.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN + self.payload.len()];
        self.header.encode(&mut out[..HEADER_LEN]);
        out[HEADER_LEN..].copy_from_slice(&self.payload);
        out
    }
}

/// Incremental state of [`FrameDecoder`].
#[derive(Debug)]
enum DecoderState {
    /// Sliding a 32-bit window over incoming bytes, looking for MAGIC.
    Hunting { window: u32, filled: u8 },
    /// MAGIC has been found; accumulating the remaining header bytes.
    Header { buf: [u8; HEADER_LEN], filled: usize },
    /// Header is complete; accumulating payload bytes.
    Payload { header: FrameHeader, buf: Vec<u8>, filled: usize },
}

/// Byte-at-a-time frame decoder implementing the MAGIC-hunting receive
/// algorithm. Feed bytes with [`FrameDecoder::push`]; a `CRC_MISMATCH`
/// discards the offending frame and resumes hunting for the next MAGIC,
/// matching the protocol's recovery-from-corruption design.
pub struct FrameDecoder {
    state: DecoderState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder ready to hunt for the first MAGIC.
    #[must_use]
    pub fn new() -> Self {
        Self { state: DecoderState::Hunting { window: 0, filled: 0 } }
    }

    /// Feed one byte. Returns `Ok(Some(frame))` when a complete, validated
    /// frame has been assembled; `Ok(None)` while more bytes are needed;
    /// `Err` on a structural or CRC error (the decoder resets to hunting
    /// and the caller may keep feeding bytes to recover).
    pub fn push(&mut self, byte: u8) -> Result<Option<Frame>, ProtocolError> {
        match &mut self.state {
            DecoderState::Hunting { window, filled } => {
                *window = (*window >> 8) | (u32::from(byte) << 24);
                *filled = (*filled + 1).min(4);
                if *filled == 4 && *window == MAGIC {
                    let mut buf = [0u8; HEADER_LEN];
                    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
                    self.state = DecoderState::Header { buf, filled: 4 };
                }
                Ok(None)
            }
            DecoderState::Header { buf, filled } => {
                buf[*filled] = byte;
                *filled += 1;
                if *filled < HEADER_LEN {
                    return Ok(None);
                }
                let header = match FrameHeader::decode(buf) {
                    Ok(header) => header,
                    Err(err) => {
                        self.reset();
                        return Err(err);
                    }
                };
                let payload_len = header.payload_length() as usize;
                if payload_len == 0 {
                    let result = self.finish_frame(header, Vec::new());
                    self.reset();
                    return result.map(Some);
                }
                self.state =
                    DecoderState::Payload { header, buf: vec![0u8; payload_len], filled: 0 };
                Ok(None)
            }
            DecoderState::Payload { buf, filled, .. } => {
                buf[*filled] = byte;
                *filled += 1;
                if *filled < buf.len() {
                    return Ok(None);
                }
                let DecoderState::Payload { header, buf, .. } =
                    std::mem::replace(&mut self.state, DecoderState::Hunting { window: 0, filled: 0 })
                else {
                    unreachable!("state is Payload by the match arm above")
                };
                self.finish_frame(header, buf).map(Some)
            }
        }
    }

    fn finish_frame(&self, header: FrameHeader, payload: Vec<u8>) -> Result<Frame, ProtocolError> {
        header.verify_crc(&payload)?;
        Ok(Frame { header, payload: Bytes::from(payload) })
    }

    fn reset(&mut self) {
        self.state = DecoderState::Hunting { window: 0, filled: 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Result<Option<Frame>, ProtocolError>> {
        bytes.iter().map(|&b| decoder.push(b)).collect()
    }

    #[test]
    fn frame_with_payload_round_trips() {
        let frame = Frame::new(FrameType::Hello, Bytes::from_static(b"payload"));
        let encoded = frame.encode();

        let mut decoder = FrameDecoder::new();
        let mut decoded = None;
        for result in feed_all(&mut decoder, &encoded) {
            if let Some(frame) = result.unwrap() {
                decoded = Some(frame);
            }
        }
        assert_eq!(decoded.unwrap(), frame);
    }

    #[test]
    fn magic_hunt_skips_garbage_prefix() {
        let frame = Frame::new(FrameType::Ack, Bytes::from_static(b"ack"));
        let mut stream = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x11];
        stream.extend(frame.encode());

        let mut decoder = FrameDecoder::new();
        let mut decoded = None;
        for &byte in &stream {
            if let Ok(Some(f)) = decoder.push(byte) {
                decoded = Some(f);
            }
        }
        assert_eq!(decoded.unwrap(), frame);
    }

    #[test]
    fn crc_mismatch_then_recovers_on_next_frame() {
        let mut corrupted = Frame::new(FrameType::Result, Bytes::from_static(b"window result")).encode();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0x01;

        let good = Frame::new(FrameType::Result, Bytes::from_static(b"second frame"));
        let good_encoded = good.encode();

        let mut decoder = FrameDecoder::new();
        let mut saw_crc_error = false;
        for &byte in &corrupted {
            if let Err(ProtocolError::CrcMismatch) = decoder.push(byte) {
                saw_crc_error = true;
            }
        }
        assert!(saw_crc_error);

        let mut decoded = None;
        for &byte in &good_encoded {
            if let Ok(Some(f)) = decoder.push(byte) {
                decoded = Some(f);
            }
        }
        assert_eq!(decoded.unwrap(), good);
    }

    #[test]
    fn rejects_empty_buffer_as_still_pending() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(0).unwrap(), None);
    }
}
