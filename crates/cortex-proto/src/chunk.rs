//! Chunked transfer: splitting and reassembling payloads larger than a
//! single frame into `WINDOW_CHUNK` frames.

use crate::error::ProtocolError;
use crate::wire::{get_u32_le, put_u32_le};

/// Chunk size, fixed at compile time per the protocol.
pub const CHUNK_SIZE: usize = 8192;

/// Fixed-size header prefixing every chunk's payload bytes inside a
/// `WINDOW_CHUNK` frame.
pub const CHUNK_HEADER_LEN: usize = 20;

/// Set on the final chunk of a sequence.
pub const FLAG_LAST: u32 = 0x1;

/// One chunk's metadata: `{sequence, total_bytes, offset_bytes,
/// chunk_length, flags}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Sequence number of the transfer this chunk belongs to.
    pub sequence: u32,
    /// Total size in bytes of the full reassembled payload.
    pub total_bytes: u32,
    /// Byte offset of this chunk within the full payload.
    pub offset_bytes: u32,
    /// Length in bytes of this chunk's payload.
    pub chunk_length: u32,
    /// Bit flags; bit 0 marks the final chunk.
    pub flags: u32,
}

impl ChunkHeader {
    /// Whether this chunk is flagged as the last one of its sequence.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.flags & FLAG_LAST != 0
    }

    /// Serialize into `out[0..CHUNK_HEADER_LEN]`.
    pub fn encode(&self, out: &mut [u8]) {
        put_u32_le(out, 0, self.sequence);
        put_u32_le(out, 4, self.total_bytes);
        put_u32_le(out, 8, self.offset_bytes);
        put_u32_le(out, 12, self.chunk_length);
        put_u32_le(out, 16, self.flags);
    }

    /// Parse from `buf` (at least `CHUNK_HEADER_LEN` bytes).
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < CHUNK_HEADER_LEN {
            return Err(ProtocolError::InvalidFrame);
        }
        Ok(Self {
            sequence: get_u32_le(buf, 0),
            total_bytes: get_u32_le(buf, 4),
            offset_bytes: get_u32_le(buf, 8),
            chunk_length: get_u32_le(buf, 12),
            flags: get_u32_le(buf, 16),
        })
    }
}

/// Split `bytes` into a sequence of `(ChunkHeader, &[u8])` pairs ready to be
/// sent as individual `WINDOW_CHUNK` frame payloads.
#[must_use]
pub fn split_chunks(sequence: u32, bytes: &[u8]) -> Vec<(ChunkHeader, &[u8])> {
    if bytes.is_empty() {
        let header = ChunkHeader {
            sequence,
            total_bytes: 0,
            offset_bytes: 0,
            chunk_length: 0,
            flags: FLAG_LAST,
        };
        return vec![(header, &bytes[0..0])];
    }
    let total_bytes = bytes.len() as u32;
    let mut chunks = Vec::with_capacity(bytes.len().div_ceil(CHUNK_SIZE));
    let mut offset = 0usize;
    while offset < bytes.len() {
        let end = (offset + CHUNK_SIZE).min(bytes.len());
        let is_last = end == bytes.len();
        let header = ChunkHeader {
            sequence,
            total_bytes,
            offset_bytes: offset as u32,
            chunk_length: (end - offset) as u32,
            flags: if is_last { FLAG_LAST } else { 0 },
        };
        chunks.push((header, &bytes[offset..end]));
        offset = end;
    }
    chunks
}

/// Frame-encode a chunk header and payload into one `WINDOW_CHUNK` frame
/// payload (header bytes followed by chunk bytes).
#[must_use]
pub fn encode_chunk_frame_payload(header: &ChunkHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; CHUNK_HEADER_LEN + payload.len()];
    header.encode(&mut out[..CHUNK_HEADER_LEN]);
    out[CHUNK_HEADER_LEN..].copy_from_slice(payload);
    out
}

/// Incremental reassembler for one chunked transfer.
pub struct ChunkReassembler {
    sequence_expected: u32,
    total_bytes: Option<usize>,
    buf: Vec<u8>,
    covered: Vec<bool>,
    bytes_covered: usize,
    saw_last: bool,
}

impl ChunkReassembler {
    /// Begin reassembling a transfer expected to carry `sequence_expected`.
    #[must_use]
    pub fn new(sequence_expected: u32) -> Self {
        Self {
            sequence_expected,
            total_bytes: None,
            buf: Vec::new(),
            covered: Vec::new(),
            bytes_covered: 0,
            saw_last: false,
        }
    }

    /// Feed one `WINDOW_CHUNK` frame's payload bytes (chunk header + chunk
    /// data). Returns `Ok(Some(bytes))` once the LAST chunk has arrived and
    /// coverage is complete, `Ok(None)` while more chunks are expected.
    pub fn push_frame_payload(
        &mut self,
        frame_payload: &[u8],
        out_cap: usize,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let header = ChunkHeader::decode(frame_payload)?;
        let chunk_bytes = &frame_payload[CHUNK_HEADER_LEN..];
        if chunk_bytes.len() != header.chunk_length as usize {
            return Err(ProtocolError::InvalidFrame);
        }
        if header.sequence != self.sequence_expected {
            return Err(ProtocolError::ChunkSequenceMismatch);
        }
        if self.saw_last {
            return Err(ProtocolError::ChunkIncomplete);
        }

        let total = *self.total_bytes.get_or_insert(header.total_bytes as usize);
        if total != header.total_bytes as usize {
            return Err(ProtocolError::ChunkSequenceMismatch);
        }
        if total > out_cap {
            return Err(ProtocolError::ChunkBufferTooSmall);
        }
        if self.buf.is_empty() && total > 0 {
            self.buf = vec![0u8; total];
            self.covered = vec![false; total];
        }

        let offset = header.offset_bytes as usize;
        let end = offset
            .checked_add(chunk_bytes.len())
            .ok_or(ProtocolError::InvalidFrame)?;
        if end > total {
            return Err(ProtocolError::InvalidFrame);
        }
        self.buf[offset..end].copy_from_slice(chunk_bytes);
        for covered in &mut self.covered[offset..end] {
            if !*covered {
                *covered = true;
                self.bytes_covered += 1;
            }
        }

        if header.is_last() {
            self.saw_last = true;
            if self.bytes_covered != total {
                return Err(ProtocolError::ChunkIncomplete);
            }
            return Ok(Some(std::mem::take(&mut self.buf)));
        }
        if self.bytes_covered == total {
            return Err(ProtocolError::ChunkIncomplete);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_covers_exactly_once() {
        let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 256) as u8).collect();
        let chunks = split_chunks(7, &data);
        let mut covered = vec![false; data.len()];
        let mut last_count = 0;
        for (header, payload) in &chunks {
            assert_eq!(header.sequence, 7);
            assert_eq!(header.chunk_length as usize, payload.len());
            let start = header.offset_bytes as usize;
            for (i, covered_byte) in covered[start..start + payload.len()].iter_mut().enumerate() {
                assert!(!*covered_byte, "byte {} covered twice", start + i);
                *covered_byte = true;
            }
            if header.is_last() {
                last_count += 1;
            }
        }
        assert!(covered.iter().all(|&c| c));
        assert_eq!(last_count, 1);
    }

    #[test]
    fn reassembles_in_order() {
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 5).map(|i| (i % 256) as u8).collect();
        let chunks = split_chunks(3, &data);
        let mut reassembler = ChunkReassembler::new(3);
        let mut result = None;
        for (header, payload) in &chunks {
            let frame_payload = encode_chunk_frame_payload(header, payload);
            if let Some(bytes) = reassembler.push_frame_payload(&frame_payload, data.len()).unwrap() {
                result = Some(bytes);
            }
        }
        assert_eq!(result.unwrap(), data);
    }

    #[test]
    fn wrong_sequence_rejected() {
        let mut reassembler = ChunkReassembler::new(1);
        let header = ChunkHeader { sequence: 2, total_bytes: 1, offset_bytes: 0, chunk_length: 1, flags: FLAG_LAST };
        let payload = encode_chunk_frame_payload(&header, &[0]);
        assert_eq!(
            reassembler.push_frame_payload(&payload, 16),
            Err(ProtocolError::ChunkSequenceMismatch)
        );
    }

    #[test]
    fn missing_last_flag_is_incomplete() {
        let data = vec![0u8; CHUNK_SIZE + 10];
        let mut chunks = split_chunks(9, &data);
        // Drop the LAST flag from the final chunk.
        let last = chunks.last_mut().unwrap();
        last.0.flags = 0;
        let mut reassembler = ChunkReassembler::new(9);
        let mut results = Vec::new();
        for (header, payload) in &chunks {
            let frame_payload = encode_chunk_frame_payload(header, payload);
            results.push(reassembler.push_frame_payload(&frame_payload, data.len()));
        }
        assert_eq!(results.pop().unwrap(), Err(ProtocolError::ChunkIncomplete));
        assert!(results.iter().all(|result| *result == Ok(None)));
    }

    #[test]
    fn total_bytes_exceeding_capacity_rejected() {
        let mut reassembler = ChunkReassembler::new(1);
        let header = ChunkHeader {
            sequence: 1,
            total_bytes: 100,
            offset_bytes: 0,
            chunk_length: 10,
            flags: 0,
        };
        let payload = encode_chunk_frame_payload(&header, &[0u8; 10]);
        assert_eq!(
            reassembler.push_frame_payload(&payload, 50),
            Err(ProtocolError::ChunkBufferTooSmall)
        );
    }
}
