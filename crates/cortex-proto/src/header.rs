//! The 16-byte frame header shared by every frame on the wire.

use crate::error::ProtocolError;
use crate::opcode::FrameType;
use crate::wire::{crc32, get_u16_le, get_u32_le, put_u16_le, put_u32_le};

/// `"CRTX"` interpreted as a big-endian `u32`, matching the literal constant
/// named in the protocol's external interface.
pub const MAGIC: u32 = 0x4352_5458;

/// Total header length in bytes.
pub const HEADER_LEN: usize = 16;

/// Maximum payload carried directly in a single frame; larger content must
/// go through chunking.
pub const MAX_FRAME_PAYLOAD: usize = 65_536;

/// The fixed 16-byte header preceding every frame's payload.
///
/// Fields are accessed and mutated through plain accessor methods backed by
/// explicit little-endian byte load/store — never through a typed or
/// packed-struct cast over the raw buffer, since that is undefined on ISAs
/// that require aligned access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    magic: u32,
    version: u8,
    frame_type: u8,
    flags: u16,
    payload_length: u32,
    crc32: u32,
}

impl FrameHeader {
    /// Build a header for `frame_type` and `payload`, with `crc32` left
    /// unset; call [`FrameHeader::finalize`] (or use [`FrameHeader::new`])
    /// once the payload is known to compute it.
    #[must_use]
    pub fn new(frame_type: FrameType, payload: &[u8]) -> Self {
        let mut header = Self {
            magic: MAGIC,
            version: 1,
            frame_type: frame_type as u8,
            flags: 0,
            payload_length: payload.len() as u32,
            crc32: 0,
        };
        header.crc32 = header.compute_crc(payload);
        header
    }

    /// The magic constant as read from the wire.
    #[must_use]
    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// Protocol version; currently always `1`.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Decoded frame type, or `InvalidFrame` if the byte is out of range.
    pub fn frame_type(&self) -> Result<FrameType, ProtocolError> {
        FrameType::from_u8(self.frame_type)
    }

    /// Reserved flags field; always `0` on this version of the protocol.
    #[must_use]
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Length in bytes of the payload following this header.
    #[must_use]
    pub fn payload_length(&self) -> u32 {
        self.payload_length
    }

    /// The CRC32 trailer covering header bytes `[0, 12)` plus the payload.
    #[must_use]
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// CRC32 over header bytes `[0, 12)` followed by `payload`.
    fn compute_crc(&self, payload: &[u8]) -> u32 {
        let mut covered = Vec::with_capacity(12 + payload.len());
        covered.extend_from_slice(&self.magic.to_le_bytes());
        covered.push(self.version);
        covered.push(self.frame_type);
        covered.extend_from_slice(&self.flags.to_le_bytes());
        covered.extend_from_slice(&self.payload_length.to_le_bytes());
        covered.extend_from_slice(payload);
        crc32(&covered)
    }

    /// Serialize this header into `out[0..HEADER_LEN]`.
    pub fn encode(&self, out: &mut [u8]) {
        put_u32_le(out, 0, self.magic);
        out[4] = self.version;
        out[5] = self.frame_type;
        put_u16_le(out, 6, self.flags);
        put_u32_le(out, 8, self.payload_length);
        put_u32_le(out, 12, self.crc32);
    }

    /// Parse the fixed header fields from `buf` (at least `HEADER_LEN`
    /// bytes). Performs no CRC validation: callers validate once the
    /// payload is also available, via [`FrameHeader::verify_crc`].
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::InvalidFrame);
        }
        let magic = get_u32_le(buf, 0);
        if magic != MAGIC {
            return Err(ProtocolError::MagicNotFound);
        }
        let version = buf[4];
        if version != 1 {
            return Err(ProtocolError::VersionMismatch);
        }
        let frame_type = buf[5];
        FrameType::from_u8(frame_type)?;
        let flags = get_u16_le(buf, 6);
        let payload_length = get_u32_le(buf, 8);
        if payload_length as usize > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge);
        }
        let crc32 = get_u32_le(buf, 12);
        Ok(Self { magic, version, frame_type, flags, payload_length, crc32 })
    }

    /// Recompute the CRC over `payload` and compare against the stored
    /// trailer.
    pub fn verify_crc(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        if self.compute_crc(payload) == self.crc32 {
            Ok(())
        } else {
            Err(ProtocolError::CrcMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let payload = b"hello window".to_vec();
        let header = FrameHeader::new(FrameType::Hello, &payload);
        let mut buf = [0u8; HEADER_LEN];
        header.encode(&mut buf);

        let decoded = FrameHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.frame_type().unwrap(), FrameType::Hello);
        decoded.verify_crc(&payload).unwrap();
    }

    #[test]
    fn reject_short_buffer() {
        let buf = [0u8; 8];
        assert_eq!(FrameHeader::decode(&buf), Err(ProtocolError::InvalidFrame));
    }

    #[test]
    fn reject_invalid_magic() {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = 0xFF;
        assert_eq!(FrameHeader::decode(&buf), Err(ProtocolError::MagicNotFound));
    }

    #[test]
    fn reject_invalid_version() {
        let payload = b"x".to_vec();
        let header = FrameHeader::new(FrameType::Ack, &payload);
        let mut buf = [0u8; HEADER_LEN];
        header.encode(&mut buf);
        buf[4] = 2;
        assert_eq!(FrameHeader::decode(&buf), Err(ProtocolError::VersionMismatch));
    }

    #[test]
    fn reject_oversized_payload() {
        let mut buf = [0u8; HEADER_LEN];
        let header = FrameHeader::new(FrameType::Result, &[]);
        header.encode(&mut buf);
        put_u32_le(&mut buf, 8, (MAX_FRAME_PAYLOAD + 1) as u32);
        assert_eq!(FrameHeader::decode(&buf), Err(ProtocolError::FrameTooLarge));
    }

    #[test]
    fn crc_tampering_detected() {
        let payload = b"window payload bytes".to_vec();
        let header = FrameHeader::new(FrameType::WindowChunk, &payload);
        for i in 0..payload.len() {
            let mut mutated = payload.clone();
            mutated[i] ^= 0xFF;
            assert_eq!(header.verify_crc(&mutated), Err(ProtocolError::CrcMismatch));
        }
    }
}
