//! Frame type codes.

use crate::error::ProtocolError;

/// The `type` byte of a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Adapter-to-harness capability announcement.
    Hello = 1,
    /// Harness-to-adapter session configuration.
    Config = 2,
    /// Adapter-to-harness configuration acknowledgement.
    Ack = 3,
    /// Either direction: one chunk of a window or result transfer.
    WindowChunk = 4,
    /// Adapter-to-harness window result.
    Result = 5,
    /// Either direction: a fatal or per-window error report.
    Error = 6,
}

impl FrameType {
    /// Decode a frame type byte, rejecting anything outside the known set.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(Self::Hello),
            2 => Ok(Self::Config),
            3 => Ok(Self::Ack),
            4 => Ok(Self::WindowChunk),
            5 => Ok(Self::Result),
            6 => Ok(Self::Error),
            _ => Err(ProtocolError::InvalidFrame),
        }
    }
}
