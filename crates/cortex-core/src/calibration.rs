//! Calibration-state file format: `"CXST"` magic, version, size, payload.

use std::io;
use std::path::Path;

const MAGIC: &[u8; 4] = b"CXST";

/// A loaded calibration-state file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationState {
    /// File format version.
    pub version: u32,
    /// Opaque payload, exactly `size` bytes.
    pub payload: Vec<u8>,
}

impl CalibrationState {
    /// Wrap a payload at the current format version (`1`).
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self { version: 1, payload }
    }

    /// Serialize to the on-disk format.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse from the on-disk format.
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < 12 || &buf[0..4] != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad calibration-state magic"));
        }
        let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let size = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        if buf.len() != 12 + size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "calibration-state size field does not match file length",
            ));
        }
        Ok(Self { version, payload: buf[12..].to_vec() })
    }

    /// Read a calibration-state file from disk.
    pub fn read(path: &Path) -> io::Result<Self> {
        Self::decode(&std::fs::read(path)?)
    }

    /// Write a calibration-state file to disk.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let state = CalibrationState::new(vec![1, 2, 3, 4, 5]);
        let encoded = state.encode();
        assert_eq!(CalibrationState::decode(&encoded).unwrap(), state);
    }

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib.bin");
        let state = CalibrationState::new(vec![0xAB; 64]);
        state.write(&path).unwrap();
        assert_eq!(CalibrationState::read(&path).unwrap(), state);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = CalibrationState::new(vec![1]).encode();
        buf[0] = b'X';
        assert!(CalibrationState::decode(&buf).is_err());
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut buf = CalibrationState::new(vec![1, 2, 3]).encode();
        buf[8] = 0xFF;
        assert!(CalibrationState::decode(&buf).is_err());
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_payloads_round_trip(payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..4096)) {
            let state = CalibrationState::new(payload);
            let decoded = CalibrationState::decode(&state.encode()).unwrap();
            proptest::prop_assert_eq!(decoded, state);
        }
    }
}
