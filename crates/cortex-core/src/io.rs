//! Framing and chunking glue: drives [`cortex_proto`]'s pure decoders over
//! a [`Transport`], under a caller-supplied deadline.

use std::time::Instant;

use bytes::Bytes;
use cortex_proto::{
    chunk::{encode_chunk_frame_payload, split_chunks, ChunkReassembler},
    frame::{Frame, FrameDecoder},
    header::{FrameHeader, MAX_FRAME_PAYLOAD},
    opcode::FrameType,
};

use crate::error::CortexError;
use crate::transport::Transport;

/// Send a single frame of `frame_type` carrying `payload`.
pub fn send_frame(
    transport: &mut dyn Transport,
    frame_type: FrameType,
    payload: &[u8],
) -> Result<(), CortexError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(cortex_proto::ProtocolError::FrameTooLarge.into());
    }
    let header = FrameHeader::new(frame_type, payload);
    let mut buf = vec![0u8; cortex_proto::HEADER_LEN + payload.len()];
    header.encode(&mut buf[..cortex_proto::HEADER_LEN]);
    buf[cortex_proto::HEADER_LEN..].copy_from_slice(payload);
    transport.send(&buf)?;
    Ok(())
}

/// Receive one frame, hunting for MAGIC byte-at-a-time, bounded by
/// `deadline`.
pub fn recv_frame(transport: &mut dyn Transport, deadline: Instant) -> Result<Frame, CortexError> {
    let mut decoder = FrameDecoder::new();
    loop {
        let byte = transport.recv_byte(deadline)?;
        if let Some(frame) = decoder.push(byte)? {
            return Ok(frame);
        }
    }
}

/// Send `bytes` as a WINDOW_CHUNK sequence, each chunk a separate frame.
pub fn send_chunked(
    transport: &mut dyn Transport,
    sequence: u32,
    bytes: &[u8],
) -> Result<(), CortexError> {
    for (header, chunk_bytes) in split_chunks(sequence, bytes) {
        let payload = encode_chunk_frame_payload(&header, chunk_bytes);
        send_frame(transport, FrameType::WindowChunk, &payload)?;
    }
    Ok(())
}

/// Receive a full WINDOW_CHUNK sequence for `sequence`, reassembling until
/// the LAST chunk is seen or `deadline` elapses.
pub fn recv_chunked(
    transport: &mut dyn Transport,
    sequence: u32,
    out_cap: usize,
    deadline: Instant,
) -> Result<Bytes, CortexError> {
    let mut reassembler = ChunkReassembler::new(sequence);
    loop {
        let frame = recv_frame(transport, deadline)?;
        if frame.header.frame_type()? != FrameType::WindowChunk {
            return Err(cortex_proto::ProtocolError::InvalidFrame.into());
        }
        if let Some(bytes) = reassembler.push_frame_payload(&frame.payload, out_cap)? {
            return Ok(Bytes::from(bytes));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::local::LocalTransport;
    use std::time::Duration;

    #[test]
    fn round_trips_a_chunked_window_over_a_local_transport() {
        let (mut a, mut b) = LocalTransport::pair().unwrap();
        let payload = vec![7u8; 20_000];
        let sender = std::thread::spawn(move || {
            send_chunked(&mut a, 1, &payload).unwrap();
        });
        let deadline = Instant::now() + Duration::from_secs(2);
        let received = recv_chunked(&mut b, 1, 1 << 20, deadline).unwrap();
        sender.join().unwrap();
        assert_eq!(received.len(), 20_000);
        assert!(received.iter().all(|&b| b == 7));
    }

    #[test]
    fn single_frame_round_trips() {
        let (mut a, mut b) = LocalTransport::pair().unwrap();
        a.send(&{
            let header = FrameHeader::new(FrameType::Hello, b"hi");
            let mut buf = vec![0u8; cortex_proto::HEADER_LEN + 2];
            header.encode(&mut buf[..cortex_proto::HEADER_LEN]);
            buf[cortex_proto::HEADER_LEN..].copy_from_slice(b"hi");
            buf
        })
        .unwrap();
        let deadline = Instant::now() + Duration::from_millis(500);
        let frame = recv_frame(&mut b, deadline).unwrap();
        assert_eq!(frame.header.frame_type().unwrap(), FrameType::Hello);
        assert_eq!(&frame.payload[..], b"hi");
    }
}
