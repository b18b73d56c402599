//! Property tests for the frame codec: round-tripping and tamper detection.

use bytes::Bytes;
use cortex_proto::frame::{Frame, FrameDecoder};
use cortex_proto::header::MAX_FRAME_PAYLOAD;
use cortex_proto::opcode::FrameType;
use cortex_proto::ProtocolError;
use proptest::prelude::*;

fn arbitrary_frame_type() -> impl Strategy<Value = FrameType> {
    prop_oneof![
        Just(FrameType::Hello),
        Just(FrameType::Config),
        Just(FrameType::Ack),
        Just(FrameType::WindowChunk),
        Just(FrameType::Result),
        Just(FrameType::Error),
    ]
}

fn decode_one(bytes: &[u8]) -> Option<Frame> {
    let mut decoder = FrameDecoder::new();
    let mut decoded = None;
    for &byte in bytes {
        if let Ok(Some(frame)) = decoder.push(byte) {
            decoded = Some(frame);
        }
    }
    decoded
}

proptest! {
    #[test]
    fn frame_round_trips(
        frame_type in arbitrary_frame_type(),
        payload in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let frame = Frame::new(frame_type, Bytes::from(payload));
        let encoded = frame.encode();
        let decoded = decode_one(&encoded);
        prop_assert_eq!(decoded, Some(frame));
    }

    #[test]
    fn tampering_any_byte_is_detected(
        frame_type in arbitrary_frame_type(),
        payload in prop::collection::vec(any::<u8>(), 1..512),
        flip_index in 0usize..16 + 512,
    ) {
        let frame = Frame::new(frame_type, Bytes::from(payload));
        let mut encoded = frame.encode();
        let index = flip_index % encoded.len();
        encoded[index] ^= 0x01;

        let mut decoder = FrameDecoder::new();
        let mut saw_error = false;
        let mut decoded_identical = false;
        for &byte in &encoded {
            match decoder.push(byte) {
                Err(_) => saw_error = true,
                Ok(Some(decoded)) => {
                    if decoded == frame {
                        decoded_identical = true;
                    }
                }
                Ok(None) => {}
            }
        }
        // Either the mutation was caught as a structural/CRC error, or (in
        // the rare case a header-field flip still parses as a legal, merely
        // different header) it must not silently produce the original frame.
        prop_assert!(saw_error || !decoded_identical);
    }

    #[test]
    fn magic_hunt_recovers_from_arbitrary_garbage_prefix(
        garbage in prop::collection::vec(any::<u8>(), 0..64),
        payload in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let frame = Frame::new(FrameType::WindowChunk, Bytes::from(payload));
        let mut stream = garbage;
        stream.extend(frame.encode());

        let decoded = decode_one(&stream);
        prop_assert_eq!(decoded, Some(frame));
    }

    #[test]
    fn oversized_payload_rejected(len in (MAX_FRAME_PAYLOAD + 1)..(MAX_FRAME_PAYLOAD + 8)) {
        let mut header_bytes = [0u8; 16];
        cortex_proto::header::FrameHeader::new(FrameType::Result, &[]).encode(&mut header_bytes);
        cortex_proto::wire::put_u32_le(&mut header_bytes, 8, len as u32);

        let mut decoder = FrameDecoder::new();
        let mut saw_too_large = false;
        for &byte in &header_bytes {
            if decoder.push(byte) == Err(ProtocolError::FrameTooLarge) {
                saw_too_large = true;
            }
        }
        prop_assert!(saw_too_large);
    }
}
