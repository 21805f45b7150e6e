//! Property-based tests using proptest
//!
//! These tests check buffer and framing invariants across randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::VecDeque;

use glyph_auth::core::{ByteBuffer, OutboundQueue};
use glyph_auth::protocol::command::{LogonChallengeRequest, LogonProofRequest};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Write(Vec<u8>),
    WriteU32(u32),
    Read(usize),
    Drain(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..48).prop_map(Op::Write),
        any::<u32>().prop_map(Op::WriteU32),
        (0usize..40).prop_map(Op::Read),
        (0usize..40).prop_map(Op::Drain),
    ]
}

// Property: offsets stay consistent and reads return exactly what was written, in order
proptest! {
    #[test]
    fn prop_buffer_matches_fifo_model(capacity in 1usize..128, ops in prop::collection::vec(op(), 0..64)) {
        let mut buf = ByteBuffer::with_capacity(capacity);
        let mut model: VecDeque<u8> = VecDeque::new();

        for op in ops {
            match op {
                Op::Write(bytes) => {
                    let fits = bytes.len() <= capacity - model.len();
                    prop_assert_eq!(buf.write_bytes(&bytes).is_ok(), fits);
                    if fits {
                        model.extend(bytes);
                    }
                }
                Op::WriteU32(value) => {
                    let fits = 4 <= capacity - model.len();
                    prop_assert_eq!(buf.write(value).is_ok(), fits);
                    if fits {
                        model.extend(value.to_le_bytes());
                    }
                }
                Op::Read(n) => {
                    let result = buf.peek_slice(n).map(<[u8]>::to_vec);
                    if n <= model.len() {
                        let expected: Vec<u8> = model.drain(..n).collect();
                        prop_assert_eq!(result.unwrap(), expected);
                        buf.drain(n).unwrap();
                    } else {
                        prop_assert!(result.is_err());
                    }
                }
                Op::Drain(n) => {
                    let ok = buf.drain(n).is_ok();
                    prop_assert_eq!(ok, n <= model.len());
                    if ok {
                        model.drain(..n);
                    }
                }
            }
            prop_assert_eq!(buf.readable_len() + buf.writable_len(), buf.capacity());
            prop_assert_eq!(buf.readable_len(), model.len());
            let expected: Vec<u8> = model.iter().copied().collect();
            prop_assert_eq!(buf.readable_slice(), &expected[..]);
        }
    }
}

// Property: fixed-width values round-trip little-endian
proptest! {
    #[test]
    fn prop_fixed_width_roundtrip(a in any::<u8>(), b in any::<i16>(), c in any::<u32>(), d in any::<i64>(), e in any::<f64>(), f in any::<bool>()) {
        let mut buf = ByteBuffer::with_capacity(1 + 2 + 4 + 8 + 8 + 1);
        buf.write(a).unwrap();
        buf.write(b).unwrap();
        buf.write(c).unwrap();
        buf.write(d).unwrap();
        buf.write(e).unwrap();
        buf.write(f).unwrap();
        prop_assert!(buf.is_full());
        prop_assert_eq!(&buf.readable_slice()[3..7], &c.to_le_bytes());

        prop_assert_eq!(buf.read::<u8>().unwrap(), a);
        prop_assert_eq!(buf.read::<i16>().unwrap(), b);
        prop_assert_eq!(buf.read::<u32>().unwrap(), c);
        prop_assert_eq!(buf.read::<i64>().unwrap(), d);
        prop_assert_eq!(buf.read::<f64>().unwrap().to_bits(), e.to_bits());
        prop_assert_eq!(buf.read::<bool>().unwrap(), f);
        prop_assert!(buf.is_empty());
    }
}

// Property: length-prefixed strings round-trip
proptest! {
    #[test]
    fn prop_prefixed_string_roundtrip(value in "[a-zA-Z0-9 _.-]{0,255}") {
        let mut buf = ByteBuffer::with_capacity(256);
        buf.write_prefixed_string(&value).unwrap();
        prop_assert_eq!(buf.readable_len(), value.len() + 1);
        prop_assert_eq!(buf.read_prefixed_string().unwrap(), value);
    }
}

// Property: a truncated prefixed string consumes nothing
proptest! {
    #[test]
    fn prop_truncated_prefixed_string_is_atomic(value in "[a-z]{1,64}", cut in 1usize..64) {
        let cut = cut.min(value.len());
        let mut full = ByteBuffer::with_capacity(value.len() + 1);
        full.write_prefixed_string(&value).unwrap();
        let mut buf = ByteBuffer::from_slice(&full.readable_slice()[..cut]);

        prop_assert!(buf.read_prefixed_string().is_err());
        prop_assert_eq!(buf.readable_len(), cut);
    }
}

// Property: decoders never panic and either consume one message or nothing
proptest! {
    #[test]
    fn prop_challenge_decode_is_all_or_nothing(bytes in prop::collection::vec(any::<u8>(), 0..400)) {
        let mut buf = ByteBuffer::with_capacity(512);
        buf.write_bytes(&bytes).unwrap();
        let before = buf.readable_len();

        match LogonChallengeRequest::decode(&mut buf) {
            Ok(Some(_)) => {
                let declared = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
                prop_assert_eq!(before - buf.readable_len(), 4 + declared);
            }
            Ok(None) | Err(_) => prop_assert_eq!(buf.readable_len(), before),
        }
    }

    #[test]
    fn prop_proof_decode_is_all_or_nothing(bytes in prop::collection::vec(any::<u8>(), 0..120)) {
        let mut buf = ByteBuffer::from_slice(&bytes);
        match LogonProofRequest::decode(&mut buf) {
            Ok(Some(_)) => prop_assert_eq!(buf.readable_len(), bytes.len() - 75),
            Ok(None) | Err(_) => prop_assert_eq!(buf.readable_len(), bytes.len()),
        }
    }
}

// Property: partial drains of queued packets yield their concatenation
proptest! {
    #[test]
    fn prop_queue_preserves_order(
        packets in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..80),
        chunk in 1usize..17,
    ) {
        let mut queue = OutboundQueue::new();
        for packet in &packets {
            queue.enqueue(ByteBuffer::from_slice(packet));
        }
        prop_assert_eq!(queue.pending_bytes(), packets.iter().map(Vec::len).sum::<usize>());

        let mut wire = Vec::new();
        while let Some(front) = queue.front_mut() {
            let n = chunk.min(front.readable_len());
            wire.extend_from_slice(front.peek_slice(n).unwrap());
            front.drain(n).unwrap();
            queue.dequeue_if_fully_drained();
        }
        prop_assert!(queue.is_empty());
        prop_assert_eq!(wire, packets.concat());
    }
}
