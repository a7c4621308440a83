//! Property-based tests for the frame codec and the payload adapters.

use proptest::prelude::*;
use restws::protocol::{apply_mask, apply_mask_fast, Frame, OpCode};
use restws::rest::compress::{compress_block, decompress_block};
use restws::rest::{BinaryCodec, FrameCipher, JsonCodec, RequestContext, ResponseContext};
use serde_json::Value;

fn any_opcode() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Continuation),
        Just(OpCode::Text),
        Just(OpCode::Binary),
        Just(OpCode::Close),
        Just(OpCode::Ping),
        Just(OpCode::Pong),
        (0x3u8..=0x7).prop_map(OpCode::Reserved),
        (0xBu8..=0xF).prop_map(OpCode::Reserved),
    ]
}

/// Bytes that survive a Text frame unchanged (frame parse checks UTF-8 on
/// Text opcodes, so payload strategies are split by opcode).
fn frame_strategy() -> impl Strategy<Value = Frame> {
    any_opcode().prop_flat_map(|opcode| {
        if opcode == OpCode::Text {
            ".{0,400}"
                .prop_map(move |s: String| Frame::new(opcode, s.into_bytes()))
                .boxed()
        } else {
            prop::collection::vec(any::<u8>(), 0..2000)
                .prop_map(move |payload| Frame::new(opcode, payload))
                .boxed()
        }
    })
}

proptest! {
    // Frame round-trip: parse(encode(f)) == f, for every opcode.
    #[test]
    fn frame_roundtrip_unmasked(frame in frame_strategy()) {
        let wire = frame.encode(None);
        let (parsed, consumed) = Frame::parse(&wire).unwrap();
        prop_assert_eq!(consumed, wire.len());
        prop_assert_eq!(parsed, frame);
    }

    #[test]
    fn frame_roundtrip_masked(frame in frame_strategy(), mask in any::<[u8; 4]>()) {
        let wire = frame.encode(Some(mask));
        let (parsed, consumed) = Frame::parse(&wire).unwrap();
        prop_assert_eq!(consumed, wire.len());
        prop_assert_eq!(parsed.payload, frame.payload);
        prop_assert_eq!(parsed.opcode, frame.opcode);
    }

    // Masking is involutive for every key and buffer.
    #[test]
    fn mask_involutive(
        data in prop::collection::vec(any::<u8>(), 0..4000),
        mask in any::<[u8; 4]>()
    ) {
        let mut buf = data.clone();
        apply_mask(&mut buf, mask);
        apply_mask(&mut buf, mask);
        prop_assert_eq!(&buf, &data);

        apply_mask_fast(&mut buf, mask);
        apply_mask_fast(&mut buf, mask);
        prop_assert_eq!(&buf, &data);
    }

    // The two masking implementations agree.
    #[test]
    fn mask_fast_matches_scalar(
        data in prop::collection::vec(any::<u8>(), 0..4000),
        mask in any::<[u8; 4]>()
    ) {
        let mut scalar = data.clone();
        let mut fast = data;
        apply_mask(&mut scalar, mask);
        apply_mask_fast(&mut fast, mask);
        prop_assert_eq!(scalar, fast);
    }

    // Length encodings cover the 7-bit, 16-bit, and 64-bit ranges.
    #[test]
    fn frame_length_encoding(len in prop_oneof![0usize..=125, 126usize..=65535, 65536usize..=80000]) {
        let frame = Frame::binary(vec![0xA5; len]);
        let wire = frame.encode(None);
        let (parsed, _) = Frame::parse(&wire).unwrap();
        prop_assert_eq!(parsed.payload.len(), len);
    }

    // Compression blocks round-trip for arbitrary inputs.
    #[test]
    fn compress_roundtrip(data in prop::collection::vec(any::<u8>(), 0..8000)) {
        let block = compress_block(&data);
        let restored = decompress_block(&block, 1 << 24).unwrap();
        prop_assert_eq!(restored, data);
    }

    // Encryption round-trips for every key size and arbitrary plaintext.
    #[test]
    fn cipher_roundtrip(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        key_len in prop_oneof![Just(16usize), Just(24), Just(32)]
    ) {
        let cipher = FrameCipher::from_key(&vec![0x5A; key_len]).unwrap();
        let encrypted = cipher.encrypt(data.clone());
        prop_assert_eq!(cipher.decrypt(&encrypted).unwrap(), data);
    }
}

fn field_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 /:.-]{0,40}"
}

fn adapter_request_strategy() -> impl Strategy<Value = RequestContext> {
    (
        "[A-Z]{3,7}",
        "/[a-zA-Z0-9/_-]{0,30}",
        field_text(),
        any::<bool>(),
        prop_oneof![
            Just("application/octet-stream".to_string()),
            Just("image/png".to_string()),
            Just("text/plain".to_string()),
            Just("text/csv;charset=utf-8".to_string()),
        ],
        prop::collection::vec(any::<u8>(), 0..1500),
        "[ -~]{0,200}",
    )
        .prop_map(
            |(method, url, headers, no_answer, content_type, raw, text)| {
                let content = if content_type.starts_with("text/") {
                    text.into_bytes()
                } else {
                    raw
                };
                RequestContext {
                    method,
                    url,
                    headers,
                    no_answer,
                    content_type,
                    content,
                }
            },
        )
}

proptest! {
    // Adapter invariant: encode -> decode preserves every field byte-exact
    // for non-JSON content types, over both encodings.
    #[test]
    fn json_adapter_request_roundtrip(request in adapter_request_strategy()) {
        let codec = JsonCodec;
        let frame = codec.encode_request(&request).unwrap();
        let decoded = codec.decode_request(&frame.payload).unwrap().unwrap();
        prop_assert_eq!(decoded, request);
    }

    #[test]
    fn binary_adapter_request_roundtrip(
        request in adapter_request_strategy(),
        compressed in any::<bool>(),
        encrypted in any::<bool>()
    ) {
        let cipher = encrypted.then(|| FrameCipher::from_text("property key"));
        let codec = BinaryCodec::new(compressed, cipher);
        let frame = codec.encode_request(&request).unwrap();
        let decoded = codec.decode_request(&frame.payload).unwrap().unwrap();
        prop_assert_eq!(decoded, request);
    }

    #[test]
    fn adapters_answer_roundtrip(
        status in 100u16..=999,
        headers in field_text(),
        body in prop::collection::vec(any::<u8>(), 0..1500)
    ) {
        let answer = ResponseContext {
            status,
            headers,
            content_type: "application/octet-stream".into(),
            content: body,
        };

        let json = JsonCodec;
        let frame = json.encode_answer(&answer).unwrap();
        prop_assert_eq!(json.decode_answer(&frame.payload).unwrap().unwrap(), answer.clone());

        let binary = BinaryCodec::plain();
        let frame = binary.encode_answer(&answer).unwrap();
        prop_assert_eq!(binary.decode_answer(&frame.payload).unwrap().unwrap(), answer);
    }

    // JSON bodies survive semantically: the reparsed value is equal even
    // when the byte representation is re-serialized.
    #[test]
    fn json_body_semantic_roundtrip(
        keys in prop::collection::vec("[a-z]{1,8}", 1..5),
        numbers in prop::collection::vec(any::<i32>(), 1..5)
    ) {
        let mut object = serde_json::Map::new();
        for (key, number) in keys.iter().zip(&numbers) {
            object.insert(key.clone(), Value::from(*number));
        }
        let body = Value::Object(object);
        let request = RequestContext::new("POST", "/doc")
            .with_body("application/json", serde_json::to_vec(&body).unwrap());

        let codec = JsonCodec;
        let frame = codec.encode_request(&request).unwrap();
        let decoded = codec.decode_request(&frame.payload).unwrap().unwrap();

        let reparsed: Value = serde_json::from_slice(&decoded.content).unwrap();
        prop_assert_eq!(reparsed, body);
    }
}

// A deliberately large deterministic round-trip outside proptest's sizes.
#[test]
fn frame_roundtrip_ten_megabytes() {
    let mut state = 0x2545F491u32;
    let payload: Vec<u8> = (0..10 * 1024 * 1024)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect();

    let frame = Frame::binary(payload.clone());
    let wire = frame.encode(Some([0xde, 0xad, 0xbe, 0xef]));
    let (parsed, consumed) = Frame::parse(&wire).unwrap();
    assert_eq!(consumed, wire.len());
    assert_eq!(parsed.payload, payload);
}
