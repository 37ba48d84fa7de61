mod helpers;

use helpers::{capture, decode_block, parse_frames, strip_preface};
use squall::scenario::{
    continuation, ctrl_frames, initial_settings, rapid_reset, Params, TRANSPORT_DEFAULT_STREAM_FLOW,
};
use squall::{CtrlFrameKind, HeaderDict, RapidResetKind};
use squall_h2_parse::{
    nom::Finish, parse_setting_pairs, FrameType, HeadersFlags, KnownErrorCode, PrioritySpec,
    RstStream, SettingPairs, StreamId, WindowUpdate,
};

fn params(streams: u64, headers_count: usize, frame_count: usize, field_size: usize) -> Params {
    Params {
        authority: "tempesta-tech.com".into(),
        streams,
        headers_count,
        frame_count,
        connections: 1,
        dict: HeaderDict::generate(field_size).unwrap(),
    }
}

#[tokio::test]
async fn prologue_settings_profile() {
    let bytes = capture(|mut conn| async move {
        conn.write_preface().await.unwrap();
        conn.write_settings(SettingPairs(&initial_settings(TRANSPORT_DEFAULT_STREAM_FLOW)))
            .await
            .unwrap();
    })
    .await;

    let frames = parse_frames(strip_preface(&bytes));
    assert_eq!(frames.len(), 1);

    let (frame, payload) = &frames[0];
    assert!(matches!(frame.frame_type, FrameType::Settings(_)));
    assert!(!frame.is_ack());
    assert_eq!(frame.stream_id, StreamId::CONNECTION);

    let (_, pairs) = parse_setting_pairs(payload).finish().unwrap();
    assert_eq!(
        pairs,
        vec![
            (0x02, 0),              // ENABLE_PUSH off
            (0x04, 4 << 20),        // INITIAL_WINDOW_SIZE 4 MiB
            (0x05, (1 << 24) - 1),  // MAX_FRAME_SIZE
            (0x06, 10 << 20),       // MAX_HEADER_LIST_SIZE 10 MiB
            (0x01, 4096),           // HEADER_TABLE_SIZE
        ]
    );
}

#[tokio::test]
async fn continuation_flood_splits_the_block() {
    // 20 fields of 2 x 1000 bytes over a single stream: the estimated block
    // is 40000 bytes, so it spreads over floor(40000 / 16384) = 2
    // CONTINUATION frames of 10 fields each
    let p = params(1, 20, 0, 1000);
    let bytes = capture(|mut conn| async move {
        continuation::giant_header_block(&mut conn, &p).await.unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    assert_eq!(frames.len(), 3);

    let (headers, block) = &frames[0];
    assert_eq!(headers.stream_id, StreamId(1));
    match headers.frame_type {
        FrameType::Headers(flags) => {
            assert!(!flags.contains(HeadersFlags::EndStream), "the request must never end");
            assert!(!flags.contains(HeadersFlags::EndHeaders));
        }
        ref other => panic!("expected HEADERS, got {other:?}"),
    }

    // pseudo-headers only, in order
    let fields = decode_block(block);
    let names: Vec<_> = fields.iter().map(|(n, _)| n.as_slice()).collect();
    assert_eq!(names, [b":method".as_slice(), b":path", b":scheme", b":authority"]);
    assert_eq!(fields[0].1, b"POST");
    assert_eq!(fields[3].1, b"tempesta-tech.com");

    for (i, (frame, block)) in frames[1..].iter().enumerate() {
        let last = i == 1;
        assert_eq!(frame.stream_id, StreamId(1));
        match frame.frame_type {
            FrameType::Continuation(_) => {}
            ref other => panic!("expected CONTINUATION, got {other:?}"),
        }
        assert_eq!(
            frame.is_end_headers(),
            last,
            "only the final CONTINUATION carries END_HEADERS"
        );

        let fields = decode_block(block);
        assert_eq!(fields.len(), 10);
        for (name, value) in fields {
            assert_eq!(name.len(), 1000);
            assert_eq!(value.len(), 1000);
        }
    }
}

#[tokio::test]
async fn continuation_flood_small_block_clamps_to_one_frame() {
    // 5 fields of 2 x 64 bytes is far below one 16 KiB chunk
    let p = params(2, 5, 0, 64);
    let bytes = capture(|mut conn| async move {
        continuation::giant_header_block(&mut conn, &p).await.unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    // per stream: HEADERS + exactly one CONTINUATION
    assert_eq!(frames.len(), 4);

    let stream_ids: Vec<_> = frames.iter().map(|(f, _)| f.stream_id.0).collect();
    assert_eq!(stream_ids, [1, 1, 3, 3]);
    assert!(frames[1].0.is_end_headers());
    assert!(frames[3].0.is_end_headers());
}

#[tokio::test]
async fn ping_flood_payload_and_count() {
    let p = params(0, 0, 5, 16);
    let bytes = capture(|mut conn| async move {
        ctrl_frames::flood(&mut conn, CtrlFrameKind::Ping, &p).await.unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    assert_eq!(frames.len(), 5);
    for (frame, payload) in frames {
        assert!(matches!(frame.frame_type, FrameType::Ping(_)));
        assert!(!frame.is_ack());
        assert_eq!(frame.stream_id, StreamId::CONNECTION);
        assert_eq!(payload, [1, 2, 3, 4, 0, 0, 0, 0]);
    }
}

#[tokio::test]
async fn settings_flood_counts_up() {
    let p = params(0, 0, 3, 16);
    let bytes = capture(|mut conn| async move {
        ctrl_frames::flood(&mut conn, CtrlFrameKind::Settings, &p).await.unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    assert_eq!(frames.len(), 3);
    for (i, (frame, payload)) in frames.iter().enumerate() {
        assert!(matches!(frame.frame_type, FrameType::Settings(_)));
        let (_, pairs) = parse_setting_pairs(payload).finish().unwrap();
        // one MAX_CONCURRENT_STREAMS entry per frame, increasing from zero
        assert_eq!(pairs, vec![(0x03, i as u32)]);
    }
}

#[tokio::test]
async fn window_update_flood_on_the_connection() {
    let p = params(0, 0, 4, 16);
    let bytes = capture(|mut conn| async move {
        ctrl_frames::flood(&mut conn, CtrlFrameKind::WindowUpdate, &p).await.unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    assert_eq!(frames.len(), 4);
    for (frame, payload) in frames {
        assert!(matches!(frame.frame_type, FrameType::WindowUpdate));
        assert_eq!(frame.stream_id, StreamId::CONNECTION);
        let (_, wu) = WindowUpdate::parse(&payload).finish().unwrap();
        assert_eq!(wu.increment, 1);
    }
}

#[tokio::test]
async fn rapid_reset_rst_pairs_headers_with_resets() {
    let p = params(0, 0, 4, 16);
    let bytes = capture(|mut conn| async move {
        rapid_reset::flood(&mut conn, RapidResetKind::Rst, &p).await.unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    assert_eq!(frames.len(), 8);

    for (i, chunk) in frames.chunks(2).enumerate() {
        let expected_stream = StreamId(1 + 2 * i as u32);

        let (headers, _) = &chunk[0];
        assert!(matches!(headers.frame_type, FrameType::Headers(_)));
        assert_eq!(headers.stream_id, expected_stream);

        let (rst, payload) = &chunk[1];
        assert!(matches!(rst.frame_type, FrameType::RstStream));
        assert_eq!(rst.stream_id, expected_stream, "RST must match its HEADERS");
        let (_, rst_stream) = RstStream::parse(payload).finish().unwrap();
        assert_eq!(
            KnownErrorCode::try_from(rst_stream.error_code),
            Ok(KnownErrorCode::ProtocolError)
        );
    }
}

#[tokio::test]
async fn rapid_reset_batch_bursts_every_100_streams() {
    let p = params(0, 0, 100, 16);
    let bytes = capture(|mut conn| async move {
        rapid_reset::flood(&mut conn, RapidResetKind::Batch, &p).await.unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    // 100 HEADERS followed by one burst of 50 RST_STREAMs
    assert_eq!(frames.len(), 150);

    let headers: Vec<_> = frames
        .iter()
        .filter(|(f, _)| matches!(f.frame_type, FrameType::Headers(_)))
        .map(|(f, _)| f.stream_id.0)
        .collect();
    let expected: Vec<_> = (0..100u32).map(|i| 1 + 2 * i).collect();
    assert_eq!(headers, expected);

    let rsts: Vec<_> = frames
        .iter()
        .filter(|(f, _)| matches!(f.frame_type, FrameType::RstStream))
        .map(|(f, _)| f.stream_id.0)
        .collect();
    let expected: Vec<_> = (0..50u32).map(|i| 101 + 2 * i).collect();
    assert_eq!(rsts, expected);

    // the burst comes after the last HEADERS, in one run
    assert!(frames[..100]
        .iter()
        .all(|(f, _)| matches!(f.frame_type, FrameType::Headers(_))));
}

#[tokio::test]
async fn rapid_reset_batch_below_threshold_sends_no_resets() {
    let p = params(0, 0, 99, 16);
    let bytes = capture(|mut conn| async move {
        rapid_reset::flood(&mut conn, RapidResetKind::Batch, &p).await.unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    assert_eq!(frames.len(), 99);
    assert!(frames
        .iter()
        .all(|(f, _)| matches!(f.frame_type, FrameType::Headers(_))));
}

#[tokio::test]
async fn rapid_reset_incorrect_frame_type_doubles_headers() {
    let p = params(0, 0, 2, 16);
    let bytes = capture(|mut conn| async move {
        rapid_reset::flood(&mut conn, RapidResetKind::IncorrectFrameType, &p)
            .await
            .unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    // SETTINGS preamble before the first stream only, then two HEADERS per
    // stream
    assert_eq!(frames.len(), 5);

    let (settings, payload) = &frames[0];
    assert!(matches!(settings.frame_type, FrameType::Settings(_)));
    let (_, pairs) = parse_setting_pairs(payload).finish().unwrap();
    assert_eq!(pairs, vec![(0x04, 0)]);

    for (frame, _) in &frames[1..3] {
        assert_eq!(frame.stream_id, StreamId(1));
        match frame.frame_type {
            FrameType::Headers(flags) => {
                assert!(flags.contains(HeadersFlags::EndStream));
                assert!(flags.contains(HeadersFlags::EndHeaders));
            }
            ref other => panic!("expected HEADERS, got {other:?}"),
        }
    }
    for (frame, _) in &frames[3..5] {
        assert_eq!(frame.stream_id, StreamId(3));
        assert!(matches!(frame.frame_type, FrameType::Headers(_)));
    }
}

#[tokio::test]
async fn rapid_reset_incorrect_header_drops_authority() {
    let p = params(0, 0, 1, 16);
    let bytes = capture(|mut conn| async move {
        rapid_reset::flood(&mut conn, RapidResetKind::IncorrectHeader, &p)
            .await
            .unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    assert_eq!(frames.len(), 1);

    let (frame, block) = &frames[0];
    match frame.frame_type {
        FrameType::Headers(flags) => assert!(flags.contains(HeadersFlags::EndStream)),
        ref other => panic!("expected HEADERS, got {other:?}"),
    }
    let names: Vec<_> = decode_block(block).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, [b":method".to_vec(), b":path".to_vec(), b":scheme".to_vec()]);
}

#[tokio::test]
async fn rapid_reset_invalid_dependency_is_a_self_dependency() {
    let p = params(0, 0, 2, 16);
    let bytes = capture(|mut conn| async move {
        rapid_reset::flood(&mut conn, RapidResetKind::HeadersByInvalidDependency, &p)
            .await
            .unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    assert_eq!(frames.len(), 2);

    for (frame, payload) in frames {
        match frame.frame_type {
            FrameType::Headers(flags) => assert!(flags.contains(HeadersFlags::Priority)),
            ref other => panic!("expected HEADERS, got {other:?}"),
        }
        // the priority block leads the payload
        let (_, spec) = PrioritySpec::parse(&payload[..5]).finish().unwrap();
        assert_eq!(spec.stream_dependency, frame.stream_id);
    }
}

#[tokio::test]
async fn rapid_reset_window_update_overflows_the_stream() {
    let p = params(0, 0, 1, 16);
    let bytes = capture(|mut conn| async move {
        rapid_reset::flood(&mut conn, RapidResetKind::WindowUpdate, &p)
            .await
            .unwrap();
    })
    .await;

    let frames = parse_frames(&bytes);
    assert_eq!(frames.len(), 2);
    assert!(matches!(frames[0].0.frame_type, FrameType::Headers(_)));

    let (frame, payload) = &frames[1];
    assert!(matches!(frame.frame_type, FrameType::WindowUpdate));
    assert_eq!(frame.stream_id, StreamId(1));
    let (_, wu) = WindowUpdate::parse(payload).finish().unwrap();
    assert_eq!(wu.increment, (1 << 31) - 1);
}
