mod helpers;

use helpers::{decode_block, parse_frames, strip_preface};
use squall::scenario::zero_window;
use squall::Conn;
use squall_h2_parse::{
    nom::Finish, parse_setting_pairs, Frame, FrameType, HeadersFlags, SettingsFlags, StreamId,
};
use tokio::io::AsyncWriteExt;

fn frame_bytes(frame: Frame, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    frame
        .with_len(payload.len() as u32)
        .write_into(&mut buf)
        .unwrap();
    buf.extend_from_slice(payload);
    buf
}

#[tokio::test]
async fn request_parks_after_response_headers() {
    let (client, mut server) = tokio::io::duplex(65536);

    let client_task = tokio::spawn(async move {
        let mut conn = Conn::new(0, client);
        zero_window::request_and_park(&mut conn).await.unwrap();
        // scenario done: the response body is now trapped server-side
    });

    // the two expected initial frames: our peer's SETTINGS, then its ACK
    server
        .write_all(&frame_bytes(
            Frame::new(
                FrameType::Settings(Default::default()),
                StreamId::CONNECTION,
            ),
            &[],
        ))
        .await
        .unwrap();
    server
        .write_all(&frame_bytes(
            Frame::new(
                FrameType::Settings(SettingsFlags::Ack.into()),
                StreamId::CONNECTION,
            ),
            &[],
        ))
        .await
        .unwrap();

    // a stray WINDOW_UPDATE must be drained, then the response HEADERS with
    // END_HEADERS releases the scenario
    server
        .write_all(&frame_bytes(
            Frame::new(FrameType::WindowUpdate, StreamId::CONNECTION),
            &[0, 0, 0, 1],
        ))
        .await
        .unwrap();
    server
        .write_all(&frame_bytes(
            Frame::new(
                FrameType::Headers(HeadersFlags::EndHeaders.into()),
                StreamId(1),
            ),
            &[0x88], // :status: 200, statically indexed
        ))
        .await
        .unwrap();

    client_task.await.unwrap();

    let mut bytes = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut server, &mut bytes)
        .await
        .unwrap();

    let frames = parse_frames(strip_preface(&bytes));
    assert_eq!(frames.len(), 2);

    // SETTINGS advertising a zero window
    let (settings, payload) = &frames[0];
    assert!(matches!(settings.frame_type, FrameType::Settings(_)));
    let (_, pairs) = parse_setting_pairs(payload).finish().unwrap();
    assert!(pairs.contains(&(0x04, 0)), "INITIAL_WINDOW_SIZE must be zero");

    // one fully-closed request on stream 1, authority pinned to localhost
    let (headers, block) = &frames[1];
    assert_eq!(headers.stream_id, StreamId(1));
    match headers.frame_type {
        FrameType::Headers(flags) => {
            assert!(flags.contains(HeadersFlags::EndStream));
            assert!(flags.contains(HeadersFlags::EndHeaders));
        }
        ref other => panic!("expected HEADERS, got {other:?}"),
    }
    let fields = decode_block(block);
    let names: Vec<_> = fields.iter().map(|(n, _)| n.as_slice()).collect();
    assert_eq!(
        names,
        [b":method".as_slice(), b":path", b":scheme", b":authority"]
    );
    assert_eq!(fields[3].1, b"localhost");
}

#[tokio::test]
async fn request_fails_cleanly_when_peer_hangs_up_early() {
    let (client, server) = tokio::io::duplex(65536);

    let client_task = tokio::spawn(async move {
        let mut conn = Conn::new(0, client);
        zero_window::request_and_park(&mut conn).await
    });

    // peer disappears before the settings exchange completes
    drop(server);

    let res = client_task.await.unwrap();
    assert!(res.is_err());
}
