#![allow(dead_code)]

use std::future::Future;

use squall::Conn;
use squall_h2_parse::{nom::Finish, Frame, PREFACE};
use tokio::io::{AsyncReadExt, DuplexStream};

/// Run an emission routine against an in-memory peer and hand back every
/// byte it put on the wire.
pub async fn capture<F, Fut>(scenario: F) -> Vec<u8>
where
    F: FnOnce(Conn<DuplexStream>) -> Fut,
    Fut: Future<Output = ()>,
{
    let (client, mut server) = tokio::io::duplex(65536);

    let collector = tokio::spawn(async move {
        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        buf
    });

    let conn = Conn::new(0, client);
    scenario(conn).await;

    collector.await.unwrap()
}

/// Split a byte stream into (frame header, payload) pairs.
pub fn parse_frames(mut i: &[u8]) -> Vec<(Frame, Vec<u8>)> {
    let mut frames = Vec::new();
    while !i.is_empty() {
        let (rest, frame) = Frame::parse(i).finish().expect("valid frame header");
        let (payload, rest) = rest.split_at(frame.len as usize);
        frames.push((frame, payload.to_vec()));
        i = rest;
    }
    frames
}

/// Assert the stream opens with the 24-byte client preface and return what
/// follows it.
pub fn strip_preface(bytes: &[u8]) -> &[u8] {
    assert!(
        bytes.starts_with(PREFACE),
        "connection did not start with the h2 preface"
    );
    &bytes[PREFACE.len()..]
}

/// Decode one HPACK block fragment. Blocks are encoded with a fresh encoder
/// each, so a fresh decoder per fragment is correct here.
pub fn decode_block(fragment: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    loona_hpack::Decoder::new()
        .decode(fragment)
        .expect("valid hpack block")
}
