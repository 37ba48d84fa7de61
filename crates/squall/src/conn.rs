//! Framer facade: typed frame writers over one half of a byte stream, and a
//! frame reader for the other half.
//!
//! A connection has exactly one writer (the scenario body) and at most one
//! reader (either inline [`Conn::read_frame`] calls or the background drain
//! task spawned by [`Conn::spawn_reader`]). Every write serialises the frame
//! header and payload into a single buffer and issues one `write_all`, so a
//! HEADERS frame and its CONTINUATIONs are never interleaved with frames of
//! another stream.

use eyre::eyre;
use squall_h2_parse::{
    nom::Finish, BitFlags, ContinuationFlags, ErrorCode, Frame, FrameType, GoAway, HeadersFlags,
    PingFlags, PrioritySpec, RstStream, SettingPairs, StreamId, WindowUpdate, FRAME_HEADER_LEN,
    PREFACE,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, info, trace};

pub struct Conn<IO> {
    w: WriteHalf<IO>,
    r: Option<ReadHalf<IO>>,
    cid: usize,
    scratch: Vec<u8>,
}

impl<IO: AsyncRead + AsyncWrite + Send + 'static> Conn<IO> {
    pub fn new(cid: usize, io: IO) -> Self {
        let (r, w) = tokio::io::split(io);
        Self {
            w,
            r: Some(r),
            cid,
            scratch: Vec::with_capacity(16384),
        }
    }

    /// Emits the 24-byte client preface. This must be the first payload on
    /// the connection, before the initial SETTINGS.
    pub async fn write_preface(&mut self) -> eyre::Result<()> {
        self.w.write_all(PREFACE).await?;
        self.w.flush().await?;
        Ok(())
    }

    async fn write_frame(&mut self, frame: Frame, payload: &[u8]) -> eyre::Result<()> {
        let frame = frame.with_len(payload.len().try_into()?);
        trace!(cid = self.cid, "> {frame:?}");

        self.scratch.clear();
        frame.write_into(&mut self.scratch)?;
        self.scratch.extend_from_slice(payload);
        self.w.write_all(&self.scratch).await?;
        self.w.flush().await?;
        Ok(())
    }

    pub async fn write_settings(&mut self, settings: SettingPairs<'_>) -> eyre::Result<()> {
        let mut payload = Vec::with_capacity(settings.wire_len());
        settings.write_into(&mut payload)?;
        self.write_frame(
            FrameType::Settings(Default::default()).into_frame(StreamId::CONNECTION),
            &payload,
        )
        .await
    }

    pub async fn write_headers(
        &mut self,
        stream_id: StreamId,
        flags: impl Into<BitFlags<HeadersFlags>>,
        block_fragment: &[u8],
    ) -> eyre::Result<()> {
        let frame = Frame::new(FrameType::Headers(flags.into()), stream_id);
        self.write_frame(frame, block_fragment).await
    }

    /// HEADERS with an attached priority field: the PRIORITY flag is forced
    /// on and the dependency block precedes the header block fragment.
    pub async fn write_headers_with_priority(
        &mut self,
        stream_id: StreamId,
        flags: impl Into<BitFlags<HeadersFlags>>,
        priority_spec: PrioritySpec,
        block_fragment: &[u8],
    ) -> eyre::Result<()> {
        let flags = flags.into() | HeadersFlags::Priority;
        let mut payload = Vec::with_capacity(5 + block_fragment.len());
        priority_spec.write_into(&mut payload)?;
        payload.extend_from_slice(block_fragment);
        let frame = Frame::new(FrameType::Headers(flags), stream_id);
        self.write_frame(frame, &payload).await
    }

    pub async fn write_continuation(
        &mut self,
        stream_id: StreamId,
        flags: impl Into<BitFlags<ContinuationFlags>>,
        block_fragment: &[u8],
    ) -> eyre::Result<()> {
        let frame = Frame::new(FrameType::Continuation(flags.into()), stream_id);
        self.write_frame(frame, block_fragment).await
    }

    pub async fn write_ping(&mut self, ack: bool, payload: [u8; 8]) -> eyre::Result<()> {
        self.write_frame(
            FrameType::Ping(if ack {
                PingFlags::Ack.into()
            } else {
                Default::default()
            })
            .into_frame(StreamId::CONNECTION),
            &payload,
        )
        .await
    }

    pub async fn write_window_update(
        &mut self,
        stream_id: StreamId,
        increment: u32,
    ) -> eyre::Result<()> {
        let window_update = WindowUpdate {
            reserved: 0,
            increment,
        };
        let mut payload = Vec::with_capacity(4);
        window_update.write_into(&mut payload)?;
        self.write_frame(FrameType::WindowUpdate.into_frame(stream_id), &payload)
            .await
    }

    pub async fn write_priority(
        &mut self,
        stream_id: StreamId,
        priority_spec: PrioritySpec,
    ) -> eyre::Result<()> {
        let mut payload = Vec::with_capacity(5);
        priority_spec.write_into(&mut payload)?;
        self.write_frame(FrameType::Priority.into_frame(stream_id), &payload)
            .await
    }

    pub async fn write_rst_stream(
        &mut self,
        stream_id: StreamId,
        error_code: impl Into<ErrorCode>,
    ) -> eyre::Result<()> {
        let rst_stream = RstStream {
            error_code: error_code.into(),
        };
        let mut payload = Vec::with_capacity(4);
        rst_stream.write_into(&mut payload)?;
        self.write_frame(FrameType::RstStream.into_frame(stream_id), &payload)
            .await
    }

    /// Write pre-serialised frames in a single burst.
    pub async fn send(&mut self, buf: &[u8]) -> eyre::Result<()> {
        self.w.write_all(buf).await?;
        self.w.flush().await?;
        Ok(())
    }

    /// Read one frame (header + payload). `None` on clean EOF. Errors if the
    /// reader was already moved into a background task.
    pub async fn read_frame(&mut self) -> eyre::Result<Option<(Frame, Vec<u8>)>> {
        let r = self
            .r
            .as_mut()
            .ok_or_else(|| eyre!("frame reader already detached"))?;
        read_one(r, self.cid).await
    }

    /// Move the read half into a background task that drains inbound frames
    /// until EOF or error, logging GOAWAY error codes along the way. No-op if
    /// already spawned.
    pub fn spawn_reader(&mut self) {
        let mut r = match self.r.take() {
            Some(r) => r,
            None => return,
        };
        let cid = self.cid;
        tokio::spawn(async move {
            loop {
                match read_one(&mut r, cid).await {
                    Ok(Some(_)) => {}
                    Ok(None) => return,
                    Err(e) => {
                        debug!(cid, "read error: {e}");
                        return;
                    }
                }
            }
        });
    }
}

async fn read_one<R: AsyncRead + Unpin>(
    r: &mut R,
    cid: usize,
) -> eyre::Result<Option<(Frame, Vec<u8>)>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match r.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            trace!(cid, "reached EOF");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }

    let (_, frame) = Frame::parse(&header)
        .finish()
        .map_err(|e| eyre!("bad frame header: {e:?}"))?;

    let mut payload = vec![0u8; frame.len as usize];
    r.read_exact(&mut payload).await?;
    trace!(cid, "< {frame:?}");

    if matches!(frame.frame_type, FrameType::GoAway) {
        match GoAway::parse(&payload).finish() {
            Ok((_, goaway)) => info!(cid, "GOAWAY: {:?}", goaway.error_code),
            Err(e) => debug!(cid, "unparseable GOAWAY payload: {e:?}"),
        }
    }

    Ok(Some((frame, payload)))
}

/// HPACK-encode a header block with a fresh encoder: no dynamic-table state
/// survives across blocks, so every field goes on the wire in full.
pub fn encode_block(fields: &[(&[u8], &[u8])]) -> eyre::Result<Vec<u8>> {
    let mut enc = loona_hpack::Encoder::new();
    let mut fragment = Vec::new();
    for &(name, value) in fields {
        enc.encode_header_into((name, value), &mut fragment)?;
    }
    Ok(fragment)
}

/// Encode a request header block: the pseudo-headers, in order, and nothing
/// else. `:authority` is omitted when `None`.
pub fn request_block(
    method: &str,
    path: &str,
    scheme: &str,
    authority: Option<&str>,
) -> eyre::Result<Vec<u8>> {
    let mut fields: Vec<(&[u8], &[u8])> = vec![
        (&b":method"[..], method.as_bytes()),
        (&b":path"[..], path.as_bytes()),
        (&b":scheme"[..], scheme.as_bytes()),
    ];
    if let Some(authority) = authority {
        fields.push((&b":authority"[..], authority.as_bytes()));
    }
    encode_block(&fields)
}
