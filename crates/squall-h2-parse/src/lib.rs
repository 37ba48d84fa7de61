//! HTTP/2 frame-level codec.
//!
//! Typed frame headers and control-frame payloads with nom-based parsing and
//! `io::Write`-based serialisation. This layer is strictly syntactic: it
//! produces and consumes RFC 9113 wire format and knows nothing about stream
//! states or header-block semantics.
//!
//! Layouts follow RFC 9113 <https://httpwg.org/specs/rfc9113.html>.

use std::fmt;

use enum_repr::EnumRepr;
pub use enumflags2::{bitflags, BitFlags};
pub use nom;

use byteorder::{BigEndian, WriteBytesExt};
use nom::{
    combinator::map,
    number::complete::{be_u16, be_u24, be_u32, be_u8},
    sequence::tuple,
    IResult,
};

/// The 24-octet connection preface a client sends before its first frame,
/// `PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n` (RFC 9113 §3.4). It deliberately parses
/// as a malformed HTTP/1 request so that a speaker of the wrong protocol
/// fails fast.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Every frame starts with a 9-octet header: a 24-bit payload length, one
/// type octet, one flags octet, then a reserved bit and a 31-bit stream id
/// (RFC 9113 §4.1).
pub const FRAME_HEADER_LEN: usize = 9;

/// Frame type octet values from RFC 9113 §6.
#[EnumRepr(type = "u8")]
#[derive(Debug, Clone, Copy)]
pub enum RawFrameType {
    Data = 0x00,
    Headers = 0x01,
    Priority = 0x02,
    RstStream = 0x03,
    Settings = 0x04,
    PushPromise = 0x05,
    Ping = 0x06,
    GoAway = 0x07,
    WindowUpdate = 0x08,
    Continuation = 0x09,
}

/// A frame type with its flags octet decoded into the flags that type
/// actually defines. Frame types this crate does not recognise keep their
/// raw wire bytes in [`FrameType::Unknown`].
#[derive(Debug, Clone, Copy)]
pub enum FrameType {
    Data(BitFlags<DataFlags>),
    Headers(BitFlags<HeadersFlags>),
    Priority,
    RstStream,
    Settings(BitFlags<SettingsFlags>),
    PushPromise,
    Ping(BitFlags<PingFlags>),
    GoAway,
    WindowUpdate,
    Continuation(BitFlags<ContinuationFlags>),
    Unknown(EncodedFrameType),
}

/// DATA defines END_STREAM (0x01) and PADDED (0x08); RFC 9113 §6.1.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataFlags {
    EndStream = 0x01,
    Padded = 0x08,
}

/// HEADERS defines END_STREAM (0x01), END_HEADERS (0x04), PADDED (0x08) and
/// PRIORITY (0x20); RFC 9113 §6.2. Without END_HEADERS the header block
/// continues in CONTINUATION frames; without END_STREAM the request stays
/// open after the block.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeadersFlags {
    EndStream = 0x01,
    EndHeaders = 0x04,
    Padded = 0x08,
    Priority = 0x20,
}

/// SETTINGS defines only ACK (0x01); RFC 9113 §6.5. An ACK carries an empty
/// payload.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettingsFlags {
    Ack = 0x01,
}

/// PING defines only ACK (0x01); RFC 9113 §6.7.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PingFlags {
    Ack = 0x01,
}

/// CONTINUATION defines only END_HEADERS (0x04); RFC 9113 §6.10. A header
/// block ends at the first CONTINUATION that sets it.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContinuationFlags {
    EndHeaders = 0x04,
}

/// The type and flags octets exactly as they appear on the wire. Only used
/// directly for frame types without a [`FrameType`] variant.
#[derive(Debug, Clone, Copy)]
pub struct EncodedFrameType {
    pub ty: u8,
    pub flags: u8,
}

impl FrameType {
    fn from_wire(wire: EncodedFrameType) -> Self {
        let Some(ty) = RawFrameType::from_repr(wire.ty) else {
            return Self::Unknown(wire);
        };
        // flag bits a type does not define are dropped here; RFC 9113 §4.1
        // requires receivers to ignore them
        match ty {
            RawFrameType::Data => Self::Data(BitFlags::from_bits_truncate(wire.flags)),
            RawFrameType::Headers => Self::Headers(BitFlags::from_bits_truncate(wire.flags)),
            RawFrameType::Priority => Self::Priority,
            RawFrameType::RstStream => Self::RstStream,
            RawFrameType::Settings => Self::Settings(BitFlags::from_bits_truncate(wire.flags)),
            RawFrameType::PushPromise => Self::PushPromise,
            RawFrameType::Ping => Self::Ping(BitFlags::from_bits_truncate(wire.flags)),
            RawFrameType::GoAway => Self::GoAway,
            RawFrameType::WindowUpdate => Self::WindowUpdate,
            RawFrameType::Continuation => {
                Self::Continuation(BitFlags::from_bits_truncate(wire.flags))
            }
        }
    }

    fn to_wire(self) -> EncodedFrameType {
        let (ty, flags) = match self {
            Self::Data(f) => (RawFrameType::Data, f.bits()),
            Self::Headers(f) => (RawFrameType::Headers, f.bits()),
            Self::Priority => (RawFrameType::Priority, 0),
            Self::RstStream => (RawFrameType::RstStream, 0),
            Self::Settings(f) => (RawFrameType::Settings, f.bits()),
            Self::PushPromise => (RawFrameType::PushPromise, 0),
            Self::Ping(f) => (RawFrameType::Ping, f.bits()),
            Self::GoAway => (RawFrameType::GoAway, 0),
            Self::WindowUpdate => (RawFrameType::WindowUpdate, 0),
            Self::Continuation(f) => (RawFrameType::Continuation, f.bits()),
            Self::Unknown(wire) => return wire,
        };
        EncodedFrameType {
            ty: ty.repr(),
            flags,
        }
    }

    /// Wrap this frame type into a zero-length [Frame] on the given stream.
    pub fn into_frame(self, stream_id: StreamId) -> Frame {
        Frame::new(self, stream_id)
    }
}

/// A 31-bit stream identifier. Stream 0 addresses the connection itself;
/// client-initiated streams are odd, server-initiated ones even
/// (RFC 9113 §5.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Stream ID used for connection control frames
    pub const CONNECTION: Self = Self(0);
}

#[derive(Debug, thiserror::Error)]
#[error("invalid stream id: {0}")]
pub struct StreamIdOutOfRange(u32);

impl TryFrom<u32> for StreamId {
    type Error = StreamIdOutOfRange;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        // bit 31 is the reserved bit of the wire encoding, never part of
        // the id
        if value & 0x8000_0000 != 0 {
            Err(StreamIdOutOfRange(value))
        } else {
            Ok(Self(value))
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A decoded 9-octet frame header (RFC 9113 §4.1). `len` describes the
/// payload that follows; the payload itself is carried separately.
pub struct Frame {
    pub frame_type: FrameType,
    pub reserved: u8,
    pub stream_id: StreamId,
    pub len: u32,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn with_flags<T>(
            f: &mut fmt::Formatter<'_>,
            name: &str,
            flags: &BitFlags<T>,
        ) -> fmt::Result
        where
            T: enumflags2::BitFlag + fmt::Debug,
        {
            f.write_str(name)?;
            if !flags.is_empty() {
                write!(f, "({flags})")?;
            }
            Ok(())
        }

        match self.stream_id {
            StreamId::CONNECTION => write!(f, "Conn:")?,
            StreamId(id) => write!(f, "#{id}:")?,
        }

        match &self.frame_type {
            FrameType::Data(flags) => with_flags(f, "Data", flags)?,
            FrameType::Headers(flags) => with_flags(f, "Headers", flags)?,
            FrameType::Priority => f.write_str("Priority")?,
            FrameType::RstStream => f.write_str("RstStream")?,
            FrameType::Settings(flags) => with_flags(f, "Settings", flags)?,
            FrameType::PushPromise => f.write_str("PushPromise")?,
            FrameType::Ping(flags) => with_flags(f, "Ping", flags)?,
            FrameType::GoAway => f.write_str("GoAway")?,
            FrameType::WindowUpdate => f.write_str("WindowUpdate")?,
            FrameType::Continuation(flags) => with_flags(f, "Continuation", flags)?,
            FrameType::Unknown(EncodedFrameType { ty, flags }) => {
                write!(f, "Unknown(type={ty:#04x}, flags={flags:#04x})")?
            }
        }

        if self.len > 0 {
            write!(f, " len={}", self.len)?;
        }
        if self.reserved != 0 {
            write!(f, " reserved")?;
        }
        Ok(())
    }
}

impl Frame {
    /// Create a new frame with the given type and stream ID.
    pub fn new(frame_type: FrameType, stream_id: StreamId) -> Self {
        Self {
            frame_type,
            reserved: 0,
            stream_id,
            len: 0,
        }
    }

    /// Set the frame's length.
    pub fn with_len(mut self, len: u32) -> Self {
        self.len = len;
        self
    }

    /// Is the ACK flag set? (only meaningful for SETTINGS and PING)
    pub fn is_ack(&self) -> bool {
        match self.frame_type {
            FrameType::Settings(flags) => flags.contains(SettingsFlags::Ack),
            FrameType::Ping(flags) => flags.contains(PingFlags::Ack),
            _ => false,
        }
    }

    /// Does this frame end the header block it starts or continues?
    pub fn is_end_headers(&self) -> bool {
        match self.frame_type {
            FrameType::Headers(flags) => flags.contains(HeadersFlags::EndHeaders),
            FrameType::Continuation(flags) => flags.contains(ContinuationFlags::EndHeaders),
            _ => false,
        }
    }

    /// Parse a frame header from the given slice
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (len, ty, flags, word)) = tuple((be_u24, be_u8, be_u8, be_u32))(i)?;
        let (reserved, stream_id) = split_reserved_bit(word);

        let frame = Frame {
            frame_type: FrameType::from_wire(EncodedFrameType { ty, flags }),
            reserved,
            stream_id: StreamId(stream_id),
            len,
        };
        Ok((i, frame))
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        w.write_u24::<BigEndian>(self.len as _)?;
        let wire = self.frame_type.to_wire();
        w.write_u8(wire.ty)?;
        w.write_u8(wire.flags)?;
        // the reserved bit goes out as zero, as §4.1 requires of senders
        w.write_u32::<BigEndian>(self.stream_id.0 & 0x7fff_ffff)?;
        Ok(())
    }
}

/// Several payloads carry a reserved bit in front of a 31-bit value (frame
/// headers, PRIORITY dependencies, WINDOW_UPDATE increments, GOAWAY last
/// stream ids). Receivers must tolerate the bit being set, so it is split
/// off rather than rejected.
fn split_reserved_bit(word: u32) -> (u8, u32) {
    ((word >> 31) as u8, word & 0x7fff_ffff)
}

/// A PRIORITY payload, also embedded in HEADERS when the PRIORITY flag is
/// set: exclusive bit, 31-bit dependency stream, one weight octet encoding
/// 1-256 as 0-255 (RFC 9113 §6.3).
#[derive(Debug, Clone, Copy)]
pub struct PrioritySpec {
    pub exclusive: bool,
    pub stream_dependency: StreamId,
    pub weight: u8,
}

impl PrioritySpec {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(tuple((be_u32, be_u8)), |(word, weight)| {
            let (exclusive, dep) = split_reserved_bit(word);
            Self {
                exclusive: exclusive != 0,
                stream_dependency: StreamId(dep),
                weight,
            }
        })(i)
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        let mut word = self.stream_dependency.0 & 0x7fff_ffff;
        if self.exclusive {
            word |= 1 << 31;
        }
        w.write_u32::<BigEndian>(word)?;
        w.write_u8(self.weight)?;
        Ok(())
    }
}

/// A 32-bit error code as carried by RST_STREAM and GOAWAY. Codes outside
/// [`KnownErrorCode`] are legal on the wire and kept as-is.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub fn as_repr(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match KnownErrorCode::from_repr(self.0) {
            Some(e) => fmt::Debug::fmt(&e, f),
            None => write!(f, "ErrorCode(0x{:02x})", self.0),
        }
    }
}

impl From<KnownErrorCode> for ErrorCode {
    fn from(e: KnownErrorCode) -> Self {
        Self(e as u32)
    }
}

/// The error codes RFC 9113 §7 defines.
#[EnumRepr(type = "u32")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownErrorCode {
    NoError = 0x00,
    ProtocolError = 0x01,
    InternalError = 0x02,
    FlowControlError = 0x03,
    SettingsTimeout = 0x04,
    StreamClosed = 0x05,
    FrameSizeError = 0x06,
    RefusedStream = 0x07,
    Cancel = 0x08,
    CompressionError = 0x09,
    ConnectError = 0x0a,
    EnhanceYourCalm = 0x0b,
    InadequateSecurity = 0x0c,
    Http1_1Required = 0x0d,
}

impl TryFrom<ErrorCode> for KnownErrorCode {
    type Error = ();

    fn try_from(e: ErrorCode) -> Result<Self, Self::Error> {
        KnownErrorCode::from_repr(e.0).ok_or(())
    }
}

/// An RST_STREAM payload: just the error code (RFC 9113 §6.4).
#[derive(Debug, Clone, Copy)]
pub struct RstStream {
    pub error_code: ErrorCode,
}

impl RstStream {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(be_u32, |code| Self {
            error_code: ErrorCode(code),
        })(i)
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        w.write_u32::<BigEndian>(self.error_code.0)
    }
}

/// A GOAWAY payload: highest peer stream id the sender may have processed,
/// plus an error code (RFC 9113 §6.8). Trailing debug data is left in the
/// parser's remainder.
#[derive(Debug, Clone, Copy)]
pub struct GoAway {
    pub last_stream_id: StreamId,
    pub error_code: ErrorCode,
}

impl GoAway {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(tuple((be_u32, be_u32)), |(word, code)| {
            let (_reserved, last_stream_id) = split_reserved_bit(word);
            Self {
                last_stream_id: StreamId(last_stream_id),
                error_code: ErrorCode(code),
            }
        })(i)
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        w.write_u32::<BigEndian>(self.last_stream_id.0 & 0x7fff_ffff)?;
        w.write_u32::<BigEndian>(self.error_code.0)
    }
}

/// A WINDOW_UPDATE payload: a 31-bit flow-control credit behind a reserved
/// bit (RFC 9113 §6.9). An increment of 0, or one that overflows the
/// receiver's 2^31-1 window, is an error on the receiving side; the encoder
/// lets both through.
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdate {
    pub reserved: u8,
    pub increment: u32,
}

impl WindowUpdate {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(be_u32, |word| {
            let (reserved, increment) = split_reserved_bit(word);
            Self {
                reserved,
                increment,
            }
        })(i)
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        w.write_u32::<BigEndian>(self.increment & 0x7fff_ffff)
    }
}

/// Setting identifiers from RFC 9113 §6.5.2.
#[EnumRepr(type = "u16")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    HeaderTableSize = 0x01,
    EnablePush = 0x02,
    MaxConcurrentStreams = 0x03,
    InitialWindowSize = 0x04,
    MaxFrameSize = 0x05,
    MaxHeaderListSize = 0x06,
}

/// An ordered list of SETTINGS entries, written verbatim: the encoder does
/// not deduplicate, validate or reorder, which lets callers shape SETTINGS
/// payloads entry by entry.
#[derive(Debug, Clone, Copy)]
pub struct SettingPairs<'a>(pub &'a [(Setting, u32)]);

impl<'a> From<&'a [(Setting, u32)]> for SettingPairs<'a> {
    fn from(value: &'a [(Setting, u32)]) -> Self {
        Self(value)
    }
}

impl SettingPairs<'_> {
    /// Each entry is a 16-bit identifier and a 32-bit value.
    pub fn wire_len(&self) -> usize {
        self.0.len() * 6
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        for (id, value) in self.0.iter() {
            w.write_u16::<BigEndian>(id.repr())?;
            w.write_u32::<BigEndian>(*value)?;
        }
        Ok(())
    }
}

/// Parse a SETTINGS payload into raw (identifier, value) pairs, unknown
/// identifiers included.
pub fn parse_setting_pairs(mut i: &[u8]) -> IResult<&[u8], Vec<(u16, u32)>> {
    let mut pairs = Vec::with_capacity(i.len() / 6);
    while !i.is_empty() {
        let (rest, pair) = tuple((be_u16, be_u32))(i)?;
        tracing::trace!(id = %pair.0, value = %pair.1, "got setting pair");
        pairs.push(pair);
        i = rest;
    }
    Ok((i, pairs))
}
