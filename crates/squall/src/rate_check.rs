//! Connection-rate probe: open many connections in parallel and count how
//! many the server tears down. Used to verify rate/burst limiting on the
//! other side rather than to exhaust it.
//!
//! Unlike the flood driver this spawns one task per connection. With a
//! non-zero `interval`, spawns are paced into 125 ms windows: after every
//! `interval` tasks, wait for the in-flight batch, then sleep whatever is
//! left of the window.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::transport::{Dialer, Target, DIAL_TIMEOUT};

/// Pacing window for batched spawning.
pub const WINDOW: Duration = Duration::from_millis(125);

/// How long to let a reset propagate before sampling the connection.
const SETTLE: Duration = Duration::from_secs(1);

pub struct RateCheckOpts {
    pub connections: usize,
    /// tasks per 125 ms window; 0 spawns everything at once
    pub interval: usize,
    /// TLS instead of plain TCP (no ALPN either way)
    pub tls: bool,
}

pub async fn run(opts: RateCheckOpts, target: &Target) -> eyre::Result<()> {
    info!("Starting {} parallel connections", opts.connections);

    let dialer = if opts.tls {
        Some(Arc::new(Dialer::new(target, false)?))
    } else {
        None
    };

    let errors = Arc::new(AtomicU64::new(0));
    let mut inflight = Vec::new();
    let mut window_start = Instant::now();

    for n in 0..opts.connections {
        let errors = errors.clone();
        let dialer = dialer.clone();
        let target = target.clone();
        inflight.push(tokio::spawn(connection(n, target, dialer, errors)));

        if opts.interval > 0 && (n + 1) % opts.interval == 0 {
            for handle in inflight.drain(..) {
                let _ = handle.await;
            }
            let elapsed = window_start.elapsed();
            if elapsed < WINDOW {
                tokio::time::sleep(WINDOW - elapsed).await;
            }
            window_start = Instant::now();
        }
    }

    for handle in inflight {
        let _ = handle.await;
    }

    info!(
        "Finished: {} Errors: {}",
        opts.connections,
        errors.load(Ordering::Acquire)
    );
    Ok(())
}

async fn connection(
    cid: usize,
    target: Target,
    dialer: Option<Arc<Dialer>>,
    errors: Arc<AtomicU64>,
) {
    enum Io {
        Tcp(TcpStream),
        Tls(tokio_rustls::client::TlsStream<TcpStream>),
    }

    let io = match &dialer {
        None => {
            let addr = match target.resolve() {
                Ok(addr) => addr,
                Err(e) => {
                    errors.fetch_add(1, Ordering::AcqRel);
                    debug!(cid, "resolve error: {e}");
                    return;
                }
            };
            match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => Io::Tcp(stream),
                Ok(Err(e)) => {
                    errors.fetch_add(1, Ordering::AcqRel);
                    debug!(cid, "connect error: {e}");
                    return;
                }
                Err(_) => {
                    errors.fetch_add(1, Ordering::AcqRel);
                    debug!(cid, "connect timed out");
                    return;
                }
            }
        }
        Some(dialer) => match dialer.dial().await {
            Ok((stream, _sock)) => Io::Tls(stream),
            Err(e) => {
                // a blocked TLS handshake lands here
                errors.fetch_add(1, Ordering::AcqRel);
                debug!(cid, "tls error: {e}");
                return;
            }
        },
    };

    // let a reset reach us before we sample the connection
    tokio::time::sleep(SETTLE).await;

    let mut buf = Vec::new();
    let read = match io {
        Io::Tcp(mut stream) => {
            tokio::time::timeout(SETTLE, stream.read_to_end(&mut buf)).await
        }
        Io::Tls(mut stream) => {
            tokio::time::timeout(SETTLE, stream.read_to_end(&mut buf)).await
        }
    };

    match read {
        // still open after the deadline: the server kept us
        Err(_elapsed) => {}
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            errors.fetch_add(1, Ordering::AcqRel);
            debug!(cid, "read error: {e}");
        }
    }
}
