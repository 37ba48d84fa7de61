//! HTTP/2 protocol-flood engine.
//!
//! Clients here establish perfectly well-formed TLS+h2 connections and then
//! emit frame sequences chosen to make the server allocate state, buffer
//! data, or burn CPU without the request ever finishing: CONTINUATION
//! floods, zero-window body trapping, control-frame floods, and the
//! rapid-reset family. Frames are syntactically strict RFC 9113; only the
//! sequences are hostile.
//!
//! Layering, leaves first: [`transport`] dials TLS with h2 ALPN and keeps a
//! handle on the raw socket for abortive close; [`conn`] wraps a stream in
//! typed frame writers and a frame reader; [`scenario`] holds one routine
//! per flood pattern; [`driver`] fans scenario runs out across workers and
//! exits the process when the planned total is reached. [`rate_check`] is a
//! separate fully-parallel probe for connection-rate limits.

pub mod conn;
pub mod dict;
pub mod driver;
pub mod rate_check;
pub mod scenario;
pub mod transport;

pub use conn::Conn;
pub use dict::HeaderDict;
pub use scenario::{CtrlFrameKind, Params, RapidResetKind, Scenario};
pub use transport::{CloseMode, Dialer, Target};
