//! TLS dial with h2 ALPN and raw-socket access for abortive close.
//!
//! The TCP socket's file descriptor is captured before the stream is handed
//! to rustls, so the linger knob stays reachable underneath the TLS session
//! for the close-flood scenarios.

use std::{
    net::SocketAddr,
    os::fd::{AsRawFd, BorrowedFd, RawFd},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use eyre::eyre;
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, SignatureScheme,
};
use socket2::SockRef;
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

/// Covers TCP connect and TLS handshake together.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Server endpoint plus the name used for SNI.
#[derive(Debug, Clone)]
pub struct Target {
    pub address: String,
    pub server_name: String,
}

impl Target {
    /// Resolve the address, preferring IPv4 addresses but taking what we
    /// can get.
    pub fn resolve(&self) -> eyre::Result<SocketAddr> {
        use std::net::ToSocketAddrs;
        let addrs: Vec<_> = self.address.to_socket_addrs()?.collect();
        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .cloned()
            .ok_or_else(|| eyre!("failed to resolve address: {}", self.address))
    }
}

/// How to tear a connection down at the socket level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Plain close: the kernel sends FIN. No TLS close_notify is sent.
    Fin,
    /// `SO_LINGER {onoff=1, linger=0}` then close: the kernel sends RST.
    Rst,
}

impl FromStr for CloseMode {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FIN" => Ok(CloseMode::Fin),
            "RST" => Ok(CloseMode::Rst),
            other => Err(eyre!("unknown close type: {other}")),
        }
    }
}

/// Raw-socket handle captured before the TLS wrap.
///
/// This is a plain fd, not an owner: the fd belongs to the `TcpStream` inside
/// the TLS session, and is only valid while that stream is alive.
#[derive(Debug, Clone, Copy)]
pub struct RawSock {
    fd: RawFd,
}

impl RawSock {
    pub fn from_stream(stream: &TcpStream) -> Self {
        Self {
            fd: stream.as_raw_fd(),
        }
    }

    /// Arm the socket so that the upcoming close emits a TCP RST instead of
    /// a FIN. Fails (without panicking) if the socket is already closed.
    pub fn linger_reset(&self) -> std::io::Result<()> {
        // the fd is borrowed from the TLS stream, which the caller keeps
        // alive until after this returns
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd) };
        SockRef::from(&fd).set_linger(Some(Duration::from_secs(0)))
    }
}

/// Accepts whatever certificate the server presents. These clients point at
/// lab targets with self-signed chains; identity is not the thing under test.
#[derive(Debug)]
struct NoVerification(CryptoProvider);

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

pub struct Dialer {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    target: Target,
}

impl Dialer {
    /// Build the client config once; `alpn_h2` advertises exactly `["h2"]`.
    pub fn new(target: &Target, alpn_h2: bool) -> eyre::Result<Self> {
        let provider = rustls::crypto::ring::default_provider();
        let mut config = ClientConfig::builder_with_provider(provider.clone().into())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification(provider)))
            .with_no_client_auth();
        if alpn_h2 {
            config.alpn_protocols = vec![b"h2".to_vec()];
        }

        let server_name = ServerName::try_from(target.server_name.clone())?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
            target: target.clone(),
        })
    }

    /// TCP connect + TLS handshake under [`DIAL_TIMEOUT`]. The address is
    /// re-resolved per dial; a resolution failure is a dial failure, not a
    /// startup error. The returned [`RawSock`] reaches the socket beneath
    /// the TLS session.
    pub async fn dial(&self) -> eyre::Result<(TlsStream<TcpStream>, RawSock)> {
        let addr = self.target.resolve()?;
        let dial = async {
            let tcp = TcpStream::connect(addr).await?;
            let sock = RawSock::from_stream(&tcp);
            let tls = self.connector.connect(self.server_name.clone(), tcp).await?;
            Ok::<_, std::io::Error>((tls, sock))
        };
        let (tls, sock) = tokio::time::timeout(DIAL_TIMEOUT, dial)
            .await
            .map_err(|_| eyre!("dial timed out after {DIAL_TIMEOUT:?}"))??;
        Ok((tls, sock))
    }
}
