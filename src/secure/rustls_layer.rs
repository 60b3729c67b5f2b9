// rustls secure layer - sans-I/O TLS client driven over any Transport
//
// The session is pumped by hand (write_tls/read_tls) instead of through
// tokio-rustls so that every byte still passes through the wrapped
// Transport and its deadlines.

use super::{
    HandshakeLog, HeartbleedLog, SecureConfig, SecureConnector, SecureTransport, TlsVersion,
};
use crate::constants::TLS_READ_CHUNK;
use crate::error::SecureError;
use crate::transport::Transport;
use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;

/// Default secure-layer factory backed by rustls (ring provider)
#[derive(Debug, Clone, Copy, Default)]
pub struct RustlsConnector;

impl RustlsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl SecureConnector for RustlsConnector {
    fn client(&self, raw: Box<dyn Transport>, config: &SecureConfig) -> Box<dyn SecureTransport> {
        Box::new(RustlsTransport::new(raw, config))
    }
}

/// Build the rustls client configuration for a probing client
///
/// rustls implements nothing older than TLS 1.2, so any lower floor is
/// clamped to TLS 1.2.
pub fn client_config(config: &SecureConfig) -> Result<ClientConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let schemes = provider
        .signature_verification_algorithms
        .supported_schemes();

    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&protocol_versions(config.min_version))?;

    let mut client = if config.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier { schemes }))
            .with_no_client_auth()
    } else {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    client.alpn_protocols = config
        .alpn
        .iter()
        .map(|proto| proto.as_bytes().to_vec())
        .collect();

    Ok(client)
}

fn protocol_versions(min: TlsVersion) -> Vec<&'static rustls::SupportedProtocolVersion> {
    if min >= TlsVersion::Tls13 {
        vec![&rustls::version::TLS13]
    } else {
        vec![&rustls::version::TLS13, &rustls::version::TLS12]
    }
}

/// Pick the name presented to the server: configured SNI, else the peer IP
fn server_name(
    config: &SecureConfig,
    remote: Option<SocketAddr>,
) -> Result<ServerName<'static>, rustls::Error> {
    if let Some(name) = &config.server_name {
        return ServerName::try_from(name.clone())
            .map_err(|_| rustls::Error::General(format!("Invalid server name: {}", name)));
    }

    remote
        .map(|addr| ServerName::IpAddress(addr.ip().into()))
        .ok_or_else(|| rustls::Error::General("No server name or remote address".to_string()))
}

/// Drain every pending TLS record onto the wire
async fn flush_tls(session: &mut ClientConnection, wire: &mut dyn Transport) -> io::Result<()> {
    let mut out = Vec::new();
    while session.wants_write() {
        session.write_tls(&mut out)?;
    }
    if !out.is_empty() {
        wire.write(&out).await?;
    }
    Ok(())
}

/// Read one chunk from the wire into the session; returns 0 on EOF
async fn fill_tls(session: &mut ClientConnection, wire: &mut dyn Transport) -> Result<usize, SecureError> {
    let mut buf = vec![0u8; TLS_READ_CHUNK];
    let n = wire.read(&mut buf).await?;
    let mut data = &buf[..n];

    if n == 0 {
        session.read_tls(&mut data)?;
        return Ok(0);
    }

    while !data.is_empty() {
        session.read_tls(&mut data)?;
        if let Err(e) = session.process_new_packets() {
            // Deliver the alert rustls queued for the peer
            let _ = flush_tls(session, wire).await;
            return Err(e.into());
        }
    }

    Ok(n)
}

/// TLS client stream over a boxed raw transport
pub struct RustlsTransport {
    inner: Box<dyn Transport>,
    session: Result<ClientConnection, rustls::Error>,
    established: bool,
}

impl RustlsTransport {
    pub fn new(inner: Box<dyn Transport>, config: &SecureConfig) -> Self {
        let remote = inner.remote_addr();
        let session = client_config(config).and_then(|client| {
            ClientConnection::new(Arc::new(client), server_name(config, remote)?)
        });

        Self {
            inner,
            session,
            established: false,
        }
    }

    /// Session and raw stream, split for pumping; only once established
    fn established_parts(
        &mut self,
    ) -> Result<(&mut ClientConnection, &mut dyn Transport), SecureError> {
        if !self.established {
            return Err(SecureError::NotEstablished);
        }
        let session = self
            .session
            .as_mut()
            .map_err(|e| SecureError::Tls(e.clone()))?;
        Ok((session, self.inner.as_mut()))
    }
}

#[async_trait]
impl Transport for RustlsTransport {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (session, inner) = self.established_parts()?;

        loop {
            let result = session.reader().read(buf);
            match result {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    fill_tls(session, inner).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (session, inner) = self.established_parts()?;

        let mut written = 0;
        while written < buf.len() {
            let n = session.writer().write(&buf[written..])?;
            flush_tls(session, inner).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "TLS session refused plaintext",
                ));
            }
            written += n;
        }

        Ok(written)
    }

    async fn close(&mut self) -> io::Result<()> {
        let mut notified = Ok(());
        if self.established {
            if let Ok(session) = self.session.as_mut() {
                session.send_close_notify();
                notified = flush_tls(session, self.inner.as_mut()).await;
            }
        }
        let closed = self.inner.close().await;
        notified.and(closed)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr()
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.inner.set_read_deadline(deadline);
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.inner.set_write_deadline(deadline);
    }
}

#[async_trait]
impl SecureTransport for RustlsTransport {
    async fn handshake(&mut self) -> Result<(), SecureError> {
        let session = self
            .session
            .as_mut()
            .map_err(|e| SecureError::Tls(e.clone()))?;
        let inner = self.inner.as_mut();

        while session.is_handshaking() {
            flush_tls(session, inner).await?;
            if session.is_handshaking() && session.wants_read() && fill_tls(session, inner).await? == 0
            {
                return Err(SecureError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Connection closed during TLS handshake",
                )));
            }
        }
        flush_tls(session, inner).await?;

        tracing::debug!(
            "TLS handshake complete: {:?} {:?}",
            session.protocol_version(),
            session.negotiated_cipher_suite().map(|s| s.suite())
        );
        self.established = true;
        Ok(())
    }

    fn handshake_log(&self) -> HandshakeLog {
        let Ok(session) = self.session.as_ref() else {
            return HandshakeLog::default();
        };

        HandshakeLog {
            complete: self.established,
            version: session.protocol_version().map(|v| format!("{:?}", v)),
            cipher_suite: session
                .negotiated_cipher_suite()
                .map(|suite| format!("{:?}", suite.suite())),
            alpn_protocol: session
                .alpn_protocol()
                .map(|proto| String::from_utf8_lossy(proto).into_owned()),
            server_certificates: session
                .peer_certificates()
                .map(|certs| certs.iter().map(|cert| cert.as_ref().to_vec()).collect())
                .unwrap_or_default(),
        }
    }

    async fn check_heartbleed(&mut self, _payload: &[u8]) -> Result<usize, SecureError> {
        if !self.established {
            return Err(SecureError::NotEstablished);
        }
        Err(SecureError::HeartbeatUnsupported {
            details: "rustls does not negotiate the heartbeat extension".to_string(),
        })
    }

    fn heartbleed_log(&self) -> HeartbleedLog {
        HeartbleedLog::default()
    }
}

/// Accepts any server certificate; this client probes, it does not trust
#[derive(Debug)]
struct NoVerifier {
    schemes: Vec<SignatureScheme>,
}

impl ServerCertVerifier for NoVerifier {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}
