// Secure layer - capability traits, configuration and handshake/probe summaries

pub mod heartbeat;
pub mod rustls_layer;

pub use heartbeat::{HeartbeatConnector, HeartbeatTransport};
pub use rustls_layer::{RustlsConnector, RustlsTransport};

use crate::error::SecureError;
use crate::output::bytes;
use crate::transport::Transport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// TLS/SSL protocol version floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "SSLv3")]
    Ssl30,
    #[serde(rename = "TLSv1.0")]
    Tls10,
    #[serde(rename = "TLSv1.1")]
    Tls11,
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

impl TlsVersion {
    pub fn name(&self) -> &'static str {
        match self {
            TlsVersion::Ssl30 => "SSLv3",
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Client context for the secure layer
///
/// The defaults describe a probing client: peer identity is never verified
/// and the broadest legacy version floor is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureConfig {
    /// Skip certificate and hostname verification
    pub insecure_skip_verify: bool,
    /// Lowest protocol version the client may negotiate
    pub min_version: TlsVersion,
    /// SNI / certificate name; the remote IP is used when absent
    pub server_name: Option<String>,
    /// ALPN protocols to offer
    pub alpn: Vec<String>,
}

impl Default for SecureConfig {
    fn default() -> Self {
        Self {
            insecure_skip_verify: true,
            min_version: TlsVersion::Ssl30,
            server_name: None,
            alpn: Vec::new(),
        }
    }
}

/// Negotiated parameters of a handshake attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeLog {
    /// Whether the handshake ran to completion
    pub complete: bool,
    pub version: Option<String>,
    pub cipher_suite: Option<String>,
    pub alpn_protocol: Option<String>,
    /// Server certificate chain, leaf first (DER)
    #[serde(with = "bytes::as_base64_list")]
    pub server_certificates: Vec<Vec<u8>>,
}

/// Summary of a heartbeat probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbleedLog {
    /// Peer negotiated the heartbeat extension
    pub heartbeat_enabled: bool,
    /// Peer answered with more data than was sent
    pub vulnerable: bool,
    /// Bytes returned beyond the probe payload
    #[serde(with = "bytes::as_base64")]
    pub leaked: Vec<u8>,
}

/// Secure-layer stream that also satisfies the raw transport capability
#[async_trait]
pub trait SecureTransport: Transport {
    /// Run the handshake over the wrapped stream
    async fn handshake(&mut self) -> Result<(), SecureError>;

    /// Summary of the last handshake attempt (complete or not)
    fn handshake_log(&self) -> HandshakeLog;

    /// Send a crafted heartbeat carrying `payload`
    ///
    /// Returns the number of bytes echoed. `SecureError::Heartbleed` signals
    /// that the peer disclosed memory; details are in [`Self::heartbleed_log`].
    async fn check_heartbleed(&mut self, payload: &[u8]) -> Result<usize, SecureError>;

    fn heartbleed_log(&self) -> HeartbleedLog;
}

/// Builds secure-layer clients over a raw stream
pub trait SecureConnector: Send + Sync {
    fn client(&self, raw: Box<dyn Transport>, config: &SecureConfig) -> Box<dyn SecureTransport>;
}
