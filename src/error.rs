// Error types for bannerrun
//
// Connection operations return `ConnError`; the secure layer reports
// `SecureError`. Both are exhaustively matchable so callers can tell a
// state violation from an I/O failure.

use std::io;
use thiserror::Error;

/// Errors raised by [`crate::conn::Connection`] operations
#[derive(Debug, Error)]
pub enum ConnError {
    /// A second TLS handshake was requested on the same connection
    #[error("Attempted repeat handshake with remote host {remote}")]
    RepeatHandshake { remote: String },

    /// STARTTLS was requested after the connection already went secure
    #[error("Attempted STARTTLS after TLS handshake with remote host {remote}")]
    StarttlsAfterHandshake { remote: String },

    /// A Heartbleed probe was requested on a plaintext connection
    #[error("Must perform TLS handshake before sending Heartbleed probe to {remote}")]
    NotSecure { remote: String },

    /// Read, write or close failed (including deadline expiry)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The secure layer failed during handshake or probing
    #[error("Secure layer error: {0}")]
    Secure(#[from] SecureError),
}

impl ConnError {
    /// True for errors raised without touching the wire
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            ConnError::RepeatHandshake { .. }
                | ConnError::StarttlsAfterHandshake { .. }
                | ConnError::NotSecure { .. }
        )
    }

    /// True when the failure was a deadline expiry
    pub fn is_timeout(&self) -> bool {
        match self {
            ConnError::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            ConnError::Secure(SecureError::Io(e)) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

/// Errors reported by a secure-layer implementation
#[derive(Debug, Error)]
pub enum SecureError {
    /// Sentinel: the heartbeat probe returned evidence of memory disclosure
    #[error("Heartbleed vulnerability observed")]
    Heartbleed,

    /// The secure layer cannot issue heartbeat probes
    #[error("Heartbeat probing not supported: {details}")]
    HeartbeatUnsupported { details: String },

    /// An operation needing an established session ran before the handshake
    #[error("TLS session not established")]
    NotEstablished,

    /// The layer negotiated only the hello phase and carries no application data
    #[error("Secure layer has no application data session")]
    NoSession,

    /// The peer sent an alert record
    #[error("TLS alert received: level {level}, description {description}")]
    Alert { level: u8, description: u8 },

    /// The peer's records could not be parsed
    #[error("Malformed TLS response: {0}")]
    Malformed(String),

    /// TLS protocol error (alerts, malformed records, bad configuration)
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Transport failure underneath the secure layer
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<SecureError> for io::Error {
    fn from(err: SecureError) -> Self {
        match err {
            SecureError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}
