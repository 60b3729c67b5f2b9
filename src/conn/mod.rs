// Connection - recording connection driver with a plaintext -> TLS state machine
//
// One Connection drives one host. Every I/O call is routed to the active
// layer (raw or secure) and every operation appends exactly one record to
// the operation log before returning, success or failure.

pub mod heartbleed;
pub mod operations;
pub mod smtp;

pub use heartbleed::HeartbleedVerdict;
pub use operations::{Failure, FailureKind, OperationKind, OperationLog};

use crate::constants::STARTTLS_RESPONSE_BUFFER;
use crate::error::ConnError;
use crate::secure::{RustlsConnector, SecureConfig, SecureConnector, SecureTransport};
use crate::transport::{Deadlines, Transport, describe_addr};
use operations::{
    ExchangeRecord, HandshakeRecord, OperationRecord, ReadRecord, Recorder, WriteRecord,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;

/// Stream currently carrying traffic
enum Layer {
    Plaintext(Box<dyn Transport>),
    /// Owns the raw stream from here on; `established` is false when the
    /// handshake failed, in which case no further handshake is allowed
    Secure {
        stream: Box<dyn SecureTransport>,
        established: bool,
    },
    /// Raw stream handed to the connector and not yet returned
    Detached,
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "Connection stream is detached")
}

impl Layer {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Layer::Plaintext(raw) => raw.read(buf).await,
            Layer::Secure { stream, .. } => stream.read(buf).await,
            Layer::Detached => Err(detached()),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Layer::Plaintext(raw) => raw.write(buf).await,
            Layer::Secure { stream, .. } => stream.write(buf).await,
            Layer::Detached => Err(detached()),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        match self {
            Layer::Plaintext(raw) => raw.close().await,
            Layer::Secure { stream, .. } => stream.close().await,
            Layer::Detached => Err(detached()),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Layer::Plaintext(raw) => raw.local_addr(),
            Layer::Secure { stream, .. } => stream.local_addr(),
            Layer::Detached => None,
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        match self {
            Layer::Plaintext(raw) => raw.remote_addr(),
            Layer::Secure { stream, .. } => stream.remote_addr(),
            Layer::Detached => None,
        }
    }

    fn apply_deadlines(&mut self, deadlines: &Deadlines) {
        match self {
            Layer::Plaintext(raw) => deadlines.apply_to(raw.as_mut()),
            Layer::Secure { stream, .. } => deadlines.apply_to(stream.as_mut()),
            Layer::Detached => {}
        }
    }

    /// The secure stream, only after a successful handshake
    fn established_mut(&mut self) -> Option<&mut Box<dyn SecureTransport>> {
        match self {
            Layer::Secure {
                stream,
                established: true,
            } => Some(stream),
            _ => None,
        }
    }

    fn is_plaintext(&self) -> bool {
        matches!(self, Layer::Plaintext(_))
    }
}

/// Per-host connection that records every operation it performs
pub struct Connection {
    layer: Layer,
    connector: Arc<dyn SecureConnector>,
    secure_config: SecureConfig,
    deadlines: Deadlines,
    recorder: Recorder,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote", &self.remote_addr())
            .field("secure", &self.is_secure())
            .field("deadlines", &self.deadlines)
            .field("operations", &self.recorder.len())
            .finish()
    }
}

impl Connection {
    /// Wrap an open raw stream, using rustls for the secure layer
    pub fn new<T: Transport + 'static>(raw: T) -> Self {
        Self::with_connector(raw, Arc::new(RustlsConnector::new()))
    }

    /// Wrap an open raw stream with a specific secure-layer factory
    pub fn with_connector<T: Transport + 'static>(
        raw: T,
        connector: Arc<dyn SecureConnector>,
    ) -> Self {
        Self {
            layer: Layer::Plaintext(Box::new(raw)),
            connector,
            secure_config: SecureConfig::default(),
            deadlines: Deadlines::default(),
            recorder: Recorder::default(),
        }
    }

    /// Replace the client context used by the next handshake
    pub fn with_secure_config(mut self, config: SecureConfig) -> Self {
        self.secure_config = config;
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.layer.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.layer.remote_addr()
    }

    /// True once a handshake has succeeded
    pub fn is_secure(&self) -> bool {
        matches!(
            self.layer,
            Layer::Secure {
                established: true,
                ..
            }
        )
    }

    pub fn deadlines(&self) -> Deadlines {
        self.deadlines
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadlines.read = deadline;
        self.deadlines.write = deadline;
        self.layer.apply_deadlines(&self.deadlines);
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.deadlines.read = deadline;
        self.layer.apply_deadlines(&self.deadlines);
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.deadlines.write = deadline;
        self.layer.apply_deadlines(&self.deadlines);
    }

    /// Write on the active stream and record the bytes attempted
    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.layer.write(buf).await;
        self.recorder.push(OperationRecord::Write(WriteRecord {
            sent: buf.to_vec(),
            error: Failure::from_io_result(&result),
        }));
        result
    }

    /// Read from the active stream and record the bytes received
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.layer.read(buf).await;
        let received = match &result {
            Ok(n) => buf[..*n].to_vec(),
            Err(_) => Vec::new(),
        };
        self.recorder.push(OperationRecord::Read(ReadRecord {
            received,
            error: Failure::from_io_result(&result),
        }));
        result
    }

    /// Close the active stream (the secure layer closes the raw one)
    pub async fn close(&mut self) -> io::Result<()> {
        self.layer.close().await
    }

    /// Negotiate TLS directly on the current stream
    ///
    /// Cached deadlines are applied to the secure stream before it
    /// handshakes. A SecureHandshake record is appended whatever the result.
    pub async fn tls_handshake(&mut self) -> Result<(), ConnError> {
        let raw = match std::mem::replace(&mut self.layer, Layer::Detached) {
            Layer::Plaintext(raw) => raw,
            other => {
                self.layer = other;
                return Err(ConnError::RepeatHandshake {
                    remote: self.remote_description(),
                });
            }
        };

        let mut stream = self.connector.client(raw, &self.secure_config);
        self.deadlines.apply_to(stream.as_mut());

        let result = stream.handshake().await;
        let log = stream.handshake_log();
        self.layer = Layer::Secure {
            stream,
            established: result.is_ok(),
        };

        self.recorder
            .push(OperationRecord::SecureHandshake(HandshakeRecord {
                log,
                error: result.as_ref().err().map(Failure::from_secure),
            }));

        match result {
            Ok(()) => {
                tracing::info!("TLS established with {}", self.remote_description());
                Ok(())
            }
            Err(e) => {
                tracing::debug!("TLS handshake with {} failed: {}", self.remote_description(), e);
                Err(e.into())
            }
        }
    }

    /// Send an in-band upgrade command, read its acknowledgement, then
    /// negotiate TLS
    ///
    /// The exchange is recorded before the handshake starts; a failed write
    /// or read returns without attempting the handshake.
    pub async fn starttls_handshake(&mut self, command: &str) -> Result<(), ConnError> {
        if !self.layer.is_plaintext() {
            return Err(ConnError::StarttlsAfterHandshake {
                remote: self.remote_description(),
            });
        }

        let command = command.as_bytes().to_vec();
        let (response, result) = match self.layer.write(&command).await {
            Ok(_) => {
                let (response, result) = self
                    .read_until(STARTTLS_RESPONSE_BUFFER, smtp::line_complete)
                    .await;
                (Some(response), result)
            }
            Err(e) => (None, Err(e)),
        };

        self.recorder
            .push(OperationRecord::UpgradeNegotiation(ExchangeRecord {
                command,
                response,
                error: Failure::from_io_result(&result),
            }));
        result?;

        self.tls_handshake().await
    }

    /// Ordered snapshot of every operation performed so far
    pub fn operations(&self) -> Vec<OperationLog> {
        self.recorder.logs()
    }

    fn remote_description(&self) -> String {
        describe_addr(self.layer.remote_addr())
    }
}
