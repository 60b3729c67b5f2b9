// Operation log - append-only record of every action taken on a connection

use crate::error::SecureError;
use crate::output::bytes;
use crate::secure::{HandshakeLog, HeartbleedLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;

/// Kind of operation performed on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Write,
    Read,
    SecureHandshake,
    UpgradeNegotiation,
    GreetingExchange,
    CapabilityQuery,
    BannerRead,
    HeartbleedProbe,
}

/// Classification of a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A read or write deadline expired
    Timeout,
    /// The peer closed or reset the stream
    Closed,
    /// Any other transport error
    Io,
    /// The secure layer rejected the exchange
    Tls,
    /// The secure layer lacks the requested capability
    Unsupported,
}

/// A failed outcome, kept as data so records stay cloneable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn from_io(err: &io::Error) -> Self {
        // Secure-layer errors surfacing through read/write
        if let Some(secure) = err.get_ref().and_then(|e| e.downcast_ref::<SecureError>()) {
            return Self::from_secure(secure);
        }

        let kind = match err.kind() {
            io::ErrorKind::TimedOut => FailureKind::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => FailureKind::Closed,
            _ => FailureKind::Io,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }

    pub fn from_secure(err: &SecureError) -> Self {
        match err {
            SecureError::Io(e) => Self::from_io(e),
            SecureError::HeartbeatUnsupported { .. } | SecureError::NoSession => Self {
                kind: FailureKind::Unsupported,
                message: err.to_string(),
            },
            _ => Self {
                kind: FailureKind::Tls,
                message: err.to_string(),
            },
        }
    }

    pub(crate) fn from_io_result<T>(result: &io::Result<T>) -> Option<Self> {
        result.as_ref().err().map(Self::from_io)
    }
}

/// Normalized, caller-facing view of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLog {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    /// Bytes sent to the peer
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bytes::as_base64_option"
    )]
    pub request: Option<Vec<u8>>,
    /// Bytes received from the peer (or leaked, for Heartbleed)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bytes::as_base64_option"
    )]
    pub response: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake: Option<HandshakeLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbleed: Option<HeartbleedLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl OperationLog {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    fn new(kind: OperationKind, timestamp: DateTime<Utc>, error: &Option<Failure>) -> Self {
        Self {
            kind,
            timestamp,
            request: None,
            response: None,
            handshake: None,
            heartbleed: None,
            error: error.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct WriteRecord {
    pub sent: Vec<u8>,
    pub error: Option<Failure>,
}

#[derive(Debug, Clone)]
pub(crate) struct ReadRecord {
    pub received: Vec<u8>,
    pub error: Option<Failure>,
}

#[derive(Debug, Clone)]
pub(crate) struct HandshakeRecord {
    pub log: HandshakeLog,
    pub error: Option<Failure>,
}

/// Command written, then a response read (absent when the write failed)
#[derive(Debug, Clone)]
pub(crate) struct ExchangeRecord {
    pub command: Vec<u8>,
    pub response: Option<Vec<u8>>,
    pub error: Option<Failure>,
}

#[derive(Debug, Clone)]
pub(crate) struct HeartbleedRecord {
    pub probe: Vec<u8>,
    pub log: HeartbleedLog,
    pub evidence: Option<Vec<u8>>,
    pub error: Option<Failure>,
}

#[derive(Debug, Clone)]
pub(crate) enum OperationRecord {
    Write(WriteRecord),
    Read(ReadRecord),
    SecureHandshake(HandshakeRecord),
    UpgradeNegotiation(ExchangeRecord),
    GreetingExchange(ExchangeRecord),
    CapabilityQuery(ExchangeRecord),
    BannerRead(ReadRecord),
    HeartbleedProbe(HeartbleedRecord),
}

impl OperationRecord {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationRecord::Write(_) => OperationKind::Write,
            OperationRecord::Read(_) => OperationKind::Read,
            OperationRecord::SecureHandshake(_) => OperationKind::SecureHandshake,
            OperationRecord::UpgradeNegotiation(_) => OperationKind::UpgradeNegotiation,
            OperationRecord::GreetingExchange(_) => OperationKind::GreetingExchange,
            OperationRecord::CapabilityQuery(_) => OperationKind::CapabilityQuery,
            OperationRecord::BannerRead(_) => OperationKind::BannerRead,
            OperationRecord::HeartbleedProbe(_) => OperationKind::HeartbleedProbe,
        }
    }

    fn to_log(&self, timestamp: DateTime<Utc>) -> OperationLog {
        let kind = self.kind();
        match self {
            OperationRecord::Write(w) => OperationLog {
                request: Some(w.sent.clone()),
                ..OperationLog::new(kind, timestamp, &w.error)
            },
            OperationRecord::Read(r) | OperationRecord::BannerRead(r) => OperationLog {
                response: Some(r.received.clone()),
                ..OperationLog::new(kind, timestamp, &r.error)
            },
            OperationRecord::SecureHandshake(h) => OperationLog {
                handshake: Some(h.log.clone()),
                ..OperationLog::new(kind, timestamp, &h.error)
            },
            OperationRecord::UpgradeNegotiation(e)
            | OperationRecord::GreetingExchange(e)
            | OperationRecord::CapabilityQuery(e) => OperationLog {
                request: Some(e.command.clone()),
                response: e.response.clone(),
                ..OperationLog::new(kind, timestamp, &e.error)
            },
            OperationRecord::HeartbleedProbe(p) => OperationLog {
                request: Some(p.probe.clone()),
                response: p.evidence.clone(),
                heartbleed: Some(p.log.clone()),
                ..OperationLog::new(kind, timestamp, &p.error)
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    at: DateTime<Utc>,
    record: OperationRecord,
}

/// Append-only sink owned by a single connection
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    entries: Vec<Entry>,
}

impl Recorder {
    pub fn push(&mut self, record: OperationRecord) {
        tracing::trace!("Recording {:?} operation #{}", record.kind(), self.entries.len());
        self.entries.push(Entry {
            at: Utc::now(),
            record,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Independent snapshot of the log, in insertion order
    pub fn logs(&self) -> Vec<OperationLog> {
        self.entries
            .iter()
            .map(|entry| entry.record.to_log(entry.at))
            .collect()
    }
}
