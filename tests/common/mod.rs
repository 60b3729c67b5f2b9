// Scripted secure layer for connection tests
//
// The mock "secure" stream passes bytes straight through to the raw
// transport, so a plain duplex peer can play the server on both sides of
// the upgrade.

#![allow(dead_code)]

use async_trait::async_trait;
use bannerrun::error::SecureError;
use bannerrun::secure::{
    HandshakeLog, HeartbleedLog, SecureConfig, SecureConnector, SecureTransport,
};
use bannerrun::transport::{DeadlineStream, Transport};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::DuplexStream;
use tokio::time::Instant;

/// Outcome the mock hands back from `check_heartbleed`
#[derive(Debug, Clone)]
pub enum HeartbleedScript {
    Clean,
    Leak(Vec<u8>),
    Unsupported,
}

/// Everything the mock secure layer observed
#[derive(Debug, Default)]
pub struct MockState {
    pub clients_built: usize,
    pub server_names: Vec<Option<String>>,
    pub read_deadlines: Vec<Option<Instant>>,
    pub write_deadlines: Vec<Option<Instant>>,
    pub probes: Vec<Vec<u8>>,
}

#[derive(Clone)]
pub struct MockConnector {
    handshake_ok: bool,
    heartbleed: HeartbleedScript,
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            handshake_ok: true,
            heartbleed: HeartbleedScript::Clean,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn failing_handshake() -> Self {
        Self {
            handshake_ok: false,
            ..Self::new()
        }
    }

    pub fn with_heartbleed(mut self, script: HeartbleedScript) -> Self {
        self.heartbleed = script;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl SecureConnector for MockConnector {
    fn client(&self, raw: Box<dyn Transport>, config: &SecureConfig) -> Box<dyn SecureTransport> {
        {
            let mut state = self.state();
            state.clients_built += 1;
            state.server_names.push(config.server_name.clone());
        }
        Box::new(MockSecure {
            raw,
            handshake_ok: self.handshake_ok,
            heartbleed: self.heartbleed.clone(),
            state: Arc::clone(&self.state),
            established: false,
            heartbleed_log: HeartbleedLog::default(),
        })
    }
}

struct MockSecure {
    raw: Box<dyn Transport>,
    handshake_ok: bool,
    heartbleed: HeartbleedScript,
    state: Arc<Mutex<MockState>>,
    established: bool,
    heartbleed_log: HeartbleedLog,
}

impl MockSecure {
    fn require_established(&self) -> io::Result<()> {
        if self.established {
            Ok(())
        } else {
            Err(SecureError::NotEstablished.into())
        }
    }
}

#[async_trait]
impl Transport for MockSecure {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.require_established()?;
        self.raw.read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.require_established()?;
        self.raw.write(buf).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.raw.close().await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.raw.local_addr()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.raw.remote_addr()
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.state.lock().unwrap().read_deadlines.push(deadline);
        self.raw.set_read_deadline(deadline);
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.state.lock().unwrap().write_deadlines.push(deadline);
        self.raw.set_write_deadline(deadline);
    }
}

#[async_trait]
impl SecureTransport for MockSecure {
    async fn handshake(&mut self) -> Result<(), SecureError> {
        if self.handshake_ok {
            self.established = true;
            Ok(())
        } else {
            Err(SecureError::Tls(rustls::Error::General(
                "scripted handshake failure".to_string(),
            )))
        }
    }

    fn handshake_log(&self) -> HandshakeLog {
        HandshakeLog {
            complete: self.established,
            version: self.established.then(|| "TLSv1.3".to_string()),
            cipher_suite: self
                .established
                .then(|| "TLS13_AES_128_GCM_SHA256".to_string()),
            alpn_protocol: None,
            server_certificates: Vec::new(),
        }
    }

    async fn check_heartbleed(&mut self, payload: &[u8]) -> Result<usize, SecureError> {
        self.state.lock().unwrap().probes.push(payload.to_vec());
        match &self.heartbleed {
            HeartbleedScript::Clean => {
                self.heartbleed_log = HeartbleedLog {
                    heartbeat_enabled: true,
                    vulnerable: false,
                    leaked: Vec::new(),
                };
                Ok(payload.len())
            }
            HeartbleedScript::Leak(leaked) => {
                self.heartbleed_log = HeartbleedLog {
                    heartbeat_enabled: true,
                    vulnerable: true,
                    leaked: leaked.clone(),
                };
                Err(SecureError::Heartbleed)
            }
            HeartbleedScript::Unsupported => Err(SecureError::HeartbeatUnsupported {
                details: "scripted".to_string(),
            }),
        }
    }

    fn heartbleed_log(&self) -> HeartbleedLog {
        self.heartbleed_log.clone()
    }
}

pub fn local_addr() -> SocketAddr {
    "198.51.100.7:40125".parse().unwrap()
}

pub fn remote_addr() -> SocketAddr {
    "192.0.2.25:25".parse().unwrap()
}

/// Client transport plus the server end of an in-memory pipe
pub fn pipe() -> (DeadlineStream<DuplexStream>, DuplexStream) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (
        DeadlineStream::new(client, Some(local_addr()), Some(remote_addr())),
        server,
    )
}
