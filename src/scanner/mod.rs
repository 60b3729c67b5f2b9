// Scanner module - single-target grab flow

pub mod config;
pub mod target;

pub use config::GrabConfig;
pub use target::Target;

use crate::conn::{Connection, HeartbleedVerdict, OperationLog};
use crate::error::ConnError;
use crate::secure::{HeartbeatConnector, RustlsConnector, SecureConnector};
use crate::transport::DeadlineStream;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything observed while grabbing one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grab {
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub operations: Vec<OperationLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbleed: Option<HeartbleedVerdict>,
    /// First failure; the steps after it were not attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Grab {
    fn new(target: String) -> Self {
        Self {
            target,
            timestamp: Utc::now(),
            operations: Vec::new(),
            heartbleed: None,
            error: None,
        }
    }

    fn failed(mut self, error: impl std::fmt::Display) -> Self {
        warn!("Grab of {} failed: {}", self.target, error);
        self.error = Some(error.to_string());
        self
    }
}

/// Drives the configured steps against one host at a time
pub struct Grabber {
    config: GrabConfig,
    connector: Arc<dyn SecureConnector>,
}

impl Grabber {
    /// Use rustls, or the hello-phase heartbeat layer when Heartbleed is enabled
    pub fn new(config: GrabConfig) -> Self {
        let connector: Arc<dyn SecureConnector> = if config.heartbleed {
            Arc::new(HeartbeatConnector::new())
        } else {
            Arc::new(RustlsConnector::new())
        };
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: GrabConfig, connector: Arc<dyn SecureConnector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &GrabConfig {
        &self.config
    }

    /// Resolve `target` and grab it, using its hostname for SNI
    pub async fn grab_target(&self, target: &Target) -> Grab {
        match target.resolve().await {
            Ok(addr) => self.run(target.to_string(), addr, target.server_name()).await,
            Err(e) => Grab::new(target.to_string()).failed(format!("{:#}", e)),
        }
    }

    pub async fn grab(&self, addr: SocketAddr) -> Grab {
        self.run(addr.to_string(), addr, None).await
    }

    async fn run(&self, label: String, addr: SocketAddr, hostname: Option<&str>) -> Grab {
        let mut grab = Grab::new(label);
        debug!("Connecting to {} ({})", grab.target, addr);

        let raw = match DeadlineStream::connect(addr, self.config.connect_timeout()).await {
            Ok(raw) => raw,
            Err(e) => return grab.failed(e),
        };

        let mut conn = Connection::with_connector(raw, Arc::clone(&self.connector))
            .with_secure_config(self.config.secure_config(hostname));
        conn.set_deadline(Some(Instant::now() + self.config.io_timeout()));

        let result = self.steps(&mut conn, &mut grab).await;
        grab.operations = conn.operations();

        if let Err(e) = conn.close().await {
            debug!("Closing {} failed: {}", grab.target, e);
        }

        match result {
            Ok(()) => {
                info!("Grabbed {} ({} operations)", grab.target, grab.operations.len());
                grab
            }
            Err(e) => grab.failed(e),
        }
    }

    /// Run the enabled steps in order, stopping at the first failure
    async fn steps(&self, conn: &mut Connection, grab: &mut Grab) -> Result<(), ConnError> {
        let config = &self.config;

        if config.tls {
            conn.tls_handshake().await?;
        }
        if config.banner {
            let mut banner = Vec::new();
            conn.smtp_banner(&mut banner).await?;
        }
        if let Some(domain) = &config.ehlo_domain {
            conn.ehlo(domain).await?;
        }
        if let Some(command) = config.upgrade_command() {
            conn.starttls_handshake(&command).await?;
        }
        if config.smtp_help {
            conn.smtp_help().await?;
        }
        if config.heartbleed {
            let verdict = conn
                .send_heartbleed_probe(config.heartbleed_payload.as_bytes())
                .await?;
            grab.heartbleed = Some(verdict);
        }
        Ok(())
    }
}

/// Grab one address with the secure layer [`Grabber::new`] picks
pub async fn grab(addr: SocketAddr, config: &GrabConfig) -> Grab {
    Grabber::new(config.clone()).grab(addr).await
}
