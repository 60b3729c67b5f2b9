// Heartbleed (CVE-2014-0160) prober over an established secure layer

use super::Connection;
use super::operations::{Failure, HeartbleedRecord, OperationRecord};
use crate::error::{ConnError, SecureError};
use crate::output::bytes;
use crate::secure::HeartbleedLog;
use serde::{Deserialize, Serialize};

/// Finding reported to the caller; a vulnerable peer is not an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum HeartbleedVerdict {
    NotVulnerable,
    Vulnerable {
        /// Memory the peer disclosed
        #[serde(with = "bytes::as_base64")]
        evidence: Vec<u8>,
    },
}

impl HeartbleedVerdict {
    pub fn is_vulnerable(&self) -> bool {
        matches!(self, HeartbleedVerdict::Vulnerable { .. })
    }
}

/// Classified result of one probe
#[derive(Debug)]
enum HeartbleedOutcome {
    /// Peer rejected or ignored the malformed heartbeat
    Clean,
    /// The secure layer raised its Heartbleed sentinel
    VulnerabilityEvidence(Vec<u8>),
    /// Anything else went wrong
    Failure(SecureError),
}

impl HeartbleedOutcome {
    fn classify(result: Result<usize, SecureError>, log: &HeartbleedLog) -> Self {
        match result {
            Ok(_) => HeartbleedOutcome::Clean,
            Err(SecureError::Heartbleed) => HeartbleedOutcome::VulnerabilityEvidence(log.leaked.clone()),
            Err(e) => HeartbleedOutcome::Failure(e),
        }
    }

    fn record(&self, probe: &[u8], log: HeartbleedLog) -> HeartbleedRecord {
        let (evidence, error) = match self {
            HeartbleedOutcome::Clean => (None, None),
            HeartbleedOutcome::VulnerabilityEvidence(leaked) => (Some(leaked.clone()), None),
            HeartbleedOutcome::Failure(e) => (None, Some(Failure::from_secure(e))),
        };
        HeartbleedRecord {
            probe: probe.to_vec(),
            log,
            evidence,
            error,
        }
    }

    fn into_verdict(self) -> Result<HeartbleedVerdict, ConnError> {
        match self {
            HeartbleedOutcome::Clean => Ok(HeartbleedVerdict::NotVulnerable),
            HeartbleedOutcome::VulnerabilityEvidence(evidence) => {
                Ok(HeartbleedVerdict::Vulnerable { evidence })
            }
            HeartbleedOutcome::Failure(e) => Err(e.into()),
        }
    }
}

impl Connection {
    /// Probe the established secure layer for Heartbleed
    ///
    /// Refused without touching the wire on a plaintext connection.
    /// Otherwise exactly one HeartbleedProbe record is appended.
    pub async fn send_heartbleed_probe(
        &mut self,
        payload: &[u8],
    ) -> Result<HeartbleedVerdict, ConnError> {
        let remote = self.remote_description();
        let Some(stream) = self.layer.established_mut() else {
            return Err(ConnError::NotSecure { remote });
        };

        let result = stream.check_heartbleed(payload).await;
        let log = stream.heartbleed_log();
        let outcome = HeartbleedOutcome::classify(result, &log);

        if let HeartbleedOutcome::VulnerabilityEvidence(leaked) = &outcome {
            tracing::warn!("Heartbleed: {} leaked {} bytes", remote, leaked.len());
        }

        self.recorder
            .push(OperationRecord::HeartbleedProbe(outcome.record(payload, log)));
        outcome.into_verdict()
    }
}
