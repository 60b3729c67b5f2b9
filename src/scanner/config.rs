// Grab configuration - what to do with one host, loadable from TOML

use crate::cli::Args;
use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBLEED_PAYLOAD, DEFAULT_IO_TIMEOUT, STARTTLS_COMMAND,
};
use crate::secure::SecureConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabConfig {
    /// Port used when the target carries none
    pub port: u16,

    /// TCP connect timeout in seconds
    pub connect_timeout_seconds: u64,

    /// Budget for the whole exchange in seconds
    pub io_timeout_seconds: u64,

    /// Negotiate TLS immediately after connecting
    pub tls: bool,

    /// Read the server greeting
    pub banner: bool,

    /// Send `EHLO <domain>`
    pub ehlo_domain: Option<String>,

    /// In-band upgrade command (e.g. `STARTTLS`)
    pub starttls_command: Option<String>,

    /// Send `HELP`
    pub smtp_help: bool,

    /// Probe for Heartbleed once the secure layer is up
    ///
    /// Switches the grab to the hello-phase heartbeat layer, so no step may
    /// read or write through TLS.
    pub heartbleed: bool,

    /// Bytes handed to the heartbeat probe
    pub heartbleed_payload: String,

    /// SNI name; the target hostname is used when absent
    pub server_name: Option<String>,
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            port: 25,
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            io_timeout_seconds: DEFAULT_IO_TIMEOUT.as_secs(),
            tls: false,
            banner: false,
            ehlo_domain: None,
            starttls_command: None,
            smtp_help: false,
            heartbleed: false,
            heartbleed_payload: String::from_utf8_lossy(DEFAULT_HEARTBLEED_PAYLOAD).into_owned(),
            server_name: None,
        }
    }
}

impl GrabConfig {
    /// Create config from file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GrabConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Create example config file
    pub fn create_example(path: &str) -> anyhow::Result<()> {
        let config = Self {
            banner: true,
            ehlo_domain: Some("bannerrun.local".to_string()),
            starttls_command: Some(STARTTLS_COMMAND.trim_end().to_string()),
            ..Self::default()
        };
        let toml = toml::to_string_pretty(&config)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Build configuration from CLI Args, layered over `--config` when given
    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(
                path.to_str()
                    .ok_or_else(|| anyhow::anyhow!("Invalid config file path"))?,
            )?,
            None => Self::default(),
        };

        let probes = &args.probes;
        config.tls |= probes.tls;
        config.banner |= probes.banner;
        config.smtp_help |= probes.smtp_help;
        config.heartbleed |= probes.heartbleed;
        if probes.ehlo.is_some() {
            config.ehlo_domain = probes.ehlo.clone();
        }
        if probes.starttls.is_some() {
            config.starttls_command = probes.starttls.clone();
        }
        if let Some(secs) = args.connection.timeout {
            config.io_timeout_seconds = secs;
        }
        if let Some(secs) = args.connection.connect_timeout {
            config.connect_timeout_seconds = secs;
        }
        if args.connection.sni.is_some() {
            config.server_name = args.connection.sni.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the connection state machine would refuse
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tls && self.starttls_command.is_some() {
            anyhow::bail!("Cannot combine implicit TLS with a STARTTLS upgrade. Choose one.");
        }
        if self.heartbleed && !self.tls && self.starttls_command.is_none() {
            anyhow::bail!("Heartbleed probing needs a secure layer: add --tls or --starttls.");
        }
        // The heartbeat layer stops after the server hello and carries no data
        if self.heartbleed && (self.smtp_help || (self.tls && (self.banner || self.ehlo_domain.is_some())))
        {
            anyhow::bail!(
                "Heartbleed probing cannot be combined with steps that read through TLS (--smtp-help, or --banner/--ehlo with --tls)."
            );
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_seconds)
    }

    /// Upgrade command as written to the wire, CRLF-terminated
    pub fn upgrade_command(&self) -> Option<String> {
        self.starttls_command.as_ref().map(|command| {
            let command = command.trim_end_matches(['\r', '\n']);
            format!("{}\r\n", command)
        })
    }

    /// Secure-layer context, falling back to `hostname` for SNI
    pub fn secure_config(&self, hostname: Option<&str>) -> SecureConfig {
        SecureConfig {
            server_name: self
                .server_name
                .clone()
                .or_else(|| hostname.map(str::to_string)),
            ..SecureConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_example_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grab.toml");
        let path = path.to_str().unwrap();

        GrabConfig::create_example(path).unwrap();
        let loaded = GrabConfig::from_file(path).unwrap();

        assert!(loaded.banner);
        assert_eq!(loaded.ehlo_domain.as_deref(), Some("bannerrun.local"));
        assert_eq!(loaded.upgrade_command().as_deref(), Some("STARTTLS\r\n"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: GrabConfig = toml::from_str("port = 587\nsmtp_help = true\n").unwrap();
        assert_eq!(config.port, 587);
        assert!(config.smtp_help);
        assert_eq!(config.io_timeout(), DEFAULT_IO_TIMEOUT);
        assert_eq!(config.heartbleed_payload.as_bytes(), DEFAULT_HEARTBLEED_PAYLOAD);
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "bannerrun",
            "mail.example.com:25",
            "--banner",
            "--ehlo",
            "probe.example",
            "--starttls",
            "--timeout",
            "3",
        ]);
        let config = GrabConfig::from_args(&args).unwrap();

        assert!(config.banner);
        assert_eq!(config.ehlo_domain.as_deref(), Some("probe.example"));
        assert_eq!(config.upgrade_command().as_deref(), Some("STARTTLS\r\n"));
        assert_eq!(config.io_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_conflicting_upgrades_rejected() {
        let config = GrabConfig {
            tls: true,
            starttls_command: Some("STARTTLS".to_string()),
            ..GrabConfig::default()
        };
        assert!(config.validate().is_err());

        let config = GrabConfig {
            heartbleed: true,
            ..GrabConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbleed_excludes_steps_over_tls() {
        let config = GrabConfig {
            starttls_command: Some("STARTTLS".to_string()),
            smtp_help: true,
            heartbleed: true,
            ..GrabConfig::default()
        };
        assert!(config.validate().is_err());

        let config = GrabConfig {
            tls: true,
            banner: true,
            heartbleed: true,
            ..GrabConfig::default()
        };
        assert!(config.validate().is_err());

        // plaintext steps before the upgrade are fine
        let config = GrabConfig {
            banner: true,
            ehlo_domain: Some("client.example".to_string()),
            starttls_command: Some("STARTTLS".to_string()),
            heartbleed: true,
            ..GrabConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secure_config_sni_fallback() {
        let config = GrabConfig::default();
        assert_eq!(
            config.secure_config(Some("mx.example")).server_name.as_deref(),
            Some("mx.example")
        );

        let config = GrabConfig {
            server_name: Some("override.example".to_string()),
            ..GrabConfig::default()
        };
        assert_eq!(
            config.secure_config(Some("mx.example")).server_name.as_deref(),
            Some("override.example")
        );
        assert!(GrabConfig::default().secure_config(None).insecure_skip_verify);
    }
}
