// Target parsing and resolution

use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};

/// Host to grab from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub hostname: String,
    pub port: u16,
}

impl Target {
    /// Parse target from string (host:port, [v6]:port or just host)
    pub fn parse(input: &str, default_port: u16) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            anyhow::bail!("Empty target");
        }

        let (hostname, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').context("Unterminated IPv6 literal")?;
            let port = match tail.strip_prefix(':') {
                Some(port) => port.parse::<u16>().context("Invalid port number")?,
                None => default_port,
            };
            (host.to_string(), port)
        } else if input.parse::<IpAddr>().is_ok() {
            (input.to_string(), default_port)
        } else if let Some((host, port_str)) = input.rsplit_once(':') {
            let port = port_str.parse::<u16>().context("Invalid port number")?;
            (host.to_string(), port)
        } else {
            (input.to_string(), default_port)
        };

        Ok(Self { hostname, port })
    }

    /// Hostname usable as SNI (None for IP literals)
    pub fn server_name(&self) -> Option<&str> {
        match self.hostname.parse::<IpAddr>() {
            Ok(_) => None,
            Err(_) => Some(&self.hostname),
        }
    }

    /// Resolve to the first socket address
    pub async fn resolve(&self) -> Result<SocketAddr> {
        if let Ok(ip) = self.hostname.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        let mut addrs = tokio::net::lookup_host((self.hostname.as_str(), self.port))
            .await
            .context("DNS lookup failed")?;
        addrs
            .next()
            .with_context(|| format!("No IP addresses found for {}", self.hostname))
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.hostname.contains(':') {
            write!(f, "[{}]:{}", self.hostname, self.port)
        } else {
            write!(f, "{}:{}", self.hostname, self.port)
        }
    }
}
