// CLI module - Command line interface and argument parsing
// Copyright (C) 2025 bannerrun contributors
// Licensed under GPL-3.0

use clap::Parser;
use std::path::PathBuf;

// Sub-modules for organized CLI arguments
mod connection_args;
mod output_args;
mod probe_args;

// Re-export sub-structs
pub use connection_args::ConnectionArgs;
pub use output_args::OutputArgs;
pub use probe_args::ProbeArgs;

/// bannerrun - per-host banner grabber and TLS prober
///
/// Flags are grouped into probe selection (ProbeArgs), timeouts and TLS
/// naming (ConnectionArgs) and output options (OutputArgs). Values given on
/// the command line override those loaded with `--config`.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
#[command(name = "bannerrun")]
#[command(about = "Per-host banner grabber, STARTTLS upgrader and Heartbleed prober", long_about = None)]
pub struct Args {
    /// Target (host:port, or host with the configured port)
    #[arg(value_name = "TARGET")]
    pub target: Option<String>,

    /// Load grab configuration from a TOML file
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write an example TOML configuration and exit
    #[arg(long = "config-example", value_name = "FILE")]
    pub config_example: Option<PathBuf>,

    #[command(flatten)]
    pub probes: ProbeArgs,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

impl Args {
    /// Validate CLI arguments for mutual exclusivity and logical consistency
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.target.is_none() && self.config_example.is_none() {
            anyhow::bail!("No target specified. Usage: bannerrun <host:port> [OPTIONS]");
        }
        if self.probes.tls && self.probes.starttls.is_some() {
            anyhow::bail!("Cannot use --tls and --starttls together. Choose one upgrade mode.");
        }
        Ok(())
    }
}
