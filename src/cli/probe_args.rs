// Probe selection arguments
// Copyright (C) 2025 bannerrun contributors
// Licensed under GPL-3.0

use clap::Args;

/// Which steps to run against the target
///
/// Steps run in a fixed order: implicit TLS, banner, EHLO, STARTTLS, HELP,
/// Heartbleed. The first failure ends the grab.
#[derive(Args, Debug, Clone, Default)]
pub struct ProbeArgs {
    /// Negotiate TLS immediately after connecting (SMTPS, IMAPS, HTTPS)
    #[arg(long = "tls")]
    pub tls: bool,

    /// Read the server greeting banner
    #[arg(long = "banner")]
    pub banner: bool,

    /// Send EHLO with the given client domain
    #[arg(long = "ehlo", value_name = "DOMAIN")]
    pub ehlo: Option<String>,

    /// Upgrade in-band with the given command (default: STARTTLS)
    ///
    /// A custom command must be attached with `=`, e.g. `--starttls="a001 STARTTLS"`.
    #[arg(
        long = "starttls",
        value_name = "CMD",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "STARTTLS"
    )]
    pub starttls: Option<String>,

    /// Send SMTP HELP and read the full reply
    #[arg(long = "smtp-help")]
    pub smtp_help: bool,

    /// Probe the secure layer for Heartbleed (CVE-2014-0160)
    ///
    /// Uses a hello-phase TLS client, so it cannot be combined with steps that
    /// read through TLS.
    #[arg(long = "heartbleed")]
    pub heartbleed: bool,
}
