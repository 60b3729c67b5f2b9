// Connection and timeout configuration arguments
// Copyright (C) 2025 bannerrun contributors
// Licensed under GPL-3.0

use clap::Args;

/// Connection, timeout and TLS naming options
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Budget in seconds for the whole exchange after connecting
    #[arg(long = "timeout", value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// TCP connect timeout in seconds
    #[arg(long = "connect-timeout", value_name = "SECONDS")]
    pub connect_timeout: Option<u64>,

    /// Server name to send in the TLS ClientHello
    #[arg(long = "sni", value_name = "NAME")]
    pub sni: Option<String>,
}
