// Output configuration arguments
// Copyright (C) 2025 bannerrun contributors
// Licensed under GPL-3.0

use clap::Args;
use std::path::PathBuf;

/// Output options
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Pretty print JSON output
    #[arg(long = "pretty")]
    pub pretty: bool,

    /// Write JSON to a file instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,
}
