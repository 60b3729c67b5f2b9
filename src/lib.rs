// bannerrun - per-host connection driver for banner grabs and TLS probes
// Copyright (C) 2025 bannerrun contributors
// Licensed under GPL-3.0

//! bannerrun drives a single network connection to one host and records
//! everything it does: raw reads and writes, direct or STARTTLS TLS
//! handshakes, SMTP banner/EHLO/HELP probes and Heartbleed checks.

pub mod cli;
pub mod conn;
pub mod constants;
pub mod error;
pub mod output;
pub mod scanner;
pub mod secure;
pub mod transport;

// Re-export commonly used types
pub use crate::cli::Args;
pub use crate::conn::{Connection, HeartbleedVerdict, OperationKind, OperationLog};
pub use crate::error::{ConnError, SecureError};
pub use crate::scanner::{Grab, GrabConfig, grab};

/// Result type for bannerrun operations
pub type Result<T> = anyhow::Result<T>;

/// Error type for bannerrun operations
pub use anyhow::Error;
