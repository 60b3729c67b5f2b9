// bannerrun - per-host connection driver for banner grabs and TLS probes
// Copyright (C) 2025 bannerrun contributors
// Licensed under GPL-3.0

//! Protocol and I/O Constants
//!
//! Centralized buffer sizes, SMTP commands and timeouts used by the
//! connection driver and the grab flow.

use std::time::Duration;

// =============================================================================
// Buffer Sizes
// =============================================================================

/// Initial buffer size for reading an upgrade (STARTTLS) acknowledgement
pub const STARTTLS_RESPONSE_BUFFER: usize = 256;

/// Buffer size for the single read following an EHLO command
pub const EHLO_RESPONSE_BUFFER: usize = 512;

/// Initial buffer size for boundary-aware SMTP reads (HELP, banner)
pub const SMTP_RESPONSE_BUFFER: usize = 512;

/// Growth factor applied when a boundary-aware read fills its buffer
pub const RESPONSE_BUFFER_GROWTH: usize = 3;

/// Chunk size used when pulling TLS records off the raw stream
///
/// Matches the maximum TLS record size (2^14) plus header and expansion room.
pub const TLS_READ_CHUNK: usize = 16384 + 2048;

// =============================================================================
// SMTP Commands
// =============================================================================

/// Default in-band upgrade command
pub const STARTTLS_COMMAND: &str = "STARTTLS\r\n";

/// SMTP HELP query
pub const SMTP_HELP_COMMAND: &str = "HELP\r\n";

/// Build the EHLO greeting for the given client identity
pub fn ehlo_command(domain: &str) -> String {
    format!("EHLO {}\r\n", domain)
}

// =============================================================================
// Heartbleed
// =============================================================================

/// Default payload handed to the secure layer's heartbeat probe
pub const DEFAULT_HEARTBLEED_PAYLOAD: &[u8] = b"bannerrun-heartbleed-probe";

/// Payload length claimed by the malformed heartbeat request
pub const HEARTBEAT_CLAIMED_LENGTH: u16 = 0x4000;

// =============================================================================
// Timeouts
// =============================================================================

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default budget for the whole exchange with one host
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);
