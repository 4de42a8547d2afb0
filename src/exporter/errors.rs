// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::fmt;
use std::io;

/// Session-ending error classes. Every variant triggers a reconnect; only
/// the distinction matters for logging and backoff policy.
#[derive(Debug)]
pub enum ExporterError {
    /// The collector rejected the handshake (or never answered it). Logged
    /// loudly and retried at the backoff ceiling, never in a tight loop.
    Auth(String),

    /// A malformed or oversized frame; the peer is not speaking our
    /// protocol, or the stream is corrupt.
    Protocol(String),

    /// Connect/read/write failure.
    Network(String),

    /// An operation did not finish within its window.
    Timeout(String),
}

impl fmt::Display for ExporterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExporterError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            ExporterError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            ExporterError::Network(msg) => write!(f, "network error: {}", msg),
            ExporterError::Timeout(msg) => write!(f, "timed out: {}", msg),
        }
    }
}

impl Error for ExporterError {}

impl ExporterError {
    /// Classify an I/O error from the framed transport. The codec reports
    /// protocol violations as `InvalidData`; everything else is network.
    pub fn from_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::InvalidData {
            ExporterError::Protocol(err.to_string())
        } else {
            ExporterError::Network(err.to_string())
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ExporterError::Auth(_))
    }
}
