// SPDX-License-Identifier: Apache-2.0

use std::fmt;

#[derive(Debug)]
pub enum TailError {
    /// The file is missing or unreadable; retried on the next poll.
    Io(std::io::Error),
    /// Bytes did not decode under the configured encoding; the offending
    /// line is dropped and extraction continues.
    Decode(String),
}

impl fmt::Display for TailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailError::Io(e) => write!(f, "I/O error: {}", e),
            TailError::Decode(s) => write!(f, "decode error: {}", s),
        }
    }
}

impl std::error::Error for TailError {}

impl From<std::io::Error> for TailError {
    fn from(err: std::io::Error) -> Self {
        TailError::Io(err)
    }
}
