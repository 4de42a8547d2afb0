// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::tail::TailedLine;

/// A single protocol message, carried in one frame.
///
/// `Hello` opens a session and carries the authentication proof; the
/// collector answers with `Welcome` or `Error` and may send `Error` at any
/// later point. `Line` and `Heartbeat` only flow client to collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Hello {
        client: String,
        timestamp_ms: u64,
        nonce: String,
        proof: String,
    },
    Welcome,
    Line {
        file: String,
        sequence: u64,
        timestamp_ms: u64,
        text: String,
    },
    Heartbeat,
    Error {
        reason: String,
    },
}

impl From<TailedLine> for Message {
    fn from(line: TailedLine) -> Self {
        Message::Line {
            file: line.file,
            sequence: line.sequence,
            timestamp_ms: line.timestamp_ms,
            text: line.text,
        }
    }
}
