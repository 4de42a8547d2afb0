// SPDX-License-Identifier: Apache-2.0

//! Per-file tailing state: cursor + line extractor + sequence counters.
//!
//! The supervisor polls each `MonitoredFile`, writes the returned lines to
//! the collector, then calls `commit`. If the session dies before the write
//! completes it calls `rewind` instead, and the next poll re-reads the same
//! bytes and re-issues the same sequence numbers.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use encoding_rs::Encoding;
use tracing::{info, warn};

use crate::tail::cursor::FileCursor;
use crate::tail::error::TailError;
use crate::tail::lines::LineExtractor;

/// A line extracted from a monitored file, ready to be framed.
#[derive(Debug, Clone, PartialEq)]
pub struct TailedLine {
    pub file: String,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub text: String,
}

pub struct MonitoredFile {
    name: String,
    cursor: FileCursor,
    extractor: LineExtractor,
    next_seq: u64,
    committed_seq: u64,
    pending_consumed: u64,
    missing: bool,
}

impl MonitoredFile {
    pub fn new(path: PathBuf, encoding: &'static Encoding, tail_lines: u64) -> Self {
        let name = path.display().to_string();
        Self {
            name,
            cursor: FileCursor::new(path, tail_lines),
            extractor: LineExtractor::new(encoding),
            next_seq: 0,
            committed_seq: 0,
            pending_consumed: 0,
            missing: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Poll for newly appended lines. Transient I/O problems are logged and
    /// produce an empty batch; they never end the session.
    pub async fn poll(&mut self) -> Vec<TailedLine> {
        let data = match self.cursor.poll().await {
            Ok(data) => {
                if self.missing {
                    info!(file = %self.name, "file is readable again");
                    self.missing = false;
                }
                data
            }
            Err(TailError::Io(e)) => {
                if !self.missing {
                    warn!(file = %self.name, error = %e, "cannot read file, will keep retrying");
                    self.missing = true;
                }
                return Vec::new();
            }
            Err(e) => {
                warn!(file = %self.name, error = %e, "tail error");
                return Vec::new();
            }
        };

        if data.rotated {
            info!(file = %self.name, "file was rotated, restarting from the beginning");
            self.extractor.clear();
        } else if data.truncated {
            info!(file = %self.name, "file was truncated, restarting from the beginning");
            self.extractor.clear();
        }

        let ex = self.extractor.push(&data.data);
        if ex.dropped > 0 {
            warn!(file = %self.name, dropped = ex.dropped, "dropped lines that failed to decode");
        }
        self.pending_consumed += ex.consumed;

        let timestamp_ms = now_millis();
        ex.lines
            .into_iter()
            .map(|text| {
                let sequence = self.next_seq;
                self.next_seq += 1;
                TailedLine {
                    file: self.name.clone(),
                    sequence,
                    timestamp_ms,
                    text,
                }
            })
            .collect()
    }

    /// Mark everything handed out by `poll` as durably written.
    pub fn commit(&mut self) {
        if self.pending_consumed > 0 {
            self.cursor.commit(self.pending_consumed);
            self.pending_consumed = 0;
        }
        self.committed_seq = self.next_seq;
    }

    /// Drop uncommitted state after a session failure; the next poll
    /// re-reads from the committed offset with the same sequence numbers.
    pub fn rewind(&mut self) {
        self.pending_consumed = 0;
        self.next_seq = self.committed_seq;
        self.cursor.rewind();
        self.extractor.clear();
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
