// SPDX-License-Identifier: Apache-2.0

//! Byte-offset cursor over a single monitored file with rotation and
//! truncation detection.
//!
//! Two offsets are tracked: `read` advances as bytes are pulled from the
//! file, `committed` advances only once the corresponding lines have been
//! durably written to the collector. `rewind` drops everything past
//! `committed`, which is how a failed session replays only uncommitted data.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::tail::error::TailError;
use crate::tail::file_id::FileId;

/// Upper bound on bytes pulled per poll; the remainder is picked up on the
/// next cycle.
const MAX_READ_PER_POLL: u64 = 4 * 1024 * 1024;
const READ_CHUNK: usize = 64 * 1024;
/// Block size for the backward scan locating the initial tail offset.
const TAIL_SCAN_CHUNK: u64 = 8192;

#[derive(Debug, Default)]
pub struct PollData {
    pub data: Vec<u8>,
    pub rotated: bool,
    pub truncated: bool,
}

pub struct FileCursor {
    path: PathBuf,
    identity: Option<FileId>,
    committed: u64,
    read: u64,
    /// Lines to back up from EOF on the first successful open.
    initial_tail: Option<u64>,
}

impl FileCursor {
    pub fn new(path: impl Into<PathBuf>, tail_lines: u64) -> Self {
        Self {
            path: path.into(),
            identity: None,
            committed: 0,
            read: 0,
            initial_tail: Some(tail_lines),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn read_offset(&self) -> u64 {
        self.read
    }

    /// Check the file's identity and size against the stored state, then
    /// read newly appended bytes from the read offset toward EOF.
    pub async fn poll(&mut self) -> Result<PollData, TailError> {
        let mut file = File::open(&self.path).await?;
        let meta = file.metadata().await?;
        let id = FileId::from_metadata(&meta);

        let mut out = PollData::default();
        match self.identity {
            None => {
                self.identity = Some(id);
                if let Some(n) = self.initial_tail.take() {
                    let start = tail_offset(&mut file, meta.len(), n).await?;
                    self.committed = start;
                    self.read = start;
                }
            }
            Some(prev) if prev != id => {
                // The path now points at a different file: a rotation.
                self.identity = Some(id);
                self.committed = 0;
                self.read = 0;
                out.rotated = true;
            }
            Some(_) if meta.len() < self.read => {
                // Same file, shrunk underneath us: truncated in place.
                self.committed = 0;
                self.read = 0;
                out.truncated = true;
            }
            Some(_) => {}
        }

        if meta.len() <= self.read {
            return Ok(out);
        }

        file.seek(SeekFrom::Start(self.read)).await?;
        let mut remaining = (meta.len() - self.read).min(MAX_READ_PER_POLL) as usize;
        let mut chunk = vec![0u8; READ_CHUNK.min(remaining)];
        while remaining > 0 {
            let want = chunk.len().min(remaining);
            let n = file.read(&mut chunk[..want]).await?;
            if n == 0 {
                break;
            }
            out.data.extend_from_slice(&chunk[..n]);
            remaining -= n;
        }
        self.read += out.data.len() as u64;

        Ok(out)
    }

    /// Advance the committed offset past `consumed` bytes of delivered lines.
    pub fn commit(&mut self, consumed: u64) {
        self.committed = (self.committed + consumed).min(self.read);
    }

    /// Forget everything past the committed offset; the next poll re-reads it.
    pub fn rewind(&mut self) {
        self.read = self.committed;
    }
}

/// Byte offset at which the last `lines` lines of the file begin, with
/// `tail(1)` counting: a final terminator does not start a new line.
async fn tail_offset(file: &mut File, size: u64, lines: u64) -> Result<u64, TailError> {
    if lines == 0 {
        return Ok(size);
    }
    if size == 0 {
        return Ok(0);
    }

    let mut seen = 0u64;
    let mut end = size;
    let mut skip_last = true;
    let mut buf = vec![0u8; TAIL_SCAN_CHUNK as usize];
    while end > 0 {
        let start = end.saturating_sub(TAIL_SCAN_CHUNK);
        let len = (end - start) as usize;
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut buf[..len]).await?;
        for i in (0..len).rev() {
            if skip_last {
                skip_last = false;
                if buf[i] == b'\n' {
                    continue;
                }
            }
            if buf[i] == b'\n' {
                seen += 1;
                if seen == lines {
                    return Ok(start + i as u64 + 1);
                }
            }
        }
        end = start;
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn append(path: &Path, bytes: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
    }

    #[tokio::test]
    async fn reads_appends_incrementally() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        append(&path, b"one\n");

        let mut cursor = FileCursor::new(&path, 0);
        // tail_lines = 0 starts at EOF, so existing content is skipped.
        let out = cursor.poll().await.unwrap();
        assert!(out.data.is_empty());

        append(&path, b"two\n");
        let out = cursor.poll().await.unwrap();
        assert_eq!(out.data, b"two\n");
        cursor.commit(4);
        assert_eq!(cursor.committed(), cursor.read_offset());
    }

    #[tokio::test]
    async fn initial_tail_positions_before_last_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        append(&path, b"x1\nx2\nx3\n");

        let mut cursor = FileCursor::new(&path, 2);
        let out = cursor.poll().await.unwrap();
        assert_eq!(out.data, b"x2\nx3\n");
    }

    #[tokio::test]
    async fn initial_tail_covers_whole_short_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        append(&path, b"only\n");

        let mut cursor = FileCursor::new(&path, 50);
        let out = cursor.poll().await.unwrap();
        assert_eq!(out.data, b"only\n");
    }

    #[tokio::test]
    async fn truncation_resets_to_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        append(&path, b"a longer amount of content\n");

        let mut cursor = FileCursor::new(&path, 50);
        let out = cursor.poll().await.unwrap();
        cursor.commit(out.data.len() as u64);

        // Truncate in place and write something shorter.
        std::fs::write(&path, b"new\n").unwrap();
        let out = cursor.poll().await.unwrap();
        assert!(out.truncated);
        assert_eq!(out.data, b"new\n");
    }

    #[tokio::test]
    async fn rotation_restarts_at_offset_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        append(&path, b"old line\n");

        let mut cursor = FileCursor::new(&path, 50);
        let out = cursor.poll().await.unwrap();
        cursor.commit(out.data.len() as u64);

        // Rotate: rename away, recreate the path as a new file.
        std::fs::rename(&path, dir.path().join("a.log.1")).unwrap();
        append(&path, b"fresh\n");

        let out = cursor.poll().await.unwrap();
        assert!(out.rotated);
        assert_eq!(out.data, b"fresh\n");
        assert_eq!(cursor.read_offset(), 6);
    }

    #[tokio::test]
    async fn missing_file_is_a_transient_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.log");

        let mut cursor = FileCursor::new(&path, 2);
        assert!(matches!(cursor.poll().await, Err(TailError::Io(_))));

        // The file shows up later; the initial tail still applies.
        append(&path, b"x1\nx2\nx3\n");
        let out = cursor.poll().await.unwrap();
        assert_eq!(out.data, b"x2\nx3\n");
    }

    #[tokio::test]
    async fn rewind_replays_uncommitted_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        append(&path, b"first\n");

        let mut cursor = FileCursor::new(&path, 50);
        let out = cursor.poll().await.unwrap();
        assert_eq!(out.data, b"first\n");

        // Nothing committed: a rewind replays the same bytes.
        cursor.rewind();
        let out = cursor.poll().await.unwrap();
        assert_eq!(out.data, b"first\n");

        cursor.commit(6);
        cursor.rewind();
        let out = cursor.poll().await.unwrap();
        assert!(out.data.is_empty());
    }

    #[tokio::test]
    async fn tail_offset_spans_scan_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.log");
        // Lines long enough that the requested tail crosses a scan block.
        let line = format!("{}\n", "y".repeat(6000));
        append(&path, line.as_bytes());
        append(&path, line.as_bytes());
        append(&path, b"last\n");

        let mut cursor = FileCursor::new(&path, 2);
        let out = cursor.poll().await.unwrap();
        let text = String::from_utf8(out.data).unwrap();
        assert!(text.starts_with("yyy"));
        assert!(text.ends_with("last\n"));
        assert_eq!(text.matches('\n').count(), 2);
    }
}
