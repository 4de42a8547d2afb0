// SPDX-License-Identifier: Apache-2.0

//! Incremental line extraction from raw byte chunks.
//!
//! A line is only emitted once its terminator has been observed; a trailing
//! unterminated fragment is buffered across calls and never flushed early.
//! Consumed byte counts include terminators so callers can keep their file
//! offsets line-aligned.

use encoding_rs::Encoding;
use tracing::debug;

use crate::tail::error::TailError;

/// Lines longer than this are truncated at emit time so they always fit in
/// a single frame. Their full byte length still counts as consumed.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Result of feeding one chunk of bytes into the extractor.
#[derive(Debug, Default, PartialEq)]
pub struct Extraction {
    /// Complete, decoded lines in file order, terminators stripped.
    pub lines: Vec<String>,
    /// Bytes consumed by completed lines, terminators and dropped lines
    /// included. The trailing partial line is never counted.
    pub consumed: u64,
    /// Lines dropped because they failed to decode.
    pub dropped: u64,
}

pub struct LineExtractor {
    encoding: &'static Encoding,
    buf: Vec<u8>,
}

impl LineExtractor {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            buf: Vec::new(),
        }
    }

    /// Feed a chunk and collect every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Extraction {
        self.buf.extend_from_slice(chunk);

        let mut out = Extraction::default();
        let mut start = 0usize;
        while let Some(pos) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            let raw = &self.buf[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

            match decode_line(self.encoding, raw) {
                Ok(mut text) => {
                    if text.len() > MAX_LINE_BYTES {
                        let mut cut = MAX_LINE_BYTES;
                        while !text.is_char_boundary(cut) {
                            cut -= 1;
                        }
                        text.truncate(cut);
                        debug!(len = raw.len(), "truncated overlong line");
                    }
                    out.lines.push(text);
                }
                Err(TailError::Decode(reason)) => {
                    out.dropped += 1;
                    debug!(reason, "dropped undecodable line");
                }
                Err(e) => {
                    out.dropped += 1;
                    debug!(error = %e, "dropped undecodable line");
                }
            }

            out.consumed += (end + 1 - start) as u64;
            start = end + 1;
        }
        self.buf.drain(..start);

        out
    }

    /// Discard buffered partial-line bytes (rotation, truncation, rewind).
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Bytes currently buffered waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(encoding: &'static Encoding, raw: &[u8]) -> Result<String, TailError> {
    let (text, had_errors) = encoding.decode_without_bom_handling(raw);
    if had_errors {
        return Err(TailError::Decode(format!(
            "invalid {} byte sequence",
            encoding.name()
        )));
    }
    Ok(text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_partial_lines_across_calls() {
        let mut ex = LineExtractor::new(encoding_rs::UTF_8);

        let out = ex.push(b"hel");
        assert!(out.lines.is_empty());
        assert_eq!(out.consumed, 0);
        assert_eq!(ex.pending(), 3);

        let out = ex.push(b"lo\nwor");
        assert_eq!(out.lines, vec!["hello"]);
        assert_eq!(out.consumed, 6);
        assert_eq!(ex.pending(), 3);

        let out = ex.push(b"ld\n");
        assert_eq!(out.lines, vec!["world"]);
        assert_eq!(out.consumed, 6);
        assert_eq!(ex.pending(), 0);
    }

    #[test]
    fn unterminated_tail_is_held_back() {
        let mut ex = LineExtractor::new(encoding_rs::UTF_8);
        let out = ex.push(b"complete\nnot yet");
        assert_eq!(out.lines, vec!["complete"]);
        assert_eq!(out.consumed, 9);
        assert_eq!(ex.pending(), 7);
    }

    #[test]
    fn strips_crlf() {
        let mut ex = LineExtractor::new(encoding_rs::UTF_8);
        let out = ex.push(b"one\r\ntwo\n");
        assert_eq!(out.lines, vec!["one", "two"]);
        // CR and LF both count toward consumed bytes.
        assert_eq!(out.consumed, 9);
    }

    #[test]
    fn empty_lines_are_lines() {
        let mut ex = LineExtractor::new(encoding_rs::UTF_8);
        let out = ex.push(b"a\n\nb\n");
        assert_eq!(out.lines, vec!["a", "", "b"]);
    }

    #[test]
    fn undecodable_line_is_dropped_but_counted() {
        let mut ex = LineExtractor::new(encoding_rs::UTF_8);
        let out = ex.push(b"ok\n\xff\xfe\nnext\n");
        assert_eq!(out.lines, vec!["ok", "next"]);
        assert_eq!(out.dropped, 1);
        // All three lines' bytes were consumed, bad one included.
        assert_eq!(out.consumed, 11);
    }

    #[test]
    fn decodes_configured_charset() {
        let encoding = Encoding::for_label(b"latin1").unwrap();
        let mut ex = LineExtractor::new(encoding);
        let out = ex.push(b"caf\xe9\n");
        assert_eq!(out.lines, vec!["caf\u{e9}"]);
    }

    #[test]
    fn overlong_lines_are_truncated_but_fully_consumed() {
        let mut ex = LineExtractor::new(encoding_rs::UTF_8);
        let long = vec![b'z'; MAX_LINE_BYTES + 100];
        let mut chunk = long.clone();
        chunk.push(b'\n');

        let out = ex.push(&chunk);
        assert_eq!(out.lines.len(), 1);
        assert_eq!(out.lines[0].len(), MAX_LINE_BYTES);
        assert_eq!(out.consumed, chunk.len() as u64);
    }

    #[test]
    fn clear_discards_partial_buffer() {
        let mut ex = LineExtractor::new(encoding_rs::UTF_8);
        ex.push(b"partial");
        ex.clear();
        assert_eq!(ex.pending(), 0);
        let out = ex.push(b"fresh\n");
        assert_eq!(out.lines, vec!["fresh"]);
    }
}
