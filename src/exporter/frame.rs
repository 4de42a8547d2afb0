// SPDX-License-Identifier: Apache-2.0

//! Length-delimited framing for protocol messages.
//!
//! Each frame is a `u32` big-endian byte length followed by the JSON body of
//! one [`Message`]. Decoding is strict: an oversized length or a body that
//! does not parse is an `InvalidData` error, which ends the session.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::exporter::message::Message;

/// Maximum size of a single frame body. Log lines are bounded well below
/// this; anything larger is a protocol violation.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const LEN_PREFIX: usize = 4;

pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, io::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&src[..LEN_PREFIX]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame size {} exceeds maximum {}", len, self.max_frame_size),
            ));
        }

        if src.len() < LEN_PREFIX + len {
            // Need more data.
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let body = src.split_to(len);
        serde_json::from_slice(&body).map(Some).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame decode error: {}", e),
            )
        })
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), io::Error> {
        let body = serde_json::to_vec(&msg)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if body.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "refusing to encode frame of {} bytes (maximum {})",
                    body.len(),
                    self.max_frame_size
                ),
            ));
        }

        dst.reserve(LEN_PREFIX + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
