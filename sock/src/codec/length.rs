//! Length-prefixed binary frames.
//!
//! ```text
//! +-----------+-------------------+
//! | len:4B BE | payload: len bytes|
//! +-----------+-------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use sock_common::{CodecError, CodecResult};

use super::{Decoder, Encoder};

const HEADER_LEN: usize = 4;

/// Default maximum payload size (8 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Frames each message as a big-endian `u32` length followed by the payload.
#[derive(Debug, Clone)]
pub struct LengthCodec {
    max_frame: usize,
}

impl LengthCodec {
    /// Creates a codec with the default maximum frame size.
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Creates a codec that rejects payloads larger than `max_frame`.
    pub fn with_max_frame(max_frame: usize) -> Self {
        LengthCodec {
            max_frame: max_frame.min(u32::MAX as usize),
        }
    }

    /// Returns the maximum accepted payload size.
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }
}

impl Default for LengthCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LengthCodec {
    type Item = Bytes;

    fn decode(&mut self, src: &mut BytesMut) -> CodecResult<Option<Bytes>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }

        if src.len() < HEADER_LEN + len {
            // Reserve once for the rest of the frame instead of growing per read.
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder for LengthCodec {
    type Item = Bytes;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> CodecResult<()> {
        if item.len() > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                len: item.len(),
                max: self.max_frame,
            });
        }
        dst.reserve(HEADER_LEN + item.len());
        dst.put_u32(item.len() as u32);
        dst.put_slice(&item);
        Ok(())
    }
}
