//! Newline-delimited UTF-8 text frames.

use bytes::{BufMut, BytesMut};

use sock_common::{CodecError, CodecResult};

use super::{Decoder, Encoder};

/// Default maximum line length in bytes, excluding the terminator.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Frames each message as one `\n`-terminated line.
///
/// A trailing `\r` before the newline is stripped on decode, so CRLF peers
/// work unchanged.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    // Bytes already scanned for a newline; avoids rescanning partial lines.
    scanned: usize,
}

impl LineCodec {
    /// Creates a line codec with the default maximum line length.
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Creates a line codec that rejects lines longer than `max_length`.
    pub fn with_max_length(max_length: usize) -> Self {
        LineCodec {
            max_length,
            scanned: 0,
        }
    }

    /// Returns the maximum accepted line length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;

    fn decode(&mut self, src: &mut BytesMut) -> CodecResult<Option<String>> {
        let newline = src[self.scanned..].iter().position(|&b| b == b'\n');
        let Some(offset) = newline else {
            self.scanned = src.len();
            // A trailing `\r` may still be followed by `\n` and is not content.
            let pending = match src.last() {
                Some(&b'\r') => src.len() - 1,
                _ => src.len(),
            };
            if pending > self.max_length {
                return Err(CodecError::FrameTooLarge {
                    len: pending,
                    max: self.max_length,
                });
            }
            return Ok(None);
        };

        let end = self.scanned + offset;
        self.scanned = 0;
        let mut line = src.split_to(end + 1);
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }
        if line.len() > self.max_length {
            return Err(CodecError::FrameTooLarge {
                len: line.len(),
                max: self.max_length,
            });
        }

        let text = String::from_utf8(line.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Some(text))
    }
}

impl Encoder for LineCodec {
    type Item = String;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> CodecResult<()> {
        if item.len() > self.max_length {
            return Err(CodecError::FrameTooLarge {
                len: item.len(),
                max: self.max_length,
            });
        }
        if item.as_bytes().contains(&b'\n') {
            return Err(CodecError::Malformed("line contains a newline"));
        }
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_lines_across_partial_reads() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"pi"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"ng\r\npong\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("ping"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("pong"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn decodes_empty_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn rejects_overlong_line_without_newline() {
        let mut codec = LineCodec::with_max_length(4);
        let mut buf = BytesMut::from(&b"abcdef"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { len: 6, max: 4 })
        ));
    }

    #[test]
    fn accepts_full_length_line_split_before_newline() {
        let mut codec = LineCodec::with_max_length(4);
        let mut buf = BytesMut::from(&b"abcd\r"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("abcd"));
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfe\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::InvalidUtf8)));
    }

    #[test]
    fn encode_appends_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("ping".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"ping\n");
    }

    #[test]
    fn encode_rejects_embedded_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode("a\nb".to_string(), &mut buf),
            Err(CodecError::Malformed(_))
        ));
        assert!(buf.is_empty());
    }
}
