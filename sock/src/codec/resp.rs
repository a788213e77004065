//! # RESP2 Codec
//!
//! Purpose: Encode Redis-compatible commands and parse server replies
//! incrementally out of a connection's read buffer.
//!
//! ## Design Principles
//! 1. **Peek Then Consume**: Replies are parsed against the buffered bytes and
//!    only removed once a complete value is available.
//! 2. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 3. **Bounded Replies**: Bulk length, total reply size and array nesting
//!    are all capped, so a peer cannot exhaust memory or the stack.
//! 4. **Fail Fast**: Invalid framing returns `CodecError::Malformed` at once.

use bytes::{Buf, BufMut, BytesMut};

use sock_common::{CodecError, CodecResult};

use super::{Decoder, Encoder};

/// Largest bulk string accepted from a peer (512 MiB, the Redis limit).
pub const DEFAULT_MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;

/// Largest complete or pending reply, in bytes, including framing.
pub const DEFAULT_MAX_REPLY_LENGTH: usize = 1024 * 1024 * 1024;

/// Deepest array nesting accepted from a peer.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// One decoded server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status line such as `+OK`.
    Simple(Vec<u8>),
    /// Error line such as `-ERR unknown command`.
    Error(Vec<u8>),
    /// Signed 64-bit integer reply.
    Integer(i64),
    /// Binary payload; `None` is the null bulk string `$-1`.
    Bulk(Option<Vec<u8>>),
    /// Ordered list of nested replies. A null array decodes as empty.
    Array(Vec<RespValue>),
}

/// One RESP2 command, sent as an array of bulk strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RespCommand {
    args: Vec<Vec<u8>>,
}

impl RespCommand {
    /// Starts a command with its name, e.g. `RespCommand::new("SET")`.
    pub fn new(name: impl AsRef<[u8]>) -> Self {
        RespCommand {
            args: vec![name.as_ref().to_vec()],
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    /// Returns the command name and arguments in wire order.
    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }
}

/// Client-side RESP2 codec: commands out, replies in.
#[derive(Debug, Clone)]
pub struct RespCodec {
    max_bulk: usize,
    max_reply: usize,
    max_depth: usize,
}

impl RespCodec {
    /// Creates a codec with the default limits.
    pub fn new() -> Self {
        RespCodec {
            max_bulk: DEFAULT_MAX_BULK_LENGTH,
            max_reply: DEFAULT_MAX_REPLY_LENGTH,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Creates a codec that rejects bulk strings longer than `max_bulk`.
    pub fn with_max_bulk(max_bulk: usize) -> Self {
        RespCodec {
            max_bulk,
            ..Self::new()
        }
    }

    /// Caps the size of one reply, counted over its full wire encoding.
    pub fn max_reply(mut self, max_reply: usize) -> Self {
        self.max_reply = max_reply;
        self
    }

    /// Caps array nesting. A top-level array is at depth one.
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for RespCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RespCodec {
    type Item = RespValue;

    fn decode(&mut self, src: &mut BytesMut) -> CodecResult<Option<RespValue>> {
        let parser = Parser {
            buf: &src[..],
            max_bulk: self.max_bulk,
            max_depth: self.max_depth,
        };

        match parser.value(0, 0)? {
            Some((_, end)) if end > self.max_reply => Err(CodecError::FrameTooLarge {
                len: end,
                max: self.max_reply,
            }),
            Some((value, end)) => {
                src.advance(end);
                Ok(Some(value))
            }
            // Everything buffered belongs to the incomplete first reply.
            None if src.len() > self.max_reply => Err(CodecError::FrameTooLarge {
                len: src.len(),
                max: self.max_reply,
            }),
            None => Ok(None),
        }
    }
}

impl Encoder for RespCodec {
    type Item = RespCommand;

    fn encode(&mut self, item: RespCommand, dst: &mut BytesMut) -> CodecResult<()> {
        if item.args.is_empty() {
            return Err(CodecError::Malformed("empty command"));
        }

        put_header(dst, b'*', item.args.len());
        for arg in &item.args {
            put_header(dst, b'$', arg.len());
            dst.put_slice(arg);
            dst.put_slice(b"\r\n");
        }
        Ok(())
    }
}

/// Outcome of parsing one value: the value and the offset just past it, or
/// `None` when the buffer ends first.
type Parsed = CodecResult<Option<(RespValue, usize)>>;

/// Read-only view over the buffered bytes.
struct Parser<'a> {
    buf: &'a [u8],
    max_bulk: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn value(&self, pos: usize, depth: usize) -> Parsed {
        let Some((line, next)) = self.line(pos)? else {
            return Ok(None);
        };
        let Some((&marker, rest)) = line.split_first() else {
            return Err(CodecError::Malformed("empty reply line"));
        };

        match marker {
            b'+' => Ok(Some((RespValue::Simple(rest.to_vec()), next))),
            b'-' => Ok(Some((RespValue::Error(rest.to_vec()), next))),
            b':' => Ok(Some((RespValue::Integer(parse_integer(rest)?), next))),
            b'$' => self.bulk(next, parse_integer(rest)?),
            b'*' => self.array(next, parse_integer(rest)?, depth + 1),
            _ => Err(CodecError::Malformed("unknown reply type")),
        }
    }

    fn bulk(&self, start: usize, declared: i64) -> Parsed {
        let Ok(len) = usize::try_from(declared) else {
            return Ok(Some((RespValue::Bulk(None), start)));
        };
        if len > self.max_bulk {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_bulk,
            });
        }

        let end = start + len;
        match self.buf.get(end..end + 2) {
            None => Ok(None),
            Some(b"\r\n") => Ok(Some((
                RespValue::Bulk(Some(self.buf[start..end].to_vec())),
                end + 2,
            ))),
            Some(_) => Err(CodecError::Malformed("bulk string missing crlf")),
        }
    }

    fn array(&self, mut pos: usize, declared: i64, depth: usize) -> Parsed {
        if depth > self.max_depth {
            return Err(CodecError::Malformed("reply nested too deeply"));
        }

        let count = usize::try_from(declared).unwrap_or(0);
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let Some((item, next)) = self.value(pos, depth)? else {
                return Ok(None);
            };
            items.push(item);
            pos = next;
        }
        Ok(Some((RespValue::Array(items), pos)))
    }

    /// Returns the CRLF-terminated line at `pos`, without the terminator.
    fn line(&self, pos: usize) -> CodecResult<Option<(&'a [u8], usize)>> {
        let buf: &'a [u8] = self.buf;
        let Some(offset) = buf[pos..].iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let end = pos + offset;
        match buf[pos..end].strip_suffix(b"\r") {
            Some(line) => Ok(Some((line, end + 1))),
            None => Err(CodecError::Malformed("line missing crlf")),
        }
    }
}

fn parse_integer(digits: &[u8]) -> CodecResult<i64> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(CodecError::Malformed("invalid integer"))
}

/// Writes `<marker><len>\r\n` without going through `fmt`.
fn put_header(out: &mut BytesMut, marker: u8, len: usize) {
    let mut digits = [0u8; 20];
    let mut start = digits.len();
    let mut rest = len;
    loop {
        start -= 1;
        digits[start] = b'0' + (rest % 10) as u8;
        rest /= 10;
        if rest == 0 {
            break;
        }
    }

    out.reserve(1 + digits.len() - start + 2);
    out.put_u8(marker);
    out.put_slice(&digits[start..]);
    out.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> CodecResult<Option<RespValue>> {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(bytes);
        codec.decode(&mut buf)
    }

    #[test]
    fn encodes_command() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(RespCommand::new("GET").arg("key"), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_empty_and_multi_digit_arguments() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::new();
        let long = vec![b'v'; 12];
        codec
            .encode(RespCommand::new("SET").arg("").arg(&long), &mut buf)
            .unwrap();
        assert!(buf.starts_with(b"*3\r\n$3\r\nSET\r\n$0\r\n\r\n$12\r\n"));
    }

    #[test]
    fn rejects_empty_command() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::new();
        let empty = RespCommand::default();
        assert!(matches!(
            codec.encode(empty, &mut buf),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn parses_simple_string() {
        let resp = decode_all(b"+OK\r\n").unwrap();
        assert_eq!(resp, Some(RespValue::Simple(b"OK".to_vec())));
    }

    #[test]
    fn parses_bulk_string() {
        let resp = decode_all(b"$5\r\nhello\r\n").unwrap();
        assert_eq!(resp, Some(RespValue::Bulk(Some(b"hello".to_vec()))));
    }

    #[test]
    fn parses_null_bulk_string() {
        let resp = decode_all(b"$-1\r\n").unwrap();
        assert_eq!(resp, Some(RespValue::Bulk(None)));
    }

    #[test]
    fn parses_integer_and_error() {
        assert_eq!(decode_all(b":42\r\n").unwrap(), Some(RespValue::Integer(42)));
        assert_eq!(decode_all(b":-7\r\n").unwrap(), Some(RespValue::Integer(-7)));
        assert_eq!(
            decode_all(b"-ERR bad\r\n").unwrap(),
            Some(RespValue::Error(b"ERR bad".to_vec()))
        );
    }

    #[test]
    fn rejects_non_numeric_integer() {
        assert!(matches!(decode_all(b":4x\r\n"), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn parses_nested_array() {
        let resp = decode_all(b"*2\r\n:1\r\n*1\r\n$1\r\nx\r\n").unwrap();
        assert_eq!(
            resp,
            Some(RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::Bulk(Some(b"x".to_vec()))]),
            ]))
        );
    }

    #[test]
    fn partial_reply_is_left_in_buffer() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"*2\r\n:1\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 8);

        buf.extend_from_slice(b"$2\r\nok\r\n+PONG\r\n");
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(RespValue::Array(_))));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::Simple(b"PONG".to_vec()))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_bare_newline() {
        assert!(matches!(decode_all(b"+OK\n"), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn rejects_oversized_bulk() {
        let mut codec = RespCodec::with_max_bulk(3);
        let mut buf = BytesMut::from(&b"$10\r\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { len: 10, max: 3 })
        ));
    }

    #[test]
    fn nesting_is_capped() {
        let mut codec = RespCodec::new().max_depth(3);
        let mut buf = BytesMut::from(&b"*1\r\n*1\r\n*1\r\n:7\r\n"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());

        let mut buf = BytesMut::from(&b"*1\r\n*1\r\n*1\r\n*1\r\n:7\r\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn hostile_nesting_fails_without_recursing_deeply() {
        let mut bytes = b"*1\r\n".repeat(200_000);
        bytes.extend_from_slice(b":1\r\n");
        assert!(matches!(decode_all(&bytes), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn pending_reply_over_total_limit_is_rejected() {
        let mut codec = RespCodec::new().max_reply(16);
        let mut buf = BytesMut::from(&b"*3\r\n$4\r\nabcd\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"$4\r\nefgh\r\n");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { len: 24, max: 16 })
        ));
    }

    #[test]
    fn complete_reply_over_total_limit_is_rejected() {
        let mut codec = RespCodec::new().max_reply(8);
        let mut buf = BytesMut::from(&b"$5\r\nhello\r\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { len: 11, max: 8 })
        ));
    }
}
