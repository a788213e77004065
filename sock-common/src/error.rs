//! # Error Taxonomy
//!
//! Purpose: Name every failure a connection can observe so flows can log a
//! precise cause before converting it into a single close action.
//!
//! ## Design Principles
//! 1. **Two Layers**: `CodecError` covers framing, `SockError` covers the
//!    connection and dial surface and wraps codec failures.
//! 2. **Fatal by Default**: Every variant is terminal for the connection that
//!    produced it; retry belongs to whoever calls `connect` again.
//! 3. **Source Preservation**: IO errors keep their `std::io::Error` source.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type for connection and dial operations.
pub type SockResult<T> = Result<T, SockError>;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Framing failures raised by a codec half.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Bytes on the wire do not form a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// A frame exceeds the codec's configured maximum.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Declared or observed frame length.
        len: usize,
        /// Configured maximum frame length.
        max: usize,
    },

    /// A text codec received bytes that are not valid UTF-8.
    #[error("frame is not valid utf-8")]
    InvalidUtf8,
}

/// Errors surfaced by the client and the connection flows.
#[derive(Debug, Error)]
pub enum SockError {
    /// Dialing the remote address failed; no connection was created.
    #[error("dial {addr} failed: {source}")]
    Dial {
        /// Address that was dialed.
        addr: String,
        /// Underlying connect error.
        #[source]
        source: io::Error,
    },

    /// The configured address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Transport read or write failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Codec failure while decoding or encoding.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No complete frame arrived within the read deadline.
    #[error("read deadline of {0:?} exceeded")]
    ReadTimeout(Duration),

    /// The peer closed its side of the stream.
    #[error("peer closed the connection")]
    PeerClosed,
}

impl SockError {
    /// Returns true when the error came from the read deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SockError::ReadTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_error_converts_into_sock_error() {
        let err: SockError = CodecError::Malformed("bad header").into();
        assert!(matches!(err, SockError::Codec(CodecError::Malformed(_))));
        assert_eq!(err.to_string(), "codec error: malformed frame: bad header");
    }

    #[test]
    fn dial_error_keeps_source() {
        let err = SockError::Dial {
            addr: "127.0.0.1:1".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("dial 127.0.0.1:1 failed"));
    }

    #[test]
    fn timeout_is_flagged() {
        assert!(SockError::ReadTimeout(Duration::from_millis(5)).is_timeout());
        assert!(!SockError::PeerClosed.is_timeout());
    }

    #[test]
    fn frame_too_large_reports_sizes() {
        let err = CodecError::FrameTooLarge { len: 10, max: 4 };
        assert_eq!(err.to_string(), "frame of 10 bytes exceeds limit of 4 bytes");
    }
}
