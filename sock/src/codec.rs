//! # Codec Contract
//!
//! Purpose: Define how application messages are framed onto and parsed from
//! a connection's byte stream.
//!
//! ## Design Principles
//! 1. **Split Ownership**: A codec is split once per connection; the read flow
//!    owns the `Decoder` half and the write flow owns the `Encoder` half.
//! 2. **Buffer-Based Framing**: Decoders inspect a `BytesMut` filled by the
//!    read flow and return `Ok(None)` until a full frame is buffered.
//! 3. **One Frame per Call**: `decode` yields at most one message and
//!    `encode` consumes exactly one message.
//! 4. **Fresh State per Connection**: Clients build codecs from a factory so
//!    codec state is never shared between connections.

use bytes::BytesMut;

use sock_common::CodecResult;

mod length;
mod line;
mod resp;

pub use length::LengthCodec;
pub use line::LineCodec;
pub use resp::{RespCodec, RespCommand, RespValue};

/// Parses inbound frames out of the read buffer.
pub trait Decoder: Send + 'static {
    /// Decoded application message.
    type Item: Send + 'static;

    /// Attempts to decode one frame from `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Consumed bytes must be
    /// removed from `src`; an error is fatal for the connection.
    fn decode(&mut self, src: &mut BytesMut) -> CodecResult<Option<Self::Item>>;
}

/// Frames outbound messages into the write buffer.
pub trait Encoder: Send + 'static {
    /// Application message accepted by `Connection::send`.
    type Item: Send + 'static;

    /// Appends exactly one framed message to `dst`.
    fn encode(&mut self, item: Self::Item, dst: &mut BytesMut) -> CodecResult<()>;
}

/// Per-connection framing strategy.
///
/// Any type that is `Decoder + Encoder + Clone` is a codec whose halves are
/// two copies of itself. Codecs whose halves share setup state can implement
/// this trait directly.
pub trait Codec: Send + 'static {
    /// Half driven by the read flow.
    type Decoder: Decoder;
    /// Half driven by the write flow.
    type Encoder: Encoder;

    /// Splits the codec into its read and write halves.
    fn split(self) -> (Self::Decoder, Self::Encoder);
}

impl<T> Codec for T
where
    T: Decoder + Encoder + Clone,
{
    type Decoder = T;
    type Encoder = T;

    fn split(self) -> (T, T) {
        (self.clone(), self)
    }
}

/// Message type produced by a codec's decoder half.
pub type Inbound<C> = <<C as Codec>::Decoder as Decoder>::Item;

/// Message type consumed by a codec's encoder half.
pub type Outbound<C> = <<C as Codec>::Encoder as Encoder>::Item;

/// Builds a fresh codec for every new connection.
///
/// Plain closures and function items such as `LineCodec::new` qualify.
pub trait CodecFactory: Send + Sync + 'static {
    /// Codec produced by this factory.
    type Codec: Codec;

    /// Creates a codec for one connection.
    fn build(&self) -> Self::Codec;
}

impl<F, C> CodecFactory for F
where
    F: Fn() -> C + Send + Sync + 'static,
    C: Codec,
{
    type Codec = C;

    fn build(&self) -> C {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_builds_independent_codecs() {
        let factory = || LineCodec::with_max_length(16);
        let first = factory.build();
        let second = CodecFactory::build(&factory);
        assert_eq!(first.max_length(), 16);
        assert_eq!(second.max_length(), 16);
    }

    #[test]
    fn clone_codec_splits_into_working_halves() {
        let (mut decoder, mut encoder) = LineCodec::new().split();
        let mut buf = BytesMut::new();
        encoder.encode("hello".to_string(), &mut buf).unwrap();
        let line = decoder.decode(&mut buf).unwrap();
        assert_eq!(line.as_deref(), Some("hello"));
        assert!(buf.is_empty());
    }
}
