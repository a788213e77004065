//! # Sock Connection Framework
//!
//! Purpose: Provide a minimal, callback-driven TCP connection primitive with a
//! pluggable codec, independent read/write flows and an idle heartbeat.
//!
//! ## Design Principles
//! 1. **Two Flows per Connection**: One task reads and decodes, one task
//!    encodes and writes; they share nothing but the close flag.
//! 2. **Strategy Pattern**: Framing lives behind the `Codec` contract and is
//!    split into decoder/encoder halves so neither flow needs a lock.
//! 3. **Exactly-Once Teardown**: A compare-and-swap on the close state picks a
//!    single winner that signals teardown and fires the close callback.
//! 4. **Injected Observability**: Lifecycle and error events go to an
//!    `EventSink` instead of a process-wide logger.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sock::{Client, LineCodec};
//!
//! # async fn run() -> Result<(), sock::SockError> {
//! let mut client = Client::new("127.0.0.1:8080", LineCodec::new);
//! client.on_read(|conn, msg| {
//!     println!("{} <- {}", conn.name(), msg.body());
//! });
//! let conn = client.connect().await?;
//! conn.send("ping".to_string()).await;
//! # Ok(())
//! # }
//! ```

mod callback;
mod client;
pub mod codec;
mod connection;
pub mod events;
mod options;

pub use callback::{Callbacks, ConnectionCallback, ReadCallback};
pub use client::Client;
pub use codec::{
    Codec, CodecFactory, Decoder, Encoder, Inbound, LengthCodec, LineCodec, Outbound, RespCodec,
    RespCommand, RespValue,
};
pub use connection::{Connection, ConnectionBuilder};
pub use events::{
    ConnectionEvent, CountingSink, DropReason, EventSink, EventsSnapshot, Flow, TracingSink,
};
pub use options::ConnectionOptions;

pub use sock_common::{
    CloseState, CodecError, CodecResult, ConnectionId, Message, SockError, SockResult,
};
