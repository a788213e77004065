//! # Dialing Client
//!
//! Purpose: Dial one configured address, number every connection it creates
//! and wire its default callbacks onto each of them.
//!
//! ## Design Principles
//! 1. **Factory Pattern**: A `CodecFactory` yields a fresh codec per dial, so
//!    no framing state is shared between connections.
//! 2. **Copy on Create**: Each connection captures its own copy of the
//!    callback set; later setter calls only affect later connections.
//! 3. **Monotonic Ids**: The counter only moves after a successful dial, so
//!    ids are dense over live connections and never reused.
//! 4. **Fire and Return**: `connect` starts both flows and returns without
//!    waiting on them.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{self, TcpStream};
use tokio::time;

use sock_common::{ConnectionId, Message, SockError, SockResult};

use crate::callback::Callbacks;
use crate::codec::{CodecFactory, Inbound};
use crate::connection::{split_tcp, Connection};
use crate::events::{ConnectionEvent, EventSink, TracingSink};
use crate::options::ConnectionOptions;

type ClientConnection<F> = Connection<<F as CodecFactory>::Codec>;

/// Dials connections to a single address.
pub struct Client<F: CodecFactory> {
    address: String,
    counter: AtomicU32,
    factory: F,
    options: ConnectionOptions,
    connect_timeout: Option<Duration>,
    callbacks: Callbacks<F::Codec>,
    sink: Arc<dyn EventSink>,
}

impl<F: CodecFactory> Client<F> {
    /// Creates a client with default connection options.
    ///
    /// `factory` is usually a constructor such as `LineCodec::new`.
    pub fn new(address: impl Into<String>, factory: F) -> Self {
        Self::with_options(address, factory, ConnectionOptions::default())
    }

    /// Creates a client whose connections use `options`.
    pub fn with_options(address: impl Into<String>, factory: F, options: ConnectionOptions) -> Self {
        Client {
            address: address.into(),
            counter: AtomicU32::new(0),
            factory,
            options,
            connect_timeout: None,
            callbacks: Callbacks::new(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Target address, as given at construction.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Number of connections created so far.
    pub fn connections_created(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    /// Options applied to new connections.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Bounds each dial attempt. Expiry is reported as a dial failure.
    pub fn set_connect_timeout(&mut self, timeout: Option<Duration>) {
        self.connect_timeout = timeout;
    }

    /// Routes client and connection events to `sink`.
    pub fn set_sink<S: EventSink>(&mut self, sink: S) {
        self.sink = Arc::new(sink);
    }

    /// Sets the established callback for future connections.
    pub fn on_connect<H>(&mut self, callback: H)
    where
        H: Fn(&Arc<ClientConnection<F>>) + Send + Sync + 'static,
    {
        self.callbacks.on_connect = Some(Arc::new(callback));
    }

    /// Sets the close callback for future connections.
    pub fn on_close<H>(&mut self, callback: H)
    where
        H: Fn(&Arc<ClientConnection<F>>) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(callback));
    }

    /// Sets the read callback for future connections.
    pub fn on_read<H>(&mut self, callback: H)
    where
        H: Fn(&Arc<ClientConnection<F>>, Message<Inbound<F::Codec>>) + Send + Sync + 'static,
    {
        self.callbacks.on_read = Some(Arc::new(callback));
    }

    /// Sets the idle-timeout callback for future connections.
    pub fn on_idle_timeout<H>(&mut self, callback: H)
    where
        H: Fn(&Arc<ClientConnection<F>>) + Send + Sync + 'static,
    {
        self.callbacks.on_idle_timeout = Some(Arc::new(callback));
    }

    /// Dials the address and starts a new connection.
    ///
    /// **Input**: none; uses the stored address, factory and callbacks.
    /// **Output**: the started connection, whose established callback has
    /// already fired.
    ///
    /// # Errors
    /// `SockError::InvalidAddress` when the address does not resolve and
    /// `SockError::Dial` when no resolved address accepts the connection.
    /// The id counter is left unchanged on error.
    pub async fn connect(&self) -> SockResult<Arc<ClientConnection<F>>> {
        let (reader, writer, peer) = match self.dial().await {
            Ok(parts) => parts,
            Err(error) => {
                self.sink.record(&ConnectionEvent::DialFailed {
                    addr: &self.address,
                    error: &error,
                });
                return Err(error);
            }
        };

        let id = ConnectionId::new(self.counter.fetch_add(1, Ordering::AcqRel)).next();
        let conn = Connection::builder(id, self.factory.build())
            .options(self.options.clone())
            .callbacks(self.callbacks.clone())
            .shared_sink(Arc::clone(&self.sink))
            .start(reader, writer, peer);
        Ok(conn)
    }

    async fn dial(
        &self,
    ) -> SockResult<(
        net::tcp::OwnedReadHalf,
        net::tcp::OwnedWriteHalf,
        String,
    )> {
        let addrs: Vec<SocketAddr> = net::lookup_host(self.address.as_str())
            .await
            .map_err(|_| SockError::InvalidAddress(self.address.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(SockError::InvalidAddress(self.address.clone()));
        }

        let mut last_error = None;
        for addr in addrs {
            match self.dial_one(addr).await {
                Ok(stream) => {
                    return split_tcp(stream, self.options.nodelay).map_err(|source| {
                        SockError::Dial {
                            addr: self.address.clone(),
                            source,
                        }
                    });
                }
                Err(err) => last_error = Some(err),
            }
        }

        Err(SockError::Dial {
            addr: self.address.clone(),
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address")),
        })
    }

    async fn dial_one(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        match self.connect_timeout {
            Some(timeout) => time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?,
            None => TcpStream::connect(addr).await,
        }
    }
}

impl<F: CodecFactory> fmt::Debug for Client<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .field("connections_created", &self.connections_created())
            .field("options", &self.options)
            .field("connect_timeout", &self.connect_timeout)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
