//! # Connection
//!
//! Purpose: Own one established byte stream and drive it with two concurrent
//! flows, a read flow that decodes inbound frames and a write flow that
//! drains the outbound queue and runs the idle heartbeat.
//!
//! ## Design Principles
//! 1. **Exclusive Halves**: The read flow owns the read half and the decoder,
//!    the write flow owns the write half and the encoder. No I/O lock exists.
//! 2. **Single Winner Close**: `close` moves the state `Open -> Closing` with a
//!    compare-and-swap. Only the winner signals teardown and fires the close
//!    callback; every other caller returns immediately.
//! 3. **Signalled Teardown**: The winner broadcasts on a `watch` channel; each
//!    flow observes it, releases its half and exits.
//! 4. **Self-Correcting Heartbeat**: An early idle wake rearms for the
//!    remaining time instead of the full timeout.
//!
//! ## Flow Lifecycle
//!
//! ```text
//! start ──> on_connect ──> spawn(read_loop) + spawn(write_loop)
//!                               │                   │
//!           decode error ───────┤                   ├─── write error
//!                               └──> close() <──────┘
//!                                       │
//!                          watch(true) ─┴─> both flows exit
//! ```

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use sock_common::{CloseState, ConnectionId, Message, SockError, SockResult};

use crate::callback::{Callbacks, ConnectionCallback};
use crate::codec::{Codec, Decoder, Encoder, Inbound, Outbound};
use crate::events::{ConnectionEvent, DropReason, EventSink, Flow, TracingSink};
use crate::options::ConnectionOptions;

/// One established connection.
///
/// Always handled through `Arc<Connection<C>>`; the flows hold their own
/// references, so the connection is released once both have exited and the
/// application has dropped its handles.
pub struct Connection<C: Codec> {
    id: ConnectionId,
    name: String,
    peer: String,
    state: AtomicU8,
    outbound: mpsc::Sender<Outbound<C>>,
    shutdown: watch::Sender<bool>,
    // Nanoseconds; zero disables the heartbeat / read deadline.
    idle_timeout: AtomicU64,
    read_timeout: AtomicU64,
    idle_rearm: Notify,
    callbacks: Callbacks<C>,
    idle_callback: RwLock<Option<ConnectionCallback<C>>>,
    sink: Arc<dyn EventSink>,
    // Flows still running; every `join` waits for zero.
    running: watch::Sender<usize>,
    // Kept only to resume a flow panic in `join`.
    flows: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: Codec> Connection<C> {
    /// Starts building a connection with the given id and codec.
    ///
    /// Used by `Client` after a successful dial and by acceptors that already
    /// own a stream.
    pub fn builder(id: ConnectionId, codec: C) -> ConnectionBuilder<C> {
        ConnectionBuilder {
            id,
            codec,
            options: ConnectionOptions::default(),
            callbacks: Callbacks::new(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Id assigned by the creator of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Display name, `"{peer}-{id}"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remote endpoint of the transport.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Current close state.
    pub fn state(&self) -> CloseState {
        CloseState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true once a close transition has been won.
    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Current idle threshold. `Duration::ZERO` means the heartbeat is off.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_nanos(self.idle_timeout.load(Ordering::Relaxed))
    }

    /// Current per-frame read deadline.
    pub fn read_timeout(&self) -> Option<Duration> {
        match self.read_timeout.load(Ordering::Relaxed) {
            0 => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    /// Changes the idle threshold and rearms the heartbeat from now.
    ///
    /// `Duration::ZERO` disables the heartbeat until a non-zero value is set.
    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.idle_timeout
            .store(duration_to_nanos(timeout), Ordering::Relaxed);
        self.idle_rearm.notify_one();
    }

    /// Sets the deadline for decoding each inbound frame.
    ///
    /// `None` or `Duration::ZERO` removes the deadline. The new value applies
    /// from the next frame on.
    pub fn set_read_timeout(&self, timeout: impl Into<Option<Duration>>) {
        let nanos = timeout.into().map_or(0, duration_to_nanos);
        self.read_timeout.store(nanos, Ordering::Relaxed);
    }

    /// Replaces the idle-timeout callback of this connection only.
    pub fn on_idle_timeout<F>(&self, callback: F)
    where
        F: Fn(&Arc<Connection<C>>) + Send + Sync + 'static,
    {
        *self.idle_callback.write() = Some(Arc::new(callback));
    }

    /// Queues `body` for the write flow.
    ///
    /// Waits while the queue is full. When the connection is closed, or
    /// closes while waiting, the body is dropped silently.
    pub async fn send(&self, body: Outbound<C>) {
        if self.is_closed() {
            self.record_drop(DropReason::Closed);
            return;
        }
        if self.outbound.send(body).await.is_err() {
            self.record_drop(DropReason::Closed);
        }
    }

    /// Queues `body` without waiting.
    ///
    /// Returns false and drops the body when the queue is full or the
    /// connection is closed. Safe to call from callbacks.
    pub fn try_send(&self, body: Outbound<C>) -> bool {
        if self.is_closed() {
            self.record_drop(DropReason::Closed);
            return false;
        }
        match self.outbound.try_send(body) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.record_drop(DropReason::QueueFull);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.record_drop(DropReason::Closed);
                false
            }
        }
    }

    /// Closes the connection.
    ///
    /// Idempotent: only the first caller signals the flows and fires the close
    /// callback. Pending outbound messages are discarded.
    pub fn close(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(
                CloseState::Open.as_u8(),
                CloseState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        self.sink.record(&ConnectionEvent::Closed { name: &self.name });
        self.shutdown.send_replace(true);
        if let Some(callback) = &self.callbacks.on_close {
            callback(self);
        }
        self.state
            .store(CloseState::Closed.as_u8(), Ordering::Release);
    }

    /// Waits until both flows have exited.
    ///
    /// Any number of callers may wait concurrently. A panic inside a flow is
    /// resumed in the first caller that observes it. Must not be awaited from
    /// inside a callback of the same connection.
    pub async fn join(&self) {
        let mut running = self.running.subscribe();
        let _ = running.wait_for(|count| *count == 0).await;

        let flows = std::mem::take(&mut *self.flows.lock());
        for flow in flows {
            if let Err(err) = flow.await {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        }
    }

    fn record_drop(&self, reason: DropReason) {
        self.sink.record(&ConnectionEvent::SendDropped {
            name: &self.name,
            reason,
        });
    }

    async fn read_loop<R>(
        self: Arc<Self>,
        mut decoder: C::Decoder,
        mut reader: R,
        mut shutdown: watch::Receiver<bool>,
        buffer_capacity: usize,
        _exit: FlowExit<C>,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut buffer = BytesMut::with_capacity(buffer_capacity);

        loop {
            let frame = tokio::select! {
                biased;
                _ = closed(&mut shutdown) => break,
                frame = self.next_frame(&mut decoder, &mut reader, &mut buffer) => frame,
            };

            match frame {
                Ok(body) => self.dispatch_read(body),
                Err(error) => {
                    if !self.is_closed() {
                        self.sink.record(&ConnectionEvent::ReadFailed {
                            name: &self.name,
                            error: &error,
                        });
                    }
                    self.close();
                    break;
                }
            }
        }

        self.sink.record(&ConnectionEvent::FlowExited {
            name: &self.name,
            flow: Flow::Read,
        });
    }

    /// Decodes one frame, reading more bytes as needed.
    ///
    /// The read deadline covers the whole frame.
    async fn next_frame<R>(
        &self,
        decoder: &mut C::Decoder,
        reader: &mut R,
        buffer: &mut BytesMut,
    ) -> SockResult<Inbound<C>>
    where
        R: AsyncRead + Unpin,
    {
        let deadline = self
            .read_timeout()
            .map(|timeout| (Instant::now() + timeout, timeout));

        loop {
            if let Some(body) = decoder.decode(buffer)? {
                return Ok(body);
            }

            let read = reader.read_buf(buffer);
            let bytes = match deadline {
                Some((deadline, timeout)) => time::timeout_at(deadline, read)
                    .await
                    .map_err(|_| SockError::ReadTimeout(timeout))??,
                None => read.await?,
            };
            if bytes == 0 {
                return Err(SockError::PeerClosed);
            }
        }
    }

    fn dispatch_read(self: &Arc<Self>, body: Inbound<C>) {
        if self.is_closed() {
            return;
        }
        self.sink.record(&ConnectionEvent::Read { name: &self.name });
        match &self.callbacks.on_read {
            Some(callback) => callback(self, Message::new(self.id, body)),
            None => self
                .sink
                .record(&ConnectionEvent::MissingReadCallback { name: &self.name }),
        }
    }

    async fn write_loop<W>(
        self: Arc<Self>,
        mut encoder: C::Encoder,
        mut writer: W,
        mut queue: mpsc::Receiver<Outbound<C>>,
        mut shutdown: watch::Receiver<bool>,
        started: Instant,
        _exit: FlowExit<C>,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut out = BytesMut::new();
        let mut last_write = started;
        let idle = time::sleep_until(started + self.idle_timeout());
        tokio::pin!(idle);

        loop {
            let heartbeat = !self.idle_timeout().is_zero();

            tokio::select! {
                biased;
                _ = closed(&mut shutdown) => break,
                _ = self.idle_rearm.notified() => {
                    idle.as_mut().reset(Instant::now() + self.idle_timeout());
                }
                body = queue.recv() => {
                    let Some(body) = body else { break };
                    if self.is_closed() {
                        break;
                    }

                    let written = tokio::select! {
                        biased;
                        _ = closed(&mut shutdown) => break,
                        written = write_frame(&mut encoder, &mut writer, &mut out, body) => written,
                    };
                    match written {
                        Ok(()) => {
                            self.sink.record(&ConnectionEvent::Written { name: &self.name });
                            last_write = Instant::now();
                            idle.as_mut().reset(last_write + self.idle_timeout());
                        }
                        Err(error) => {
                            if !self.is_closed() {
                                self.sink.record(&ConnectionEvent::WriteFailed {
                                    name: &self.name,
                                    error: &error,
                                });
                            }
                            self.close();
                            break;
                        }
                    }
                }
                () = &mut idle, if heartbeat => {
                    if self.is_closed() {
                        break;
                    }
                    let timeout = self.idle_timeout();
                    let now = Instant::now();
                    let elapsed = now.saturating_duration_since(last_write);
                    if elapsed < timeout {
                        idle.as_mut().reset(now + (timeout - elapsed));
                    } else {
                        self.fire_idle_timeout(elapsed);
                        idle.as_mut().reset(Instant::now() + timeout);
                    }
                }
            }
        }

        queue.close();
        drop(queue);
        let _ = writer.shutdown().await;
        self.sink.record(&ConnectionEvent::FlowExited {
            name: &self.name,
            flow: Flow::Write,
        });
    }

    fn fire_idle_timeout(self: &Arc<Self>, idle: Duration) {
        self.sink.record(&ConnectionEvent::IdleTimeout {
            name: &self.name,
            idle,
        });
        let callback = self.idle_callback.read().clone();
        if let Some(callback) = callback {
            callback(self);
        }
    }
}

impl<C: Codec> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("idle_timeout", &self.idle_timeout())
            .field("read_timeout", &self.read_timeout())
            .finish()
    }
}

/// Marks one flow as exited when dropped, including on panic or when the
/// task is dropped before it first runs.
struct FlowExit<C: Codec>(Arc<Connection<C>>);

impl<C: Codec> Drop for FlowExit<C> {
    fn drop(&mut self) {
        self.0
            .running
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Assembles a `Connection` before its flows start.
pub struct ConnectionBuilder<C: Codec> {
    id: ConnectionId,
    codec: C,
    options: ConnectionOptions,
    callbacks: Callbacks<C>,
    sink: Arc<dyn EventSink>,
}

impl<C: Codec> ConnectionBuilder<C> {
    /// Applies connection options.
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the whole callback set.
    pub fn callbacks(mut self, callbacks: Callbacks<C>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Sets the established callback.
    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Connection<C>>) + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.on_connect(callback);
        self
    }

    /// Sets the close callback.
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Connection<C>>) + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.on_close(callback);
        self
    }

    /// Sets the read callback.
    pub fn on_read<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Connection<C>>, Message<Inbound<C>>) + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.on_read(callback);
        self
    }

    /// Sets the idle-timeout callback.
    pub fn on_idle_timeout<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Connection<C>>) + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.on_idle_timeout(callback);
        self
    }

    /// Routes this connection's events to `sink` instead of `TracingSink`.
    pub fn sink<S: EventSink>(self, sink: S) -> Self {
        self.shared_sink(Arc::new(sink))
    }

    pub(crate) fn shared_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Starts the connection over an arbitrary pair of stream halves.
    ///
    /// Fires the established callback synchronously, then spawns the read and
    /// write flows on the current tokio runtime and returns at once.
    pub fn start<R, W>(self, reader: R, writer: W, peer: impl Into<String>) -> Arc<Connection<C>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let ConnectionBuilder {
            id,
            codec,
            options,
            callbacks,
            sink,
        } = self;

        let (decoder, encoder) = codec.split();
        let (outbound, queue) = mpsc::channel(options.queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let peer = peer.into();

        let conn = Arc::new(Connection {
            id,
            name: format!("{peer}-{id}"),
            peer,
            state: AtomicU8::new(CloseState::Open.as_u8()),
            outbound,
            idle_timeout: AtomicU64::new(duration_to_nanos(options.idle_timeout)),
            read_timeout: AtomicU64::new(options.read_timeout.map_or(0, duration_to_nanos)),
            idle_rearm: Notify::new(),
            idle_callback: RwLock::new(callbacks.on_idle_timeout.clone()),
            callbacks,
            sink,
            running: watch::channel(2).0,
            flows: Mutex::new(Vec::with_capacity(2)),
            shutdown,
        });

        conn.sink
            .record(&ConnectionEvent::Established { name: &conn.name });
        if let Some(callback) = &conn.callbacks.on_connect {
            callback(&conn);
        }

        let started = Instant::now();
        let read = tokio::spawn(Arc::clone(&conn).read_loop(
            decoder,
            reader,
            conn.shutdown.subscribe(),
            options.read_buffer_capacity,
            FlowExit(Arc::clone(&conn)),
        ));
        let write = tokio::spawn(Arc::clone(&conn).write_loop(
            encoder,
            writer,
            queue,
            conn.shutdown.subscribe(),
            started,
            FlowExit(Arc::clone(&conn)),
        ));
        conn.flows.lock().extend([read, write]);
        conn
    }

    /// Starts the connection over an accepted or dialed TCP stream.
    pub fn start_tcp(self, stream: TcpStream) -> io::Result<Arc<Connection<C>>> {
        let (reader, writer, peer) = split_tcp(stream, self.options.nodelay)?;
        Ok(self.start(reader, writer, peer))
    }
}

impl<C: Codec> fmt::Debug for ConnectionBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// Applies socket options and splits a TCP stream into owned halves.
pub(crate) fn split_tcp(
    stream: TcpStream,
    nodelay: bool,
) -> io::Result<(OwnedReadHalf, OwnedWriteHalf, String)> {
    if nodelay {
        stream.set_nodelay(true)?;
    }
    let peer = stream.peer_addr()?.to_string();
    let (reader, writer) = stream.into_split();
    Ok((reader, writer, peer))
}

async fn write_frame<E, W>(
    encoder: &mut E,
    writer: &mut W,
    out: &mut BytesMut,
    body: E::Item,
) -> SockResult<()>
where
    E: Encoder,
    W: AsyncWrite + Unpin,
{
    out.clear();
    encoder.encode(body, out)?;
    writer.write_all(out).await?;
    writer.flush().await?;
    Ok(())
}

/// Resolves once teardown has been signalled.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
