//! # Connection Events
//!
//! Provide the observability seam for connections and clients: every
//! lifecycle transition and every locally handled failure is reported as a
//! `ConnectionEvent` to an injected `EventSink`.
//!
//! ## Design Principles
//! 1. **Injected Sink**: Connections log through the sink they were built
//!    with, never through a process-wide logger.
//! 2. **Borrowed Events**: Events borrow names and errors so recording costs
//!    no allocation.
//! 3. **Accumulator Pattern**: `CountingSink` aggregates events with atomic
//!    counters and exposes plain snapshots.
//! 4. **Composable**: A pair of sinks, or an `Arc` of a sink, is itself a sink.
//!
//! ## Notes
//! - `TracingSink` is the default sink and maps events onto `tracing` events
//!   carrying a `conn` field with the connection name.
//! - Installing a `tracing` subscriber is left to the binary.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sock_common::SockError;

/// Why an outbound message was dropped instead of queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The connection was already closing or closed.
    Closed,
    /// `try_send` found the outbound queue full.
    QueueFull,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Closed => f.write_str("closed"),
            DropReason::QueueFull => f.write_str("queue full"),
        }
    }
}

/// The two execution flows of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Decodes inbound frames and invokes the read callback.
    Read,
    /// Encodes queued messages and drives the idle timer.
    Write,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flow::Read => f.write_str("read"),
            Flow::Write => f.write_str("write"),
        }
    }
}

/// One observable event.
#[derive(Debug, Clone, Copy)]
pub enum ConnectionEvent<'a> {
    /// The established callback is about to fire.
    Established { name: &'a str },
    /// The close transition was won.
    Closed { name: &'a str },
    /// One inbound message was decoded.
    Read { name: &'a str },
    /// One outbound message was encoded and written.
    Written { name: &'a str },
    /// The idle threshold passed without an outbound write.
    IdleTimeout { name: &'a str, idle: Duration },
    /// An outbound message was dropped.
    SendDropped { name: &'a str, reason: DropReason },
    /// A message was decoded but no read callback is set.
    MissingReadCallback { name: &'a str },
    /// Decoding or reading failed; the connection will close.
    ReadFailed { name: &'a str, error: &'a SockError },
    /// Encoding or writing failed; the connection will close.
    WriteFailed { name: &'a str, error: &'a SockError },
    /// A flow task returned.
    FlowExited { name: &'a str, flow: Flow },
    /// A client dial failed; no connection was created.
    DialFailed { addr: &'a str, error: &'a SockError },
}

/// Receiver of connection events.
///
/// Implementations are called synchronously from the connection flows and
/// must be cheap.
pub trait EventSink: Send + Sync + 'static {
    /// Records one event.
    fn record(&self, event: &ConnectionEvent<'_>);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn record(&self, event: &ConnectionEvent<'_>) {
        (**self).record(event);
    }
}

impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn record(&self, event: &ConnectionEvent<'_>) {
        self.0.record(event);
        self.1.record(event);
    }
}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &ConnectionEvent<'_>) {
        match *event {
            ConnectionEvent::Established { name } => {
                tracing::info!(conn = name, "connection established");
            }
            ConnectionEvent::Closed { name } => {
                tracing::info!(conn = name, "connection closing");
            }
            ConnectionEvent::Read { name } => {
                tracing::trace!(conn = name, "message decoded");
            }
            ConnectionEvent::Written { name } => {
                tracing::trace!(conn = name, "message written");
            }
            ConnectionEvent::IdleTimeout { name, idle } => {
                tracing::debug!(conn = name, idle_ms = idle.as_millis() as u64, "idle timeout");
            }
            ConnectionEvent::SendDropped { name, reason } => {
                tracing::debug!(conn = name, %reason, "outbound message dropped");
            }
            ConnectionEvent::MissingReadCallback { name } => {
                tracing::debug!(conn = name, "no read callback set, message discarded");
            }
            ConnectionEvent::ReadFailed {
                name,
                error: SockError::PeerClosed,
            } => {
                tracing::debug!(conn = name, "peer closed the stream");
            }
            ConnectionEvent::ReadFailed { name, error } if error.is_timeout() => {
                tracing::info!(conn = name, %error, "read deadline exceeded, closing");
            }
            ConnectionEvent::ReadFailed { name, error } => {
                tracing::warn!(conn = name, %error, "read flow failed, closing");
            }
            ConnectionEvent::WriteFailed { name, error } => {
                tracing::warn!(conn = name, %error, "write flow failed, closing");
            }
            ConnectionEvent::FlowExited { name, flow } => {
                tracing::debug!(conn = name, %flow, "flow exited");
            }
            ConnectionEvent::DialFailed { addr, error } => {
                tracing::warn!(addr, %error, "dial failed");
            }
        }
    }
}

/// Snapshot of all event counters at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventsSnapshot {
    /// Connections that fired the established callback.
    pub established: u64,
    /// Connections that won the close transition.
    pub closed: u64,
    /// Messages decoded.
    pub read: u64,
    /// Messages written.
    pub written: u64,
    /// Idle-timeout firings.
    pub idle_timeouts: u64,
    /// Outbound messages dropped.
    pub dropped_sends: u64,
    /// Read flow failures.
    pub read_errors: u64,
    /// Write flow failures.
    pub write_errors: u64,
    /// Failed dials.
    pub dial_failures: u64,
}

/// Thread-safe event counters.
///
/// `Ordering::Relaxed` is sufficient because the counters are independent;
/// snapshots are eventually consistent, not a cross-field transaction.
#[derive(Debug, Default)]
pub struct CountingSink {
    established: AtomicU64,
    closed: AtomicU64,
    read: AtomicU64,
    written: AtomicU64,
    idle_timeouts: AtomicU64,
    dropped_sends: AtomicU64,
    read_errors: AtomicU64,
    write_errors: AtomicU64,
    dial_failures: AtomicU64,
}

impl CountingSink {
    /// Creates a sink with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all counters.
    ///
    /// **Input**: none.
    /// **Output**: `EventsSnapshot` with point-in-time values.
    pub fn snapshot(&self) -> EventsSnapshot {
        EventsSnapshot {
            established: self.established.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            read: self.read.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            dropped_sends: self.dropped_sends.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
        }
    }
}

impl EventSink for CountingSink {
    fn record(&self, event: &ConnectionEvent<'_>) {
        let counter = match event {
            ConnectionEvent::Established { .. } => &self.established,
            ConnectionEvent::Closed { .. } => &self.closed,
            ConnectionEvent::Read { .. } => &self.read,
            ConnectionEvent::Written { .. } => &self.written,
            ConnectionEvent::IdleTimeout { .. } => &self.idle_timeouts,
            ConnectionEvent::SendDropped { .. } => &self.dropped_sends,
            ConnectionEvent::ReadFailed { .. } => &self.read_errors,
            ConnectionEvent::WriteFailed { .. } => &self.write_errors,
            ConnectionEvent::DialFailed { .. } => &self.dial_failures,
            ConnectionEvent::MissingReadCallback { .. } | ConnectionEvent::FlowExited { .. } => {
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
