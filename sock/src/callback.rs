//! Lifecycle callback slots.
//!
//! Each slot holds one shared function value. A connection captures its own
//! copy of the slots when it is created, so later changes on the client only
//! affect connections created afterwards.

use std::fmt;
use std::sync::Arc;

use sock_common::Message;

use crate::codec::{Codec, Inbound};
use crate::connection::Connection;

/// Callback receiving only the connection (established, closed, idle).
pub type ConnectionCallback<C> = Arc<dyn Fn(&Arc<Connection<C>>) + Send + Sync>;

/// Callback receiving one decoded message.
pub type ReadCallback<C> = Arc<dyn Fn(&Arc<Connection<C>>, Message<Inbound<C>>) + Send + Sync>;

/// The set of callbacks wired onto a connection.
///
/// All callbacks run synchronously on the connection's internal flows and
/// must not block for long.
pub struct Callbacks<C: Codec> {
    pub(crate) on_connect: Option<ConnectionCallback<C>>,
    pub(crate) on_close: Option<ConnectionCallback<C>>,
    pub(crate) on_read: Option<ReadCallback<C>>,
    pub(crate) on_idle_timeout: Option<ConnectionCallback<C>>,
}

impl<C: Codec> Callbacks<C> {
    /// Creates an empty callback set.
    pub fn new() -> Self {
        Callbacks {
            on_connect: None,
            on_close: None,
            on_read: None,
            on_idle_timeout: None,
        }
    }

    /// Fired once, before the read and write flows start.
    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Connection<C>>) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Fired exactly once, when the close transition is won.
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Connection<C>>) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(callback));
        self
    }

    /// Fired once per decoded message, in arrival order.
    pub fn on_read<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Connection<C>>, Message<Inbound<C>>) + Send + Sync + 'static,
    {
        self.on_read = Some(Arc::new(callback));
        self
    }

    /// Fired whenever the idle threshold passes without an outbound write.
    pub fn on_idle_timeout<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Connection<C>>) + Send + Sync + 'static,
    {
        self.on_idle_timeout = Some(Arc::new(callback));
        self
    }
}

impl<C: Codec> Default for Callbacks<C> {
    fn default() -> Self {
        Self::new()
    }
}

// Manual impl: cloning shares the Arcs and must not require `C: Clone`.
impl<C: Codec> Clone for Callbacks<C> {
    fn clone(&self) -> Self {
        Callbacks {
            on_connect: self.on_connect.clone(),
            on_close: self.on_close.clone(),
            on_read: self.on_read.clone(),
            on_idle_timeout: self.on_idle_timeout.clone(),
        }
    }
}

impl<C: Codec> fmt::Debug for Callbacks<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_read", &self.on_read.is_some())
            .field("on_idle_timeout", &self.on_idle_timeout.is_some())
            .finish()
    }
}
