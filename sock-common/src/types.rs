//! # Connection Type Definitions
//!
//! Core value types shared by the connection flows, the client and the
//! callbacks that observe them.
//!
//! ## Design Principles
//!
//! 1. **Newtype Identity**: Connection ids are a `u32` newtype so they cannot be
//!    mixed up with lengths or counters.
//!
//! 2. **Immutable Messages**: A decoded message is built once by the read flow
//!    and handed to the read callback by value.
//!
//! 3. **Byte-Sized Close State**: The tri-state close flag is `repr(u8)` so it
//!    can live in an `AtomicU8` and move with compare-and-swap.
//!
//! ## Close State Transitions
//!
//! ```text
//! Open --(CAS winner)--> Closing --(teardown done)--> Closed
//! ```

use std::fmt;

/// Identifier assigned to a connection by the client that created it.
///
/// Ids start at 1 for the first successful dial and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConnectionId(u32);

impl ConnectionId {
    /// Wraps a raw id.
    pub const fn new(raw: u32) -> Self {
        ConnectionId(raw)
    }

    /// Returns the raw id.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the id that follows this one.
    ///
    /// Wraps at `u32::MAX` the same way an unsigned counter would.
    pub const fn next(self) -> Self {
        ConnectionId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ConnectionId {
    fn from(raw: u32) -> Self {
        ConnectionId(raw)
    }
}

/// One decoded application message.
///
/// The body type depends on the codec bound to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<T> {
    id: ConnectionId,
    body: T,
}

impl<T> Message<T> {
    /// Creates a message for the given connection.
    pub fn new(id: ConnectionId, body: T) -> Self {
        Message { id, body }
    }

    /// Id of the connection that decoded this message.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Borrow the decoded body.
    pub fn body(&self) -> &T {
        &self.body
    }

    /// Take ownership of the decoded body.
    pub fn into_body(self) -> T {
        self.body
    }
}

/// Close state of a connection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseState {
    /// Both flows may run and callbacks may fire.
    Open = 0,
    /// The close transition was won; teardown is in progress.
    Closing = 1,
    /// Teardown finished; no further callback fires.
    Closed = 2,
}

impl CloseState {
    /// Returns the `u8` representation stored in the atomic flag.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a raw flag value back into a state.
    ///
    /// Unknown values map to `Closed` so a corrupt flag never reopens.
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CloseState::Open,
            1 => CloseState::Closing,
            _ => CloseState::Closed,
        }
    }

    /// Returns true for `Closing` and `Closed`.
    pub const fn is_closed(self) -> bool {
        !matches!(self, CloseState::Open)
    }
}

impl fmt::Display for CloseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CloseState::Open => "open",
            CloseState::Closing => "closing",
            CloseState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_sequence() {
        let first = ConnectionId::default().next();
        assert_eq!(first.get(), 1);
        assert_eq!(first.next().get(), 2);
        assert_eq!(first.to_string(), "1");
    }

    #[test]
    fn test_connection_id_wraps() {
        let last = ConnectionId::new(u32::MAX);
        assert_eq!(last.next(), ConnectionId::new(0));
    }

    #[test]
    fn test_message_accessors() {
        let msg = Message::new(ConnectionId::new(7), "pong".to_string());
        assert_eq!(msg.id(), ConnectionId::new(7));
        assert_eq!(msg.body(), "pong");
        assert_eq!(msg.into_body(), "pong");
    }

    #[test]
    fn test_close_state_roundtrip() {
        for state in [CloseState::Open, CloseState::Closing, CloseState::Closed] {
            assert_eq!(CloseState::from_u8(state.as_u8()), state);
        }
        assert_eq!(CloseState::from_u8(42), CloseState::Closed);
    }

    #[test]
    fn test_close_state_is_closed() {
        assert!(!CloseState::Open.is_closed());
        assert!(CloseState::Closing.is_closed());
        assert!(CloseState::Closed.is_closed());
        assert_eq!(CloseState::Closing.to_string(), "closing");
    }
}
