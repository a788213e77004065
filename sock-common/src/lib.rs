// sock-common - Shared types and error definitions for the sock framework
//
// This crate defines the identity, message and close-state types plus the
// error taxonomy used by connections, codecs and the client.

pub mod error;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use types::*;
