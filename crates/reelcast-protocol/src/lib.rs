//! Signaling messages exchanged with the SFU
//!
//! The SFU speaks JSON-RPC 2.0 over a WebSocket. This crate only defines the
//! wire shapes; the publisher owns the connection.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
