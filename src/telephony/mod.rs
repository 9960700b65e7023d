//! Telephony media-stream plumbing.
//!
//! `protocol` is the JSON wire format; `server` (feature `server`) accepts
//! webhook and websocket connections and hands each call to a session.

pub mod protocol;
#[cfg(feature = "server")]
pub mod server;

pub use protocol::{InboundMessage, OutboundMessage};
