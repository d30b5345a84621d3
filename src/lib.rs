//! Reliable, ordered, fragmenting message delivery over an unreliable,
//! message-oriented transport.
//!
//! A [`session::Session`] tracks one conversation between two endpoints:
//! payloads are split into bounded-size fragments, pushed through the
//! transport, acknowledged and retransmitted until delivered, and
//! reassembled in their original order on the far side.

pub mod protocol;
pub mod session;
pub mod transport;
pub mod utils;
