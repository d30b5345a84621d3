//! # Segment header
//!
//! Every wire message longer than one byte starts with a fixed 24-byte
//! segment header, encoded little-endian:
//!
//! ```text
//! 0               4               8               12        (BYTE)
//! +---------------+---------------+---------------+
//! |     conv      |      frg      |      ts       |
//! +---------------+---------------+---------------+
//! |      sn       |  cmd  | mode  |
//! +---------------+-------+-------+
//! |  ver  |  len  |
//! +-------+-------+---------------+
//! |                               |
//! |       Data (len bytes)        |
//! |                               |
//! +-------------------------------+
//! ```
//!
//! - `conv`: conversation number shared by both endpoints.
//! - `frg`: fragment number, counting down to `0` at the last fragment
//!   of a message.
//! - `ts`: millisecond clock sample taken when the segment was built.
//! - `sn`: fragment count of the message the segment belongs to.
//! - `cmd`: [`segment::Command`].
//! - `mode`: [`segment::Mode`] of the sending endpoint.
//! - `ver`: protocol version, [`segment::VERSION`].
//! - `len`: byte length of the trailing data.
//!
//! # Weak acknowledgment
//!
//! A wire message of exactly one byte is not a segment. It is the
//! compact acknowledgment used by [`segment::Mode::Weak`]:
//!
//! ```text
//! 0   1 (BYTE)
//! +---+
//! |frg|
//! +---+
//! ```
//!
//! # Invariants
//!
//! - `len` never exceeds the sender's maximum segment size
//! - `Ack` and `Again` segments carry no data

use thiserror::Error;

pub mod segment;

#[derive(Debug, Error)]
pub enum DecodingError {
    #[error("field `{field}` cannot be decoded")]
    Decoding { field: &'static str },
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("not enough space to encode the segment")]
    NotEnoughSpace,
}
