mod node;
mod receiver;
mod sender;

use std::fmt;
use std::io;

use thiserror::Error;
use tracing::warn;

use crate::protocol::segment::{SegmentHeader, HEADER_LEN, VERSION};
use crate::protocol::{DecodingError, EncodingError};
use crate::transport::{Clock, Transport};
use crate::utils::NodeQueue;
use node::SegmentNode;

pub use crate::protocol::segment::Mode;

pub const DEFAULT_MTU: usize = 1400;
/// How long an unacknowledged fragment waits before being resent.
pub const ACK_TIMEOUT_MS: u32 = 200;
/// How many times [`Mode::Single`] puts each fragment on the wire.
pub const SINGLE_REPEATS: u32 = 3;
/// Longest message [`Mode::Weak`] can carry, in fragments.
pub const WEAK_MAX_FRAGMENTS: usize = 256;
// out-of-order fragments tolerated before asking the peer for a resend
const AGAIN_BACKLOG: usize = 2;
// the scratch buffer holds this many mtu-sized wire messages
const SCRATCH_FACTOR: usize = 3;

pub struct SessionBuilder<T, C> {
    pub conv: u32,
    pub mode: Mode,
    pub mtu: usize,
    /// Give up once a fragment has been put on the wire this many times
    /// without an acknowledgment. `None` retries forever.
    pub resend_limit: Option<u32>,
    pub transport: T,
    pub clock: C,
}

impl<T, C> SessionBuilder<T, C>
where
    T: Transport,
    C: Clock,
{
    /// A builder with the defaults every conversation starts from:
    /// [`Mode::Half`] and a 1400-byte mtu.
    #[must_use]
    pub fn new(conv: u32, transport: T, clock: C) -> Self {
        SessionBuilder {
            conv,
            mode: Mode::Half,
            mtu: DEFAULT_MTU,
            resend_limit: None,
            transport,
            clock,
        }
    }

    #[must_use]
    pub fn build(self) -> Result<Session<T, C>, BuildError> {
        if self.mtu <= HEADER_LEN {
            return Err(BuildError::InvalidMtu(self.mtu));
        }
        let mss = self.mtu - HEADER_LEN;
        if mss > usize::from(u16::MAX) {
            return Err(BuildError::InvalidMtu(self.mtu));
        }
        let this = Session {
            transport: self.transport,
            clock: self.clock,
            conv: self.conv,
            mode: self.mode,
            mtu: self.mtu,
            mss,
            ver: VERSION,
            resend_limit: self.resend_limit,
            snd_queue: NodeQueue::new(),
            snd_buf: NodeQueue::new(),
            rcv_buf: NodeQueue::new(),
            rcv_queue: NodeQueue::new(),
            rcv_nxt: 0,
            last: None,
            buff: vec![0u8; SCRATCH_FACTOR * self.mtu],
            stat: LocalStat::default(),
        };
        this.check_rep();
        Ok(this)
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("mtu {0} cannot fit a segment header and data")]
    InvalidMtu(usize),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("payload of {len} bytes exceeds the {limit}-byte weak mode limit")]
    PayloadTooLarge { len: usize, limit: usize },
    #[error("message of {size} bytes does not fit the {capacity}-byte buffer")]
    BufferTooSmall { size: usize, capacity: usize },
    #[error("segment conv {got:#010x} does not match session conv {expected:#010x}")]
    ConvMismatch { got: u32, expected: u32 },
    #[error("fragment {frg} reached the resend limit without an acknowledgment")]
    ResendLimit { frg: u32 },
    #[error(transparent)]
    Decoding(#[from] DecodingError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("transport: {0}")]
    Transport(#[from] io::Error),
}

/// One endpoint of a conversation.
///
/// A session splits outbound payloads into fragments no longer than its
/// maximum segment size, delivers them through the [`Transport`]
/// according to its [`Mode`], and reassembles inbound fragments into
/// whole messages in their original order.
pub struct Session<T, C> {
    // collaborators
    transport: T,
    clock: C,
    // config
    conv: u32,
    mode: Mode,
    mtu: usize,
    mss: usize,
    ver: u16,
    resend_limit: Option<u32>,
    // queues
    snd_queue: NodeQueue<SegmentNode>,
    snd_buf: NodeQueue<SegmentNode>,
    rcv_buf: NodeQueue<SegmentNode>,
    rcv_queue: NodeQueue<SegmentNode>,
    // reassembly
    rcv_nxt: u32,
    last: Option<SegmentHeader>,
    // scratch
    buff: Vec<u8>,
    // stat
    stat: LocalStat,
}

impl<T, C> Session<T, C>
where
    T: Transport,
    C: Clock,
{
    fn check_rep(&self) {
        assert_eq!(self.mss + HEADER_LEN, self.mtu);
        assert_eq!(self.buff.len(), SCRATCH_FACTOR * self.mtu);
    }

    #[must_use]
    #[inline]
    pub fn conv(&self) -> u32 {
        self.conv
    }

    #[must_use]
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    #[inline]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Maximum segment size: the largest data length one fragment can
    /// carry.
    #[must_use]
    #[inline]
    pub fn mss(&self) -> usize {
        self.mss
    }

    #[must_use]
    #[inline]
    pub fn version(&self) -> u16 {
        self.ver
    }

    /// Switches the duplex mode. Takes effect from the next send or
    /// receive; fragments already queued are unaffected.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    #[must_use]
    pub fn stat(&self) -> Stat {
        Stat {
            pushes_sent: self.stat.pushes_sent,
            retransmissions: self.stat.retransmissions,
            acks_sent: self.stat.acks_sent,
            acks_received: self.stat.acks_received,
            agains_sent: self.stat.agains_sent,
            agains_received: self.stat.agains_received,
            duplicates_dropped: self.stat.duplicates_dropped,
            messages_delivered: self.stat.messages_delivered,
            snd_queue: self.snd_queue.len(),
            snd_buf: self.snd_buf.len(),
            rcv_buf: self.rcv_buf.len(),
            rcv_queue: self.rcv_queue.len(),
        }
    }

    /// Encodes `node` into `buff` and puts it on the wire as one
    /// message.
    fn transmit(transport: &mut T, buff: &mut [u8], node: &SegmentNode) -> Result<usize, Error> {
        let mut size = node.hdr().encode(buff)?;
        let body = node.body();
        buff[size..size + body.len()].copy_from_slice(body);
        size += body.len();
        let sent = transport.output(&buff[..size])?;
        if sent != size {
            warn!(sent, size, "transport accepted a short write");
        }
        Ok(size)
    }
}

impl<T, C> fmt::Debug for Session<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("conv", &format_args!("{:#010x}", self.conv))
            .field("mode", &self.mode)
            .field("mtu", &self.mtu)
            .field("rcv_nxt", &self.rcv_nxt)
            .field("snd_queue", &self.snd_queue.len())
            .field("snd_buf", &self.snd_buf.len())
            .field("rcv_buf", &self.rcv_buf.len())
            .field("rcv_queue", &self.rcv_queue.len())
            .finish()
    }
}

#[derive(Default)]
struct LocalStat {
    pushes_sent: u64,
    retransmissions: u64,
    acks_sent: u64,
    acks_received: u64,
    agains_sent: u64,
    agains_received: u64,
    duplicates_dropped: u64,
    messages_delivered: u64,
}

/// A point-in-time snapshot of session counters and queue depths.
#[derive(Debug, PartialEq, Eq)]
pub struct Stat {
    pub pushes_sent: u64,
    pub retransmissions: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub agains_sent: u64,
    pub agains_received: u64,
    pub duplicates_dropped: u64,
    pub messages_delivered: u64,
    pub snd_queue: usize,
    pub snd_buf: usize,
    pub rcv_buf: usize,
    pub rcv_queue: usize,
}
