use std::io;
use std::time::Instant;

/// The unreliable, message-oriented link a session runs over.
///
/// One call moves at most one whole wire message; the transport must
/// preserve message boundaries but may drop, duplicate, or reorder
/// messages freely.
pub trait Transport {
    /// Reads the next pending inbound message into the front of `buf`.
    ///
    /// Returns the message length, or `Ok(0)` when nothing is pending.
    /// A nonblocking source should map its would-block condition to
    /// `Ok(0)`.
    fn input(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Sends `buf` as one outbound message and returns the number of
    /// bytes the link accepted.
    fn output(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Millisecond clock a session samples for segment timestamps and
/// retransmission timeouts. Expected to wrap at `u32::MAX`.
pub trait Clock {
    fn now_ms(&mut self) -> u32;
}

/// Wall clock counting milliseconds from its creation.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&mut self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }
}
