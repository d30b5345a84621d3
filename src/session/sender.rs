use tracing::{debug, warn};

use crate::protocol::segment::{Command, Mode, SegmentHeaderBuilder};
use crate::transport::{Clock, Transport};

use super::node::SegmentNode;
use super::{Error, Session, ACK_TIMEOUT_MS, SINGLE_REPEATS, WEAK_MAX_FRAGMENTS};

impl<T, C> Session<T, C>
where
    T: Transport,
    C: Clock,
{
    /// Sends `payload` as one message and returns its length.
    ///
    /// The payload is split into fragments of at most
    /// [`Session::mss`] bytes and every fragment is put on the wire.
    /// Under [`Mode::Half`] and [`Mode::Weak`] the call then drives the
    /// conversation until the peer has acknowledged each fragment,
    /// resending any that stay quiet for [`ACK_TIMEOUT_MS`]; a session
    /// built with a resend limit gives up with [`Error::ResendLimit`]
    /// instead of retrying forever. Under [`Mode::Single`] the call
    /// returns as soon as every fragment has been sent
    /// [`SINGLE_REPEATS`] times.
    pub fn send(&mut self, payload: &[u8]) -> Result<usize, Error> {
        if self.mode == Mode::Weak {
            let limit = WEAK_MAX_FRAGMENTS * self.mss;
            if payload.len() > limit {
                return Err(Error::PayloadTooLarge {
                    len: payload.len(),
                    limit,
                });
            }
        }
        let count = if payload.len() <= self.mss {
            1
        } else {
            (payload.len() + self.mss - 1) / self.mss
        };
        if count > u32::MAX as usize {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                limit: (u32::MAX as usize).saturating_mul(self.mss),
            });
        }
        for i in 0..count {
            let at = i * self.mss;
            let end = usize::min(at + self.mss, payload.len());
            let body = payload[at..end].to_vec();
            let hdr = SegmentHeaderBuilder {
                conv: self.conv,
                frg: (count - 1 - i) as u32,
                ts: self.clock.now_ms(),
                sn: count as u32,
                cmd: Command::Push,
                mode: self.mode,
                ver: self.ver,
                len: body.len() as u16,
            }
            .build();
            self.snd_queue.push_back(SegmentNode::new(hdr, body));
        }
        self.send_flush()?;
        self.check_rep();
        Ok(payload.len())
    }

    /// Puts every queued fragment on the wire, then waits out the
    /// in-flight ones.
    ///
    /// Transport failures on this path count as ordinary loss; the
    /// timeout loop covers them.
    fn send_flush(&mut self) -> Result<(), Error> {
        while let Some(mut node) = self.snd_queue.pop_front() {
            let repeats = if self.mode == Mode::Single {
                SINGLE_REPEATS
            } else {
                1
            };
            let now = self.clock.now_ms();
            node.mark_sent(now);
            for _ in 0..repeats {
                if let Err(e) = Self::transmit(&mut self.transport, &mut self.buff, &node) {
                    warn!(%e, "push transmission failed");
                }
                self.stat.pushes_sent += 1;
            }
            match self.mode {
                Mode::Single => (),
                Mode::Half | Mode::Weak => self.snd_buf.push_back(node),
            }
        }
        if self.mode == Mode::Single {
            self.check_rep();
            return Ok(());
        }
        while !self.snd_buf.is_empty() {
            if let Err(e) = self.recv_flush() {
                warn!(%e, "inbound pass failed while waiting for acknowledgments");
            }
            let now = self.clock.now_ms();
            for node in self.snd_buf.iter_mut() {
                if !node.is_timeout(now, ACK_TIMEOUT_MS) {
                    continue;
                }
                debug!(
                    frg = node.hdr().frg(),
                    xmit = node.xmit(),
                    "acknowledgment timed out, resending"
                );
                node.mark_sent(now);
                if let Err(e) = Self::transmit(&mut self.transport, &mut self.buff, node) {
                    warn!(%e, "retransmission failed");
                }
                self.stat.retransmissions += 1;
                if let Some(limit) = self.resend_limit {
                    if node.xmit() >= limit {
                        return Err(Error::ResendLimit {
                            frg: node.hdr().frg(),
                        });
                    }
                }
            }
        }
        self.check_rep();
        Ok(())
    }
}
