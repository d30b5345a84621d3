use crate::protocol::segment::SegmentHeader;

/// One fragment moving through the session queues, carrying its header,
/// its data, and the local transmission bookkeeping that never goes on
/// the wire.
pub struct SegmentNode {
    hdr: SegmentHeader,
    body: Vec<u8>,
    // local
    sent_at: u32,
    xmit: u32,
}

impl SegmentNode {
    fn check_rep(&self) {
        assert_eq!(self.hdr.len() as usize, self.body.len());
    }

    #[must_use]
    pub fn new(hdr: SegmentHeader, body: Vec<u8>) -> Self {
        let this = SegmentNode {
            hdr,
            body,
            sent_at: 0,
            xmit: 0,
        };
        this.check_rep();
        this
    }

    #[must_use]
    #[inline]
    pub fn hdr(&self) -> &SegmentHeader {
        &self.hdr
    }

    #[must_use]
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn mark_sent(&mut self, now: u32) {
        self.sent_at = now;
        self.xmit += 1;
    }

    /// How many times this fragment has been put on the wire.
    #[must_use]
    #[inline]
    pub fn xmit(&self) -> u32 {
        self.xmit
    }

    #[must_use]
    pub fn is_timeout(&self, now: u32, timeout_ms: u32) -> bool {
        now.wrapping_sub(self.sent_at) > timeout_ms
    }
}
