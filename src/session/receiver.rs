use std::io;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, warn};

use crate::protocol::segment::{
    Command, Mode, SegmentHeader, SegmentHeaderBuilder, HEADER_LEN, WEAK_ACK_LEN,
};
use crate::protocol::DecodingError;
use crate::transport::{Clock, Transport};

use super::node::SegmentNode;
use super::{Error, Session, AGAIN_BACKLOG};

impl<T, C> Session<T, C>
where
    T: Transport,
    C: Clock,
{
    /// Receives the next whole message into the front of `buf` and
    /// returns its length.
    ///
    /// Polls the transport until every fragment of the message has
    /// arrived; a quiet peer makes this spin. When `buf` is too small
    /// the message stays queued and can be taken again with a larger
    /// buffer.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let size = self.wait_complete()?;
        if buf.len() < size {
            return Err(Error::BufferTooSmall {
                size,
                capacity: buf.len(),
            });
        }
        let mut at = 0;
        while let Some(node) = self.rcv_queue.pop_front() {
            let body = node.body();
            buf[at..at + body.len()].copy_from_slice(body);
            at += body.len();
            if node.hdr().frg() == 0 {
                break;
            }
        }
        assert_eq!(at, size);
        self.stat.messages_delivered += 1;
        self.check_rep();
        Ok(at)
    }

    /// Like [`Session::recv`], but leaves the message queued.
    pub fn peek(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let size = self.wait_complete()?;
        if buf.len() < size {
            return Err(Error::BufferTooSmall {
                size,
                capacity: buf.len(),
            });
        }
        let mut at = 0;
        for node in self.rcv_queue.iter() {
            let body = node.body();
            buf[at..at + body.len()].copy_from_slice(body);
            at += body.len();
            if node.hdr().frg() == 0 {
                break;
            }
        }
        assert_eq!(at, size);
        Ok(at)
    }

    /// Byte length of the completely reassembled message at the front
    /// of the receive queue, if any.
    #[must_use]
    pub fn peek_size(&self) -> Option<usize> {
        let mut size = 0;
        for node in self.rcv_queue.iter() {
            size += usize::from(node.hdr().len());
            if node.hdr().frg() == 0 {
                return Some(size);
            }
        }
        None
    }

    fn wait_complete(&mut self) -> Result<usize, Error> {
        loop {
            self.recv_flush()?;
            if let Some(size) = self.peek_size() {
                return Ok(size);
            }
        }
    }

    /// Drains pending inbound wire messages.
    ///
    /// Pushes are acknowledged and queued for reassembly. The pass
    /// stops once the transport runs dry, after one acknowledgment or
    /// resend request, or at a message boundary.
    pub fn recv_flush(&mut self) -> Result<(), Error> {
        loop {
            let size = self.transport.input(&mut self.buff)?;
            if size == 0 {
                break;
            }
            if size == WEAK_ACK_LEN {
                let frg = u32::from(self.buff[0]);
                self.parse_ack(frg);
                break;
            }
            let hdr = {
                let mut rdr = io::Cursor::new(&self.buff[..size]);
                let conv = rdr
                    .read_u32::<LittleEndian>()
                    .map_err(|_e| DecodingError::Decoding { field: "conv" })?;
                if conv != self.conv {
                    warn!(
                        got = conv,
                        expected = self.conv,
                        "segment from a foreign conversation"
                    );
                    return Err(Error::ConvMismatch {
                        got: conv,
                        expected: self.conv,
                    });
                }
                rdr.set_position(0);
                SegmentHeader::from_bytes(&mut rdr)?
            };
            match hdr.cmd() {
                Command::Push => {
                    let end = HEADER_LEN + usize::from(hdr.len());
                    if end > size {
                        return Err(Error::Decoding(DecodingError::Decoding { field: "data" }));
                    }
                    let body = self.buff[HEADER_LEN..end].to_vec();
                    self.parse_data(SegmentNode::new(hdr, body));
                    // backlogged out-of-order fragments mean a loss; ask
                    // the peer to close the gap
                    if hdr.mode() == Mode::Half && self.rcv_buf.len() > AGAIN_BACKLOG {
                        if let Err(e) = self.request_again(self.rcv_nxt) {
                            warn!(%e, "resend request failed");
                        }
                    }
                    self.respond_ack(&hdr)?;
                    if self.rcv_nxt == u32::MAX {
                        self.rcv_nxt = 0;
                        break;
                    }
                }
                Command::Ack => {
                    self.parse_ack(hdr.frg());
                    break;
                }
                Command::Again => {
                    self.stat.agains_received += 1;
                    self.resend_requested(hdr.frg());
                    break;
                }
            }
        }
        self.check_rep();
        Ok(())
    }

    fn parse_ack(&mut self, frg: u32) {
        if self
            .snd_buf
            .remove_where(|queued| queued.hdr().frg() == frg)
            .is_some()
        {
            self.stat.acks_received += 1;
            debug!(frg, "fragment acknowledged");
        }
    }

    fn parse_data(&mut self, node: SegmentNode) {
        let hdr = *node.hdr();
        let mut repeat = false;
        match self.last {
            Some(last)
                if last.frg() == hdr.frg() && last.sn() == hdr.sn() && last.ts() == hdr.ts() =>
            {
                repeat = true;
            }
            _ => self.last = Some(hdr),
        }
        // the opening fragment of a message seeds the countdown when
        // reassembly is idle
        if hdr.sn().wrapping_sub(hdr.frg()) == 1 && self.rcv_nxt == 0 {
            self.rcv_nxt = hdr.frg();
        }
        if !repeat
            && self
                .rcv_buf
                .iter()
                .any(|queued| queued.hdr().frg() == hdr.frg())
        {
            repeat = true;
        }
        if repeat {
            self.stat.duplicates_dropped += 1;
            debug!(frg = hdr.frg(), sn = hdr.sn(), "duplicate fragment dropped");
        } else {
            self.rcv_buf.push_back(node);
        }
        loop {
            let expected = self.rcv_nxt;
            match self
                .rcv_buf
                .remove_where(|queued| queued.hdr().frg() == expected)
            {
                Some(ready) => {
                    self.rcv_queue.push_back(ready);
                    self.rcv_nxt = self.rcv_nxt.wrapping_sub(1);
                }
                None => break,
            }
        }
    }

    /// Acknowledges one push the way the push's own mode asks for.
    fn respond_ack(&mut self, hdr: &SegmentHeader) -> Result<(), Error> {
        match hdr.mode() {
            Mode::Half => {
                let ack = SegmentHeaderBuilder {
                    conv: self.conv,
                    frg: hdr.frg(),
                    ts: self.clock.now_ms(),
                    sn: 1,
                    cmd: Command::Ack,
                    mode: hdr.mode(),
                    ver: self.ver,
                    len: 0,
                }
                .build();
                let size = ack.encode(&mut self.buff)?;
                self.transport.output(&self.buff[..size])?;
                self.stat.acks_sent += 1;
            }
            Mode::Weak => {
                self.buff[0] = hdr.frg() as u8;
                self.transport.output(&self.buff[..WEAK_ACK_LEN])?;
                self.stat.acks_sent += 1;
            }
            Mode::Single => (),
        }
        Ok(())
    }

    fn request_again(&mut self, frg: u32) -> Result<(), Error> {
        let again = SegmentHeaderBuilder {
            conv: self.conv,
            frg,
            ts: self.clock.now_ms(),
            sn: 1,
            cmd: Command::Again,
            mode: self.mode,
            ver: self.ver,
            len: 0,
        }
        .build();
        let size = again.encode(&mut self.buff)?;
        self.transport.output(&self.buff[..size])?;
        self.stat.agains_sent += 1;
        debug!(frg, "asked the peer to resend");
        Ok(())
    }

    fn resend_requested(&mut self, frg: u32) {
        let now = self.clock.now_ms();
        if let Some(node) = self
            .snd_buf
            .iter_mut()
            .find(|queued| queued.hdr().frg() == frg)
        {
            debug!(frg, "peer asked for a resend");
            node.mark_sent(now);
            if let Err(e) = Self::transmit(&mut self.transport, &mut self.buff, node) {
                warn!(%e, "requested resend failed");
            }
            self.stat.retransmissions += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;
    use crate::protocol::segment::VERSION;
    use crate::session::SessionBuilder;

    const CONV: u32 = 0x11223344;

    #[derive(Clone)]
    struct Script {
        inbox: Rc<RefCell<VecDeque<Vec<u8>>>>,
        sent: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl Script {
        fn new() -> Self {
            Script {
                inbox: Rc::new(RefCell::new(VecDeque::new())),
                sent: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn feed(&self, bytes: Vec<u8>) {
            self.inbox.borrow_mut().push_back(bytes);
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.borrow().clone()
        }
    }

    impl Transport for Script {
        fn input(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.inbox.borrow_mut().pop_front() {
                Some(msg) => {
                    buf[..msg.len()].copy_from_slice(&msg);
                    Ok(msg.len())
                }
                None => Ok(0),
            }
        }

        fn output(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.borrow_mut().push(buf.to_vec());
            Ok(buf.len())
        }
    }

    struct FrozenClock;

    impl Clock for FrozenClock {
        fn now_ms(&mut self) -> u32 {
            0
        }
    }

    fn session(script: &Script) -> Session<Script, FrozenClock> {
        SessionBuilder::new(CONV, script.clone(), FrozenClock)
            .build()
            .unwrap()
    }

    fn push_bytes(conv: u32, frg: u32, ts: u32, sn: u32, mode: Mode, body: &[u8]) -> Vec<u8> {
        let hdr = SegmentHeaderBuilder {
            conv,
            frg,
            ts,
            sn,
            cmd: Command::Push,
            mode,
            ver: VERSION,
            len: body.len() as u16,
        }
        .build();
        let mut bytes = hdr.to_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    fn decode(bytes: &[u8]) -> SegmentHeader {
        let mut rdr = io::Cursor::new(bytes);
        SegmentHeader::from_bytes(&mut rdr).unwrap()
    }

    #[test]
    fn test_in_order_delivery() {
        let script = Script::new();
        let mut session = session(&script);
        script.feed(push_bytes(CONV, 2, 1, 3, Mode::Half, b"aa"));
        script.feed(push_bytes(CONV, 1, 2, 3, Mode::Half, b"bb"));
        script.feed(push_bytes(CONV, 0, 3, 3, Mode::Half, b"cc"));

        let mut buf = [0u8; 16];
        let recv = session.recv(&mut buf).unwrap();
        assert_eq!(&buf[..recv], b"aabbcc");
        assert_eq!(session.stat().acks_sent, 3);
        assert_eq!(session.stat().messages_delivered, 1);
        assert_eq!(session.stat().rcv_buf, 0);
        assert_eq!(session.stat().rcv_queue, 0);

        // every push is acknowledged with a full segment
        let sent = script.sent();
        assert_eq!(sent.len(), 3);
        for (i, frg) in [2u32, 1, 0].iter().enumerate() {
            let ack = decode(&sent[i]);
            assert_eq!(ack.cmd(), Command::Ack);
            assert_eq!(ack.frg(), *frg);
            assert_eq!(ack.sn(), 1);
            assert_eq!(ack.len(), 0);
        }
    }

    #[test]
    fn test_scattered_arrival_reassembles() {
        let script = Script::new();
        let mut session = session(&script);
        // fragments of one 4-fragment message, arriving shuffled
        script.feed(push_bytes(CONV, 3, 1, 4, Mode::Half, b"aa"));
        script.feed(push_bytes(CONV, 1, 3, 4, Mode::Half, b"cc"));
        script.feed(push_bytes(CONV, 0, 4, 4, Mode::Half, b"dd"));

        session.recv_flush().unwrap();
        assert_eq!(session.peek_size(), None);
        assert_eq!(session.stat().rcv_buf, 2);
        assert_eq!(session.stat().rcv_queue, 1);

        // the hole closes; frg 1 is buried behind frg 0 and must still
        // be found
        script.feed(push_bytes(CONV, 2, 2, 4, Mode::Half, b"bb"));
        let mut buf = [0u8; 16];
        let recv = session.recv(&mut buf).unwrap();
        assert_eq!(&buf[..recv], b"aabbccdd");
        assert_eq!(session.stat().rcv_buf, 0);
    }

    #[test]
    fn test_exact_duplicate_dropped() {
        let script = Script::new();
        let mut session = session(&script);
        script.feed(push_bytes(CONV, 0, 7, 1, Mode::Half, b"hi"));
        script.feed(push_bytes(CONV, 0, 7, 1, Mode::Half, b"hi"));

        session.recv_flush().unwrap();
        session.recv_flush().unwrap();
        assert_eq!(session.stat().duplicates_dropped, 1);
        // the duplicate is still acknowledged; its first ack may have
        // been lost
        assert_eq!(session.stat().acks_sent, 2);

        let mut buf = [0u8; 16];
        assert_eq!(session.recv(&mut buf).unwrap(), 2);
        assert_eq!(session.peek_size(), None);
    }

    #[test]
    fn test_reissued_fragment_dropped_by_buffer_scan() {
        let script = Script::new();
        let mut session = session(&script);
        // frg 0 waits in the reassembly buffer, then shows up again
        // with a fresh timestamp: the last-segment check misses, the
        // buffer scan catches it
        script.feed(push_bytes(CONV, 2, 100, 3, Mode::Half, b"aa"));
        script.feed(push_bytes(CONV, 0, 150, 3, Mode::Half, b"cc"));
        script.feed(push_bytes(CONV, 0, 250, 3, Mode::Half, b"cc"));

        session.recv_flush().unwrap();
        assert_eq!(session.stat().duplicates_dropped, 1);
        assert_eq!(session.stat().rcv_queue, 1);
        assert_eq!(session.stat().rcv_buf, 1);

        script.feed(push_bytes(CONV, 1, 120, 3, Mode::Half, b"bb"));
        let mut buf = [0u8; 16];
        let recv = session.recv(&mut buf).unwrap();
        assert_eq!(&buf[..recv], b"aabbcc");
    }

    #[test]
    fn test_backlog_triggers_resend_request() {
        let script = Script::new();
        let mut session = session(&script);
        // frg 3 of five never arrives on its own
        script.feed(push_bytes(CONV, 4, 1, 5, Mode::Half, b"aa"));
        script.feed(push_bytes(CONV, 2, 3, 5, Mode::Half, b"cc"));
        script.feed(push_bytes(CONV, 1, 4, 5, Mode::Half, b"dd"));
        script.feed(push_bytes(CONV, 0, 5, 5, Mode::Half, b"ee"));

        session.recv_flush().unwrap();
        assert_eq!(session.stat().agains_sent, 1);
        let agains: Vec<SegmentHeader> = script
            .sent()
            .iter()
            .map(|msg| decode(msg))
            .filter(|hdr| hdr.cmd() == Command::Again)
            .collect();
        assert_eq!(agains.len(), 1);
        assert_eq!(agains[0].frg(), 3);
        assert_eq!(agains[0].sn(), 1);
        assert_eq!(agains[0].len(), 0);

        script.feed(push_bytes(CONV, 3, 2, 5, Mode::Half, b"bb"));
        let mut buf = [0u8; 16];
        let recv = session.recv(&mut buf).unwrap();
        assert_eq!(&buf[..recv], b"aabbccddee");
        assert_eq!(session.stat().acks_sent, 5);
    }

    #[test]
    fn test_weak_push_acked_with_one_byte() {
        let script = Script::new();
        let mut session = session(&script);
        script.feed(push_bytes(CONV, 0, 1, 1, Mode::Weak, b"x"));

        let mut buf = [0u8; 4];
        assert_eq!(session.recv(&mut buf).unwrap(), 1);
        assert_eq!(script.sent(), vec![vec![0u8]]);
    }

    #[test]
    fn test_conv_mismatch_rejected() {
        let script = Script::new();
        let mut session = session(&script);
        // foreign conversation, and a garbage cmd on top; the conv
        // check must win
        let mut bytes = push_bytes(0x0bad0bad, 0, 1, 1, Mode::Half, b"zz");
        bytes[16] = 9;
        script.feed(bytes);

        match session.recv_flush() {
            Err(Error::ConvMismatch { got, expected }) => {
                assert_eq!(got, 0x0bad0bad);
                assert_eq!(expected, CONV);
            }
            other => panic!("expected a conv mismatch, got {:?}", other),
        }
        assert_eq!(session.stat().acks_sent, 0);
        assert_eq!(session.stat().rcv_buf, 0);
    }

    #[test]
    fn test_undecodable_segment_rejected() {
        let script = Script::new();
        let mut session = session(&script);
        let mut bytes = push_bytes(CONV, 0, 1, 1, Mode::Half, b"zz");
        bytes[16] = 9; // unknown cmd
        script.feed(bytes);
        match session.recv_flush() {
            Err(Error::Decoding(DecodingError::Decoding { field })) => assert_eq!(field, "cmd"),
            other => panic!("expected a decoding error, got {:?}", other),
        }

        // truncated header
        script.feed(push_bytes(CONV, 0, 1, 1, Mode::Half, b"")[..10].to_vec());
        match session.recv_flush() {
            Err(Error::Decoding(DecodingError::Decoding { field })) => assert_eq!(field, "ts"),
            other => panic!("expected a decoding error, got {:?}", other),
        }

        // len promises more data than the wire message carries
        let mut bytes = push_bytes(CONV, 0, 1, 1, Mode::Half, b"zz");
        bytes[22] = 200;
        script.feed(bytes);
        match session.recv_flush() {
            Err(Error::Decoding(DecodingError::Decoding { field })) => assert_eq!(field, "data"),
            other => panic!("expected a decoding error, got {:?}", other),
        }
    }

    #[test]
    fn test_boundary_stops_the_read_pass() {
        let script = Script::new();
        let mut session = session(&script);
        script.feed(push_bytes(CONV, 0, 1, 1, Mode::Half, b"first"));
        script.feed(push_bytes(CONV, 0, 2, 1, Mode::Half, b"second"));

        session.recv_flush().unwrap();
        assert_eq!(session.stat().rcv_queue, 1);
        assert_eq!(session.peek_size(), Some(5));

        let mut buf = [0u8; 16];
        let n = session.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"first");
        let n = session.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"second");
        assert_eq!(session.stat().messages_delivered, 2);
    }

    #[test]
    fn test_peek_leaves_the_message_queued() {
        let script = Script::new();
        let mut session = session(&script);
        script.feed(push_bytes(CONV, 1, 1, 2, Mode::Half, b"hel"));
        script.feed(push_bytes(CONV, 0, 2, 2, Mode::Half, b"lo"));

        let mut buf = [0u8; 8];
        assert_eq!(session.peek(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(session.peek_size(), Some(5));

        let mut tiny = [0u8; 2];
        match session.recv(&mut tiny) {
            Err(Error::BufferTooSmall { size, capacity }) => {
                assert_eq!(size, 5);
                assert_eq!(capacity, 2);
            }
            other => panic!("expected a too-small buffer, got {:?}", other),
        }

        // nothing was consumed; a big enough buffer still gets it
        assert_eq!(session.recv(&mut buf).unwrap(), 5);
        assert_eq!(session.peek_size(), None);
    }
}
