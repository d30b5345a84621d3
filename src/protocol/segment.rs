use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{DecodingError, EncodingError};

pub const HEADER_LEN: usize = 24;
pub const WEAK_ACK_LEN: usize = 1;
pub const VERSION: u16 = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Command {
    Push = 81,
    Ack = 82,
    Again = 83,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Mode {
    /// Acknowledge with a full segment; ask for retransmissions when
    /// fragments pile up out of order.
    Half = 91,
    /// Acknowledge with a single byte. Caps messages at 256 fragments.
    Weak = 92,
    /// No acknowledgments at all; every fragment is sent repeatedly
    /// and hoped for.
    Single = 93,
}

pub struct SegmentHeaderBuilder {
    pub conv: u32,
    pub frg: u32,
    pub ts: u32,
    pub sn: u32,
    pub cmd: Command,
    pub mode: Mode,
    pub ver: u16,
    pub len: u16,
}

impl SegmentHeaderBuilder {
    #[must_use]
    pub fn build(self) -> SegmentHeader {
        let this = SegmentHeader {
            conv: self.conv,
            frg: self.frg,
            ts: self.ts,
            sn: self.sn,
            cmd: self.cmd,
            mode: self.mode,
            ver: self.ver,
            len: self.len,
        };
        this.check_rep();
        this
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    conv: u32,
    frg: u32,
    ts: u32,
    sn: u32,
    cmd: Command,
    mode: Mode,
    ver: u16,
    len: u16,
}

impl SegmentHeader {
    #[inline]
    fn check_rep(&self) {}

    pub fn from_bytes(rdr: &mut io::Cursor<&[u8]>) -> Result<Self, DecodingError> {
        let conv = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "conv" })?;
        let frg = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "frg" })?;
        let ts = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "ts" })?;
        let sn = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "sn" })?;
        let cmd = rdr
            .read_u16::<LittleEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "cmd" })?;
        let cmd = Command::try_from(cmd).map_err(|_e| DecodingError::Decoding { field: "cmd" })?;
        let mode = rdr
            .read_u16::<LittleEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "mode" })?;
        let mode = Mode::try_from(mode).map_err(|_e| DecodingError::Decoding { field: "mode" })?;
        let ver = rdr
            .read_u16::<LittleEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "ver" })?;
        let len = rdr
            .read_u16::<LittleEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "len" })?;
        let this = SegmentHeader {
            conv,
            frg,
            ts,
            sn,
            cmd,
            mode,
            ver,
            len,
        };
        this.check_rep();
        Ok(this)
    }

    /// Writes the header into the front of `buf` and returns the number
    /// of bytes written, always [`HEADER_LEN`].
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodingError> {
        let mut wtr = io::Cursor::new(buf);
        wtr.write_u32::<LittleEndian>(self.conv)
            .map_err(|_e| EncodingError::NotEnoughSpace)?;
        wtr.write_u32::<LittleEndian>(self.frg)
            .map_err(|_e| EncodingError::NotEnoughSpace)?;
        wtr.write_u32::<LittleEndian>(self.ts)
            .map_err(|_e| EncodingError::NotEnoughSpace)?;
        wtr.write_u32::<LittleEndian>(self.sn)
            .map_err(|_e| EncodingError::NotEnoughSpace)?;
        wtr.write_u16::<LittleEndian>(self.cmd.into())
            .map_err(|_e| EncodingError::NotEnoughSpace)?;
        wtr.write_u16::<LittleEndian>(self.mode.into())
            .map_err(|_e| EncodingError::NotEnoughSpace)?;
        wtr.write_u16::<LittleEndian>(self.ver)
            .map_err(|_e| EncodingError::NotEnoughSpace)?;
        wtr.write_u16::<LittleEndian>(self.len)
            .map_err(|_e| EncodingError::NotEnoughSpace)?;
        let end = wtr.position() as usize;
        assert_eq!(end, HEADER_LEN);
        Ok(end)
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        let len = self.encode(&mut buf).unwrap();
        assert_eq!(len, HEADER_LEN);
        buf
    }

    #[must_use]
    #[inline]
    pub fn conv(&self) -> u32 {
        self.conv
    }

    #[must_use]
    #[inline]
    pub fn frg(&self) -> u32 {
        self.frg
    }

    #[must_use]
    #[inline]
    pub fn ts(&self) -> u32 {
        self.ts
    }

    #[must_use]
    #[inline]
    pub fn sn(&self) -> u32 {
        self.sn
    }

    #[must_use]
    #[inline]
    pub fn cmd(&self) -> Command {
        self.cmd
    }

    #[must_use]
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    #[inline]
    pub fn ver(&self) -> u16 {
        self.ver
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> u16 {
        self.len
    }
}
