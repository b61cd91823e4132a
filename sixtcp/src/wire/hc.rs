//! TCP header compression.
//!
//! Both ends of a connection keep the last sequence, acknowledgement and window values that went
//! over the wire in each direction. A compressed header only carries what changed relative to
//! those, the ports are replaced by a 16-bit context id that both ends agreed on in the first
//! segment of the connection.
//!
//! There are three forms, distinguished by the first byte of the transport payload:
//!
//! ```text
//! FULL:        0x01 | context id (16) | ordinary TCP header | payload
//! COMPRESSED:  101 flags (13) | context id (16) | seq (0,1,2,4) | ack (0,1,2,4) | win (0,1,2)
//!              | checksum (16) | payload
//! MOSTLY:      100 flags (13) | context id (16) | seq (4) | ack (4) | win (2)
//!              | checksum (16) | payload
//! ```
//!
//! The 16-bit flags word of the compressed forms is laid out as:
//!
//! ```text
//!  15 14 13 | 12 11 | 10 9 | 8 7 |  6  |  5  |  4  |  3  | 2 1 0
//!   1  0  m |  seq  |  ack | win | FIN | ACK | RST | PSH |   0
//! ```
//!
//! where `m` is `1` for the compressed and `0` for the mostly compressed form. Each two bit field
//! selects the [`Encoding`] of the value. The checksum is the ordinary TCP checksum of the
//! segment as it would have been sent uncompressed, so the receiver verifies it over the
//! reconstructed header. A compressed header never carries SYN or options.
//!
//! [`Encoding`]: enum.Encoding.html
use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};
use super::tcp::{Flags, SeqNumber};

/// First byte of a segment in full form.
pub const FULL_MARKER: u8 = 0x01;

/// The longest compressed header, that is the mostly compressed form.
pub const MAX_HEADER_LEN: usize = 2 + 2 + 4 + 4 + 2 + 2;

/// Length of the prefix in front of the ordinary TCP header in full form.
pub const FULL_PREFIX_LEN: usize = 3;

mod field {
    pub(crate) const FORM_MASK: u16 = 0xe000;
    pub(crate) const FORM_COMPRESSED: u16 = 0xa000;
    pub(crate) const FORM_MOSTLY: u16 = 0x8000;

    pub(crate) const SEQ_SHIFT: u16 = 11;
    pub(crate) const ACK_SHIFT: u16 = 9;
    pub(crate) const WIN_SHIFT: u16 = 7;

    pub(crate) const FLG_FIN: u16 = 1 << 6;
    pub(crate) const FLG_ACK: u16 = 1 << 5;
    pub(crate) const FLG_RST: u16 = 1 << 4;
    pub(crate) const FLG_PSH: u16 = 1 << 3;

    pub(crate) const RESERVED: u16 = 0x0007;
}

/// Which form headers of a connection are sent in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Marker, context id and the ordinary header.
    Full,
    /// Only changed fields, each with the smallest sufficient encoding.
    Compressed,
    /// All of sequence, acknowledgement and window in full but still without ports.
    MostlyCompressed,
}

/// How a single field is transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// The field equals the context and is omitted.
    Unchanged,
    /// Only the lowest octet differs from the context.
    LowByte,
    /// Only the lowest two octets differ from the context. Not defined for the window.
    LowWord,
    /// The field is sent verbatim.
    Full,
}

/// The values a compressed header is diffed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fields {
    /// The sequence number.
    pub seq: SeqNumber,
    /// The acknowledgement number.
    pub ack: SeqNumber,
    /// The window.
    pub window: u16,
}

/// A header in one of the two compressed forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compressed {
    /// Whether this is the mostly compressed form.
    pub mostly: bool,
    /// The connection's context id.
    pub context_id: u16,
    /// The values of the reconstructed header.
    ///
    /// When the ACK flag is not set the acknowledgement number is not transmitted and always
    /// equals the one of the context.
    pub fields: Fields,
    /// FIN, ACK, RST and PSH.
    pub flags: Flags,
    /// The checksum of the uncompressed segment.
    pub checksum: u16,
}

/// A segment in full form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full<'a> {
    /// The context id the sender assigned.
    pub context_id: u16,
    /// The ordinary TCP segment following the prefix.
    pub segment: &'a [u8],
}

/// A compressed header, built on the stack.
#[derive(Clone, Copy)]
pub struct HeaderBuf {
    bytes: [u8; MAX_HEADER_LEN],
    len: usize,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Determine the form of a segment and its context id.
///
/// Returns `Err(Error::Unrecognized)` if the first byte fits none of the forms.
pub fn classify(data: &[u8]) -> Result<(Level, u16)> {
    let first = *data.first().ok_or(Error::Truncated)?;
    if first == FULL_MARKER {
        let full = Full::parse(data)?;
        return Ok((Level::Full, full.context_id));
    }

    let level = match u16::from(first) << 8 & field::FORM_MASK {
        field::FORM_COMPRESSED => Level::Compressed,
        field::FORM_MOSTLY => Level::MostlyCompressed,
        _ => return Err(Error::Unrecognized),
    };
    let id = data.get(2..4).ok_or(Error::Truncated)?;
    Ok((level, NetworkEndian::read_u16(id)))
}

impl<'a> Full<'a> {
    /// Split the prefix off a segment in full form.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < FULL_PREFIX_LEN {
            return Err(Error::Truncated);
        }
        if data[0] != FULL_MARKER {
            return Err(Error::Unrecognized);
        }
        Ok(Full {
            context_id: NetworkEndian::read_u16(&data[1..3]),
            segment: &data[FULL_PREFIX_LEN..],
        })
    }

    /// Prefix a complete TCP segment.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(FULL_PREFIX_LEN + self.segment.len());
        buffer.push(FULL_MARKER);
        buffer.extend_from_slice(&self.context_id.to_be_bytes());
        buffer.extend_from_slice(self.segment);
        buffer
    }
}

impl Encoding {
    fn for_u32(value: u32, last: u32) -> Self {
        if value == last {
            Encoding::Unchanged
        } else if value & !0xff == last & !0xff {
            Encoding::LowByte
        } else if value & !0xffff == last & !0xffff {
            Encoding::LowWord
        } else {
            Encoding::Full
        }
    }

    fn for_u16(value: u16, last: u16) -> Self {
        if value == last {
            Encoding::Unchanged
        } else if value & !0xff == last & !0xff {
            Encoding::LowByte
        } else {
            Encoding::Full
        }
    }

    fn bits(self) -> u16 {
        match self {
            Encoding::Unchanged => 0b00,
            Encoding::LowByte => 0b01,
            Encoding::LowWord => 0b10,
            Encoding::Full => 0b11,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Encoding::Unchanged,
            0b01 => Encoding::LowByte,
            0b10 => Encoding::LowWord,
            _ => Encoding::Full,
        }
    }

    fn write_u32(self, value: u32, out: &mut HeaderBuf) {
        match self {
            Encoding::Unchanged => (),
            Encoding::LowByte => out.put_u8(value as u8),
            Encoding::LowWord => out.put_u16(value as u16),
            Encoding::Full => out.put_u32(value),
        }
    }

    fn write_u16(self, value: u16, out: &mut HeaderBuf) {
        match self {
            Encoding::Unchanged => (),
            Encoding::LowByte => out.put_u8(value as u8),
            Encoding::LowWord | Encoding::Full => out.put_u16(value),
        }
    }

    fn read_u32(self, last: u32, reader: &mut Reader) -> Result<u32> {
        Ok(match self {
            Encoding::Unchanged => last,
            Encoding::LowByte => last & !0xff | u32::from(reader.u8()?),
            Encoding::LowWord => last & !0xffff | u32::from(reader.u16()?),
            Encoding::Full => reader.u32()?,
        })
    }

    fn read_u16(self, last: u16, reader: &mut Reader) -> Result<u16> {
        Ok(match self {
            Encoding::Unchanged => last,
            Encoding::LowByte => last & !0xff | u16::from(reader.u8()?),
            Encoding::LowWord => return Err(Error::Malformed),
            Encoding::Full => reader.u16()?,
        })
    }
}

impl Compressed {
    /// Compress a header.
    ///
    /// The flags may only contain FIN, ACK, RST and PSH; SYN segments are always sent in full
    /// form. When `ack` is `None` the context's acknowledgement number is kept.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mostly: bool,
        context_id: u16,
        flags: Flags,
        seq: SeqNumber,
        ack: Option<SeqNumber>,
        window: u16,
        checksum: u16,
        last: &Fields,
    ) -> Result<Self> {
        if flags.syn() || flags.urg() {
            return Err(Error::Unsupported);
        }
        let mut flags = flags;
        flags.set_ack(ack.is_some());
        Ok(Compressed {
            mostly,
            context_id,
            fields: Fields {
                seq,
                ack: ack.unwrap_or(last.ack),
                window,
            },
            flags,
            checksum,
        })
    }

    /// The encodings the fields are sent with, against a context.
    pub fn encodings(&self, last: &Fields) -> (Encoding, Encoding, Encoding) {
        if self.mostly {
            return (Encoding::Full, Encoding::Full, Encoding::Full);
        }

        (Encoding::for_u32(self.fields.seq.to_u32(), last.seq.to_u32()),
         Encoding::for_u32(self.fields.ack.to_u32(), last.ack.to_u32()),
         Encoding::for_u16(self.fields.window, last.window))
    }

    /// The acknowledgement number of the reconstructed header.
    pub fn ack_number(&self) -> Option<SeqNumber> {
        if self.flags.ack() {
            Some(self.fields.ack)
        } else {
            None
        }
    }

    /// Write the header, diffing against the send direction context.
    pub fn emit(&self, last: &Fields) -> HeaderBuf {
        let (seq, ack, window) = self.encodings(last);
        let mut word = if self.mostly { field::FORM_MOSTLY } else { field::FORM_COMPRESSED };
        word |= seq.bits() << field::SEQ_SHIFT;
        word |= ack.bits() << field::ACK_SHIFT;
        word |= window.bits() << field::WIN_SHIFT;
        if self.flags.fin() { word |= field::FLG_FIN }
        if self.flags.ack() { word |= field::FLG_ACK }
        if self.flags.rst() { word |= field::FLG_RST }
        if self.flags.psh() { word |= field::FLG_PSH }

        let mut out = HeaderBuf::new();
        out.put_u16(word);
        out.put_u16(self.context_id);
        seq.write_u32(self.fields.seq.to_u32(), &mut out);
        ack.write_u32(self.fields.ack.to_u32(), &mut out);
        window.write_u16(self.fields.window, &mut out);
        out.put_u16(self.checksum);
        out
    }

    /// The compressed header followed by `payload`.
    pub fn to_bytes(&self, last: &Fields, payload: &[u8]) -> Vec<u8> {
        let header = self.emit(last);
        let mut buffer = Vec::with_capacity(header.len() + payload.len());
        buffer.extend_from_slice(header.as_bytes());
        buffer.extend_from_slice(payload);
        buffer
    }

    /// Parse a compressed header, reconstructing it against the receive direction context.
    ///
    /// Returns the header and its length, the payload follows directly.
    pub fn parse(data: &[u8], last: &Fields) -> Result<(Self, usize)> {
        let mut reader = Reader { data, pos: 0 };
        let word = reader.u16()?;
        let mostly = match word & field::FORM_MASK {
            field::FORM_COMPRESSED => false,
            field::FORM_MOSTLY => true,
            _ => return Err(Error::Unrecognized),
        };
        if word & field::RESERVED != 0 {
            return Err(Error::Malformed);
        }

        let seq = Encoding::from_bits(word >> field::SEQ_SHIFT);
        let ack = Encoding::from_bits(word >> field::ACK_SHIFT);
        let window = Encoding::from_bits(word >> field::WIN_SHIFT);
        if mostly && (seq, ack, window) != (Encoding::Full, Encoding::Full, Encoding::Full) {
            return Err(Error::Malformed);
        }

        let mut flags = Flags::default();
        flags.set_fin(word & field::FLG_FIN != 0);
        flags.set_ack(word & field::FLG_ACK != 0);
        flags.set_rst(word & field::FLG_RST != 0);
        flags.set_psh(word & field::FLG_PSH != 0);

        let context_id = reader.u16()?;
        let fields = Fields {
            seq: SeqNumber::from_u32(seq.read_u32(last.seq.to_u32(), &mut reader)?),
            ack: SeqNumber::from_u32(ack.read_u32(last.ack.to_u32(), &mut reader)?),
            window: window.read_u16(last.window, &mut reader)?,
        };
        let checksum = reader.u16()?;

        Ok((Compressed { mostly, context_id, fields, flags, checksum }, reader.pos))
    }
}

impl fmt::Display for Compressed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let form = if self.mostly { "mostly" } else { "compressed" };
        write!(f, "TCP-HC {} ctx={} seq={}", form, self.context_id, self.fields.seq)?;
        if self.flags.ack() {
            write!(f, " ack={}", self.fields.ack)?;
        }
        write!(f, " win={}", self.fields.window)?;
        if self.flags != Flags(0) {
            write!(f, " {}", self.flags)?;
        }
        Ok(())
    }
}

impl HeaderBuf {
    /// An empty header.
    pub fn new() -> Self {
        HeaderBuf { bytes: [0; MAX_HEADER_LEN], len: 0 }
    }

    /// The header written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// The length of the header written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing was written yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn put_u8(&mut self, value: u8) {
        self.bytes[self.len] = value;
        self.len += 1;
    }

    fn put_u16(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.bytes[self.len..self.len + 2], value);
        self.len += 2;
    }

    fn put_u32(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.bytes[self.len..self.len + 4], value);
        self.len += 4;
    }
}

impl Default for HeaderBuf {
    fn default() -> Self {
        HeaderBuf::new()
    }
}

impl fmt::Debug for HeaderBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("HeaderBuf").field(&self.as_bytes()).finish()
    }
}

impl Reader<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8]> {
        let bytes = self.data.get(self.pos..self.pos + len).ok_or(Error::Truncated)?;
        self.pos += len;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        self.take(2).map(NetworkEndian::read_u16)
    }

    fn u32(&mut self) -> Result<u32> {
        self.take(4).map(NetworkEndian::read_u32)
    }
}
