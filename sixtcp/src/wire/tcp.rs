//! TCP segment headers.
use core::{i32, ops, cmp, fmt};
use byteorder::{ByteOrder, NetworkEndian};

use super::{Checksum, Error, Result};
use super::ip::{checksum, Protocol};

/// A TCP sequence number.
///
/// A sequence number is a monotonically advancing integer modulo 2<sup>32</sup>.
/// Sequence numbers do not have a discontiguity when compared pairwise across a signed overflow.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub i32);

impl SeqNumber {
    /// Interpret the raw on-wire value.
    pub fn from_u32(value: u32) -> Self {
        SeqNumber(value as i32)
    }

    /// The raw on-wire value.
    pub fn to_u32(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0 as u32)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        if rhs > i32::MAX as usize {
            panic!("attempt to add to sequence number with unsigned overflow")
        }
        SeqNumber(self.0.wrapping_add(rhs as i32))
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: usize) -> SeqNumber {
        if rhs > i32::MAX as usize {
            panic!("attempt to subtract to sequence number with unsigned overflow")
        }
        SeqNumber(self.0.wrapping_sub(rhs as i32))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl ops::Sub for SeqNumber {
    type Output = usize;

    fn sub(self, rhs: SeqNumber) -> usize {
        let result = self.0.wrapping_sub(rhs.0);
        if result < 0 {
            panic!("attempt to subtract sequence numbers with underflow")
        }
        result as usize
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        self.0.wrapping_sub(other.0).partial_cmp(&0)
    }
}

/// A set of tcp flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u16);

byte_wrapper! {
    /// A byte sequence representing a TCP segment, header and payload.
    pub struct tcp([u8]);
}

mod field {
    #![allow(non_snake_case)]

    use crate::wire::field::Field;

    pub(crate) const SRC_PORT: Field = 0..2;
    pub(crate) const DST_PORT: Field = 2..4;
    pub(crate) const SEQ_NUM:  Field = 4..8;
    pub(crate) const ACK_NUM:  Field = 8..12;
    pub(crate) const FLAGS:    Field = 12..14;
    pub(crate) const WIN_SIZE: Field = 14..16;
    pub(crate) const CHECKSUM: Field = 16..18;
    pub(crate) const URGENT:   Field = 18..20;

    pub(crate) fn OPTIONS(length: u8) -> Field {
        URGENT.end..(length as usize)
    }

    pub(crate) const FLG_FIN: u16 = 0x001;
    pub(crate) const FLG_SYN: u16 = 0x002;
    pub(crate) const FLG_RST: u16 = 0x004;
    pub(crate) const FLG_PSH: u16 = 0x008;
    pub(crate) const FLG_ACK: u16 = 0x010;
    pub(crate) const FLG_URG: u16 = 0x020;

    pub(crate) const OPT_END: u8 = 0x00;
    pub(crate) const OPT_NOP: u8 = 0x01;
    pub(crate) const OPT_MSS: u8 = 0x02;
}

/// The length of a TCP header without options.
pub const HEADER_LEN: usize = field::URGENT.end;

impl tcp {
    /// Imbue a raw octet buffer with TCP packet structure.
    #[inline]
    pub fn new_unchecked(buffer: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Imbue a mutable octet buffer with TCP packet structure.
    #[inline]
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(buffer)
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    #[inline]
    pub fn new_checked(buffer: &[u8]) -> Result<&Self> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no header accessor method will panic if called.
    /// Returns `Err(Error::Truncated)` if the buffer is too short.
    /// Returns `Err(Error::Malformed)` if the header length field has a value smaller
    /// than the minimal header length.
    ///
    /// The result of this check is invalidated by calling [set_header_len].
    ///
    /// [set_header_len]: #method.set_header_len
    pub fn check_len(&self) -> Result<()> {
        let len = self.0.len();
        if len < field::URGENT.end {
            Err(Error::Truncated)
        } else {
            let header_len = self.header_len() as usize;
            if len < header_len {
                Err(Error::Truncated)
            } else if header_len < field::URGENT.end {
                Err(Error::Malformed)
            } else {
                Ok(())
            }
        }
    }

    /// The underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Return the source port field.
    #[inline]
    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::SRC_PORT])
    }

    /// Return the destination port field.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::DST_PORT])
    }

    /// Return the sequence number field.
    #[inline]
    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.0[field::SEQ_NUM]))
    }

    /// Return the acknowledgement number field.
    #[inline]
    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.0[field::ACK_NUM]))
    }

    /// Read all flags at once.
    pub fn flags(&self) -> Flags {
        Flags(NetworkEndian::read_u16(&self.0[field::FLAGS]) & 0x1ff)
    }

    /// Return the header length, in octets.
    #[inline]
    pub fn header_len(&self) -> u8 {
        let raw = NetworkEndian::read_u16(&self.0[field::FLAGS]);
        ((raw >> 12) * 4) as u8
    }

    /// Return the window size field.
    #[inline]
    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::WIN_SIZE])
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    /// Return the urgent pointer field.
    #[inline]
    pub fn urgent_at(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::URGENT])
    }

    /// Return the length of the segment, in terms of sequence space.
    pub fn sequence_len(&self) -> usize {
        self.0.len()
            - self.header_len() as usize
            + self.flags().sequence_len()
    }

    /// Return a pointer to the options.
    #[inline]
    pub fn options(&self) -> &[u8] {
        &self.0[field::OPTIONS(self.header_len())]
    }

    /// Return a pointer to the payload.
    #[inline]
    pub fn payload_slice(&self) -> &[u8] {
        &self.0[self.header_len() as usize..]
    }

    /// Validate the packet checksum.
    pub fn verify_checksum(&self, src_addr: super::ip::Address, dst_addr: super::ip::Address) -> bool {
        checksum::transport(&src_addr, &dst_addr, Protocol::Tcp, &self.0) == 0
    }

    /// Set the source port field.
    #[inline]
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::SRC_PORT], value)
    }

    /// Set the destination port field.
    #[inline]
    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::DST_PORT], value)
    }

    /// Set the sequence number field.
    #[inline]
    pub fn set_seq_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.0[field::SEQ_NUM], value.0)
    }

    /// Set the acknowledgement number field.
    #[inline]
    pub fn set_ack_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.0[field::ACK_NUM], value.0)
    }

    /// Set a combination of flags.
    #[inline]
    pub fn set_flags(&mut self, Flags(flags): Flags) {
        let field = NetworkEndian::read_u16(&self.0[field::FLAGS]) & !0xfff;
        NetworkEndian::write_u16(&mut self.0[field::FLAGS], field | (flags & 0x1ff))
    }

    /// Set the header length, in octets.
    #[inline]
    pub fn set_header_len(&mut self, value: u8) {
        let raw = NetworkEndian::read_u16(&self.0[field::FLAGS]);
        let raw = (raw & !0xf000) | ((value as u16) / 4) << 12;
        NetworkEndian::write_u16(&mut self.0[field::FLAGS], raw)
    }

    /// Set the window size field.
    #[inline]
    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::WIN_SIZE], value)
    }

    /// Set the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value)
    }

    /// Set the urgent pointer field.
    #[inline]
    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::URGENT], value)
    }

    /// Compute and fill in the header checksum.
    pub fn fill_checksum(&mut self, src_addr: super::ip::Address, dst_addr: super::ip::Address) {
        self.set_checksum(0);
        let checksum = checksum::transport(&src_addr, &dst_addr, Protocol::Tcp, &self.0);
        self.set_checksum(checksum)
    }

    /// Return a pointer to the options.
    #[inline]
    pub fn options_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        &mut self.0[field::OPTIONS(header_len)]
    }

    /// Return a mutable pointer to the payload data.
    #[inline]
    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        let header_len = self.header_len() as usize;
        &mut self.0[header_len..]
    }
}

impl AsRef<[u8]> for tcp {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Flags {
    /// The FIN flag alone.
    pub const FIN: Flags = Flags(field::FLG_FIN);
    /// The SYN flag alone.
    pub const SYN: Flags = Flags(field::FLG_SYN);
    /// The RST flag alone.
    pub const RST: Flags = Flags(field::FLG_RST);
    /// The PSH flag alone.
    pub const PSH: Flags = Flags(field::FLG_PSH);
    /// The ACK flag alone.
    pub const ACK: Flags = Flags(field::FLG_ACK);

    /// Return the FIN flag.
    #[inline]
    pub fn fin(&self) -> bool {
        self.0 & field::FLG_FIN != 0
    }

    /// Return the SYN flag.
    #[inline]
    pub fn syn(&self) -> bool {
        self.0 & field::FLG_SYN != 0
    }

    /// Return the RST flag.
    #[inline]
    pub fn rst(&self) -> bool {
        self.0 & field::FLG_RST != 0
    }

    /// Return the PSH flag.
    #[inline]
    pub fn psh(&self) -> bool {
        self.0 & field::FLG_PSH != 0
    }

    /// Return the ACK flag.
    #[inline]
    pub fn ack(&self) -> bool {
        self.0 & field::FLG_ACK != 0
    }

    /// Return the URG flag.
    #[inline]
    pub fn urg(&self) -> bool {
        self.0 & field::FLG_URG != 0
    }

    /// Set the FIN flag.
    #[inline]
    pub fn set_fin(&mut self, value: bool) {
        self.set(field::FLG_FIN, value)
    }

    /// Set the RST flag.
    #[inline]
    pub fn set_rst(&mut self, value: bool) {
        self.set(field::FLG_RST, value)
    }

    /// Set the PSH flag.
    #[inline]
    pub fn set_psh(&mut self, value: bool) {
        self.set(field::FLG_PSH, value)
    }

    /// Set the ACK flag.
    #[inline]
    pub fn set_ack(&mut self, value: bool) {
        self.set(field::FLG_ACK, value)
    }

    fn set(&mut self, flag: u16, value: bool) {
        let without = self.0 & !flag;
        self.0 = if value { without | flag } else { without };
    }

    /// Return the length of a control flag, in terms of sequence space.
    pub fn sequence_len(self) -> usize {
        (if self.syn() { 1 } else { 0 })
        + (if self.fin() { 1 }  else { 0 })
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = [
            (field::FLG_SYN, "syn"),
            (field::FLG_FIN, "fin"),
            (field::FLG_RST, "rst"),
            (field::FLG_PSH, "psh"),
            (field::FLG_ACK, "ack"),
            (field::FLG_URG, "urg"),
        ];
        let mut first = true;
        for &(flag, name) in names.iter() {
            if self.0 & flag != 0 {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// A representation of a single TCP option.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption<'a> {
    /// Marks the end of the option list.
    EndOfList,
    /// Padding.
    NoOperation,
    /// The largest segment the sender is willing to receive.
    MaxSegmentSize(u16),
    /// Any other option, kept opaque.
    Unknown {
        /// The option kind.
        kind: u8,
        /// The option data, without kind and length.
        data: &'a [u8],
    },
}

impl<'a> TcpOption<'a> {
    /// Parse the first option in `buffer`, returning the remaining bytes.
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let (length, option);
        match *buffer.get(0).ok_or(Error::Truncated)? {
            field::OPT_END => {
                length = 1;
                option = TcpOption::EndOfList;
            }
            field::OPT_NOP => {
                length = 1;
                option = TcpOption::NoOperation;
            }
            kind => {
                length = *buffer.get(1).ok_or(Error::Truncated)? as usize;
                if length < 2 {
                    return Err(Error::Malformed)
                }
                let data = buffer.get(2..length).ok_or(Error::Truncated)?;
                match (kind, length) {
                    (field::OPT_MSS, 4) =>
                        option = TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
                    (field::OPT_MSS, _) =>
                        return Err(Error::Malformed),
                    (_, _) =>
                        option = TcpOption::Unknown { kind, data }
                }
            }
        }
        Ok((&buffer[length..], option))
    }

    /// The number of bytes the option occupies.
    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList => 1,
            TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::Unknown { data, .. } => 2 + data.len()
        }
    }

    /// Write the option to the start of `buffer`, returning the remaining bytes.
    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        let length = self.buffer_len();
        match *self {
            TcpOption::EndOfList => {
                // There may be padding space which also should be initialized.
                for p in buffer.iter_mut() {
                    *p = field::OPT_END;
                }
            }
            TcpOption::NoOperation => {
                buffer[0] = field::OPT_NOP;
            }
            TcpOption::MaxSegmentSize(value) => {
                buffer[0] = field::OPT_MSS;
                buffer[1] = length as u8;
                NetworkEndian::write_u16(&mut buffer[2..4], value)
            }
            TcpOption::Unknown { kind, data: provided } => {
                buffer[0] = kind;
                buffer[1] = length as u8;
                buffer[2..length].copy_from_slice(provided)
            }
        }
        &mut buffer[length..]
    }
}

/// A high-level representation of a Transmission Control Protocol packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    /// The source port.
    pub src_port:     u16,
    /// The destination port.
    pub dst_port:     u16,
    /// Control flags. The ACK flag is derived from `ack_number` on emission.
    pub flags:        Flags,
    /// The sequence number of the first octet.
    pub seq_number:   SeqNumber,
    /// The acknowledgement number, present exactly when the ACK flag is set.
    pub ack_number:   Option<SeqNumber>,
    /// The advertised receive window.
    pub window_len:   u16,
    /// The maximum segment size option.
    pub max_seg_size: Option<u16>,
    /// The number of payload octets following the header.
    pub payload_len:  u16,
}

impl Repr {
    /// Parse a Transmission Control Protocol packet and return a high-level representation.
    pub fn parse(packet: &tcp, checksum: Checksum) -> Result<Repr> {
        packet.check_len()?;
        // Source and destination ports must be present.
        if packet.src_port() == 0 { return Err(Error::Malformed) }
        if packet.dst_port() == 0 { return Err(Error::Malformed) }

        // Valid checksum may be expected.
        if let Checksum::Manual { src_addr, dst_addr } = checksum {
            if !packet.verify_checksum(src_addr, dst_addr) {
                return Err(Error::WrongChecksum)
            }
        }

        let flags = packet.flags();
        let ack_number = if flags.ack() {
            Some(packet.ack_number())
        } else {
            None
        };
        // The PSH flag is ignored.
        // The URG flag and the urgent field are ignored as well.

        let mut max_seg_size = None;
        let mut options = packet.options();
        while !options.is_empty() {
            let (next_options, option) = TcpOption::parse(options)?;
            match option {
                TcpOption::EndOfList => break,
                TcpOption::NoOperation => (),
                TcpOption::MaxSegmentSize(value) =>
                    max_seg_size = Some(value),
                TcpOption::Unknown { kind, .. } => {
                    net_trace!("tcp: ignoring option {}", kind);
                },
            }
            options = next_options;
        }

        Ok(Repr {
            src_port:     packet.src_port(),
            dst_port:     packet.dst_port(),
            flags,
            seq_number:   packet.seq_number(),
            ack_number,
            window_len:   packet.window_len(),
            max_seg_size,
            payload_len:  packet.payload_slice().len() as u16,
        })
    }

    /// Return the length of a header that will be emitted from this high-level representation.
    ///
    /// This should be used for buffer space calculations.
    /// The TCP header length is a multiple of 4.
    pub fn header_len(&self) -> usize {
        let mut length = field::URGENT.end;
        if self.max_seg_size.is_some() {
            length += 4
        }
        length
    }

    /// Return the length of a packet that will be emitted from this high-level representation.
    pub fn buffer_len(&self) -> usize {
        self.header_len() + usize::from(self.payload_len)
    }

    /// Emit a high-level representation into a Transmission Control Protocol packet.
    ///
    /// Only the header is written. The checksum must be filled after the payload was copied.
    pub fn emit(&self, packet: &mut tcp) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or(SeqNumber(0)));
        packet.set_window_len(self.window_len);
        packet.set_header_len(self.header_len() as u8);
        let mut flags = self.flags;
        flags.set_ack(self.ack_number.is_some());
        packet.set_flags(flags);
        {
            let mut options = packet.options_mut();
            if let Some(value) = self.max_seg_size {
                let tmp = options; options = TcpOption::MaxSegmentSize(value).emit(tmp);
            }
            if !options.is_empty() {
                TcpOption::EndOfList.emit(options);
            }
        }
        packet.set_urgent_at(0);
        packet.set_checksum(0);
    }

    /// Build the complete segment with `payload` and a filled checksum.
    ///
    /// # Panics
    /// This function panics if `payload` is not `payload_len` bytes long.
    pub fn to_bytes(&self, payload: &[u8], checksum: Checksum) -> Vec<u8> {
        assert_eq!(payload.len(), usize::from(self.payload_len));
        let mut buffer = vec![0; self.buffer_len()];
        let packet = tcp::new_unchecked_mut(&mut buffer);
        self.emit(packet);
        packet.payload_mut_slice().copy_from_slice(payload);
        if let Checksum::Manual { src_addr, dst_addr } = checksum {
            packet.fill_checksum(src_addr, dst_addr);
        }
        buffer
    }

    /// Return the length of the segment, in terms of sequence space.
    pub fn sequence_len(&self) -> usize {
        usize::from(self.payload_len) + self.flags.sequence_len()
    }
}

impl fmt::Display for tcp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Err(err) = self.check_len() {
            return write!(f, "TCP ({})", err);
        }
        write!(f, "TCP src={} dst={} {} seq={}",
               self.src_port(), self.dst_port(), self.flags(), self.seq_number())?;
        if self.flags().ack() {
            write!(f, " ack={}", self.ack_number())?;
        }
        write!(f, " win={} len={}", self.window_len(), self.payload_slice().len())
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP src={} dst={}",
               self.src_port, self.dst_port)?;
        if self.flags != Flags(0) {
            write!(f, " {}", self.flags)?;
        }
        write!(f, " seq={}", self.seq_number)?;
        if let Some(ack_number) = self.ack_number {
            write!(f, " ack={}", ack_number)?;
        }
        write!(f, " win={}", self.window_len)?;
        write!(f, " len={}", self.payload_len)?;
        if let Some(max_seg_size) = self.max_seg_size {
            write!(f, " mss={}", max_seg_size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::wire::ip::Address;
    use super::*;

    const SRC_ADDR: Address = Address([0xfe, 0x80, 0, 0, 0, 0, 0, 0,
                                       0, 0, 0, 0, 0, 0, 0, 1]);
    const DST_ADDR: Address = Address([0xfe, 0x80, 0, 0, 0, 0, 0, 0,
                                       0, 0, 0, 0, 0, 0, 0, 2]);

    static PACKET_BYTES: [u8; 28] =
        [0xbf, 0x00, 0x00, 0x50,
         0x01, 0x23, 0x45, 0x67,
         0x89, 0xab, 0xcd, 0xef,
         0x60, 0x35, 0x01, 0x23,
         0x01, 0xb6, 0x02, 0x01,
         0x03, 0x03, 0x0c, 0x01,
         0xaa, 0x00, 0x00, 0xff];

    static SYN_BYTES: [u8; 24] =
        [0xc0, 0x00, 0x00, 0x50,
         0x00, 0x00, 0x00, 0x64,
         0x00, 0x00, 0x00, 0x00,
         0x60, 0x02, 0x02, 0x00,
         0x00, 0x00, 0x00, 0x00,
         0x02, 0x04, 0x00, 0x40];

    fn syn_repr() -> Repr {
        Repr {
            src_port: 49152,
            dst_port: 80,
            flags: Flags::SYN,
            seq_number: SeqNumber(100),
            ack_number: None,
            window_len: 512,
            max_seg_size: Some(64),
            payload_len: 0,
        }
    }

    #[test]
    fn test_deconstruct() {
        let packet = tcp::new_checked(&PACKET_BYTES[..]).unwrap();
        assert_eq!(packet.src_port(), 48896);
        assert_eq!(packet.dst_port(), 80);
        assert_eq!(packet.seq_number(), SeqNumber(0x01234567));
        assert_eq!(packet.ack_number(), SeqNumber(0x89abcdefu32 as i32));
        assert_eq!(packet.header_len(), 24);
        assert_eq!(packet.flags().fin(), true);
        assert_eq!(packet.flags().syn(), false);
        assert_eq!(packet.flags().rst(), true);
        assert_eq!(packet.flags().psh(), false);
        assert_eq!(packet.flags().ack(), true);
        assert_eq!(packet.flags().urg(), true);
        assert_eq!(packet.window_len(), 0x0123);
        assert_eq!(packet.urgent_at(), 0x0201);
        assert_eq!(packet.checksum(), 0x01b6);
        assert_eq!(packet.options(), &[0x03, 0x03, 0x0c, 0x01]);
        assert_eq!(packet.payload_slice(), &[0xaa, 0x00, 0x00, 0xff]);
        assert_eq!(packet.sequence_len(), 5);
    }

    #[test]
    fn test_unknown_option_ignored() {
        let repr = Repr::parse(tcp::new_checked(&PACKET_BYTES[..]).unwrap(), Checksum::Ignored)
            .unwrap();
        assert_eq!(repr.max_seg_size, None);
        assert_eq!(repr.payload_len, 4);
    }

    #[test]
    fn test_emit_syn() {
        let repr = syn_repr();
        assert_eq!(repr.buffer_len(), SYN_BYTES.len());
        let bytes = repr.to_bytes(&[], Checksum::Ignored);
        assert_eq!(&bytes[..], &SYN_BYTES[..]);
    }

    #[test]
    fn test_checksum_roundtrip() {
        let checksum = Checksum::Manual { src_addr: SRC_ADDR, dst_addr: DST_ADDR };
        let mut repr = syn_repr();
        repr.flags = Flags::PSH;
        repr.ack_number = Some(SeqNumber(501));
        repr.max_seg_size = None;
        repr.payload_len = 3;
        let mut bytes = repr.to_bytes(b"abc", checksum);

        let packet = tcp::new_checked(&bytes).unwrap();
        assert!(packet.verify_checksum(SRC_ADDR, DST_ADDR));
        let mut expected = repr;
        expected.flags = Flags::PSH | Flags::ACK;
        assert_eq!(Repr::parse(packet, checksum), Ok(expected));

        bytes[21] ^= 0x01;
        let packet = tcp::new_checked(&bytes).unwrap();
        assert_eq!(Repr::parse(packet, checksum), Err(Error::WrongChecksum));
    }

    #[test]
    fn test_truncated() {
        assert_eq!(tcp::new_checked(&PACKET_BYTES[..19]).err(), Some(Error::Truncated));
        // The data offset claims 24 bytes of header.
        assert_eq!(tcp::new_checked(&PACKET_BYTES[..23]).err(), Some(Error::Truncated));
    }

    #[test]
    fn test_malformed() {
        let mut bytes = SYN_BYTES;
        bytes[12] = 0x40;
        assert_eq!(tcp::new_checked(&bytes[..]).err(), Some(Error::Malformed));

        let mut bytes = SYN_BYTES;
        bytes[0] = 0;
        bytes[1] = 0;
        let packet = tcp::new_checked(&bytes[..]).unwrap();
        assert_eq!(Repr::parse(packet, Checksum::Ignored), Err(Error::Malformed));

        let mut bytes = SYN_BYTES;
        bytes[21] = 3;
        let packet = tcp::new_checked(&bytes[..]).unwrap();
        assert_eq!(Repr::parse(packet, Checksum::Ignored), Err(Error::Malformed));
    }

    #[test]
    fn test_seq_number_wraps() {
        let near_end = SeqNumber::from_u32(0xffff_fffe);
        let after = near_end + 4;
        assert_eq!(after.to_u32(), 2);
        assert!(after > near_end);
        assert_eq!(after - near_end, 4);
    }

    #[test]
    fn test_flags_display() {
        assert_eq!(format!("{}", Flags::SYN | Flags::ACK), "syn|ack");
        assert_eq!(format!("{}", Flags::FIN), "fin");
        assert_eq!(format!("{}", syn_repr()),
                   "TCP src=49152 dst=80 syn seq=100 win=512 len=0 mss=64");
    }
}
