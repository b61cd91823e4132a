//! UDP datagram headers.
use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Checksum, Error, Result};
use super::ip::{checksum, Address, Protocol};

byte_wrapper! {
    /// A byte sequence representing a UDP datagram, header and payload.
    pub struct udp([u8]);
}

mod field {
    #![allow(non_snake_case)]
    use crate::wire::field::Field;

    pub(crate) const SRC_PORT: Field = 0..2;
    pub(crate) const DST_PORT: Field = 2..4;
    pub(crate) const LENGTH:   Field = 4..6;
    pub(crate) const CHECKSUM: Field = 6..8;

    pub(crate) fn PAYLOAD(length: u16) -> Field {
        CHECKSUM.end..(length as usize)
    }
}

/// The length of the UDP header.
pub const HEADER_LEN: usize = field::CHECKSUM.end;

impl udp {
    /// Imbue a raw octet buffer with UDP packet structure.
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    /// Imbue a mutable octet buffer with UDP packet structure.
    pub fn new_unchecked_mut(data: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(data)
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(data: &[u8]) -> Result<&Self> {
        Self::new_unchecked(data).check_len()?;
        Ok(Self::new_unchecked(data))
    }

    /// The underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error::Truncated)` if the buffer is too short.
    /// Returns `Err(Error::Malformed)` if the length field has a value smaller
    /// than the header length.
    ///
    /// The result of this check is invalidated by calling [set_len].
    ///
    /// [set_len]: #method.set_len
    pub fn check_len(&self) -> Result<()> {
        let buffer_len = self.0.len();
        if buffer_len < field::CHECKSUM.end {
            Err(Error::Truncated)
        } else {
            let field_len = self.len() as usize;
            if buffer_len < field_len {
                Err(Error::Truncated)
            } else if field_len < field::CHECKSUM.end {
                Err(Error::Malformed)
            } else {
                Ok(())
            }
        }
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

    /// Return the length field.
    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::LENGTH])
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
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

    /// Set the length field.
    #[inline]
    pub fn set_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::LENGTH], value)
    }

    /// Set the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value)
    }

    /// Compute and fill in the header checksum.
    pub fn fill_checksum(&mut self, src_addr: Address, dst_addr: Address) {
        self.set_checksum(0);
        let checksum = checksum::transport(
            &src_addr, &dst_addr, Protocol::Udp, &self.0[..self.len() as usize]);
        // UDP checksum value of 0 means no checksum; if the checksum really is zero,
        // use all-ones, which indicates that the remote end must verify the checksum.
        // Arithmetically, RFC 1071 checksums of all-zeroes and all-ones behave identically,
        // so no action is necessary on the remote end.
        self.set_checksum(if checksum == 0 { 0xffff } else { checksum })
    }

    /// Validate the packet checksum.
    ///
    /// Over IPv6 the checksum is mandatory, a zero checksum field never verifies.
    pub fn verify_checksum(&self, src_addr: Address, dst_addr: Address) -> bool {
        if self.checksum() == 0 {
            return false;
        }

        checksum::transport(
            &src_addr, &dst_addr, Protocol::Udp, &self.0[..self.len() as usize]) == 0
    }

    /// The payload, bounded by the length field.
    pub fn payload_slice(&self) -> &[u8] {
        let len = self.len();
        &self.0[field::PAYLOAD(len)]
    }

    /// The payload area, bounded by the length field.
    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut self.0[field::PAYLOAD(len)]
    }
}

/// A high-level representation of a User Datagram Protocol packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    /// The source port, may be zero.
    pub src_port: u16,
    /// The destination port.
    pub dst_port: u16,
    /// The number of payload octets.
    pub payload_len: u16,
}

impl Repr {
    /// Parse an User Datagram Protocol packet and return a high-level representation.
    pub fn parse(packet: &udp, checksum: Checksum) -> Result<Repr> {
        packet.check_len()?;

        // Destination port cannot be omitted (but source port can be).
        if packet.dst_port() == 0 { return Err(Error::Malformed) }
        if let Checksum::Manual { src_addr, dst_addr } = checksum {
            if !packet.verify_checksum(src_addr, dst_addr) {
                return Err(Error::WrongChecksum)
            }
        }

        Ok(Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            payload_len: packet.len() - HEADER_LEN as u16,
        })
    }

    /// Return the length of a packet that will be emitted from this high-level representation.
    pub fn buffer_len(&self) -> usize {
        HEADER_LEN + usize::from(self.payload_len)
    }

    /// Emit a high-level representation into an User Datagram Protocol packet.
    ///
    /// The payload must already be in place when a checksum is to be filled.
    pub fn emit(&self, packet: &mut udp, checksum: Checksum) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_len(self.buffer_len() as u16);

        if let Checksum::Manual { src_addr, dst_addr, } = checksum {
            packet.fill_checksum(src_addr, dst_addr)
        } else {
            packet.set_checksum(0);
        }
    }

    /// Build the complete datagram with `payload` and a filled checksum.
    ///
    /// # Panics
    /// This function panics if `payload` is not `payload_len` bytes long.
    pub fn to_bytes(&self, payload: &[u8], checksum: Checksum) -> Vec<u8> {
        let mut buffer = vec![0; self.buffer_len()];
        let packet = udp::new_unchecked_mut(&mut buffer);
        packet.set_len(self.buffer_len() as u16);
        packet.payload_mut_slice().copy_from_slice(payload);
        self.emit(packet, checksum);
        buffer
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UDP src={} dst={} len={}",
            self.src_port, self.dst_port, self.payload_len)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SRC_ADDR: Address = Address([0xfe, 0x80, 0, 0, 0, 0, 0, 0,
                                       0, 0, 0, 0, 0, 0, 0, 1]);
    const DST_ADDR: Address = Address([0xfe, 0x80, 0, 0, 0, 0, 0, 0,
                                       0, 0, 0, 0, 0, 0, 0, 2]);

    static PACKET_BYTES: [u8; 12] =
        [0xbf, 0x00, 0x00, 0x35,
         0x00, 0x0c, 0x98, 0x9c,
         0xaa, 0x00, 0x00, 0xff];

    static PAYLOAD_BYTES: [u8; 4] =
        [0xaa, 0x00, 0x00, 0xff];

    fn checksum() -> Checksum {
        Checksum::Manual { src_addr: SRC_ADDR, dst_addr: DST_ADDR }
    }

    #[test]
    fn test_deconstruct() {
        let packet = udp::new_unchecked(&PACKET_BYTES[..]);
        assert_eq!(packet.src_port(), 48896);
        assert_eq!(packet.dst_port(), 53);
        assert_eq!(packet.len(), 12);
        assert_eq!(packet.checksum(), 0x989c);
        assert_eq!(packet.payload_slice(), &PAYLOAD_BYTES[..]);
        assert!(packet.verify_checksum(SRC_ADDR, DST_ADDR));
    }

    #[test]
    fn test_construct() {
        let mut bytes = vec![0xa5; 12];
        let packet = udp::new_unchecked_mut(&mut bytes);
        packet.set_src_port(48896);
        packet.set_dst_port(53);
        packet.set_len(12);
        packet.set_checksum(0xffff);
        packet.payload_mut_slice().copy_from_slice(&PAYLOAD_BYTES[..]);
        packet.fill_checksum(SRC_ADDR, DST_ADDR);
        assert_eq!(packet.as_bytes(), &PACKET_BYTES[..]);
    }

    #[test]
    fn test_impossible_len() {
        let mut bytes = vec![0; 12];
        let packet = udp::new_unchecked_mut(&mut bytes);
        packet.set_len(4);
        assert_eq!(packet.check_len(), Err(Error::Malformed));
    }

    #[test]
    fn test_zero_checksum_sent_as_ones() {
        let mut bytes = vec![0; 8];
        let packet = udp::new_unchecked_mut(&mut bytes);
        packet.set_src_port(34384);
        packet.set_dst_port(31881);
        packet.set_len(8);
        packet.fill_checksum(SRC_ADDR, DST_ADDR);
        assert_eq!(packet.checksum(), 0xffff);
        assert!(packet.verify_checksum(SRC_ADDR, DST_ADDR));
    }

    #[test]
    fn test_zero_checksum_rejected() {
        let mut bytes = PACKET_BYTES;
        bytes[6] = 0;
        bytes[7] = 0;
        let packet = udp::new_unchecked(&bytes[..]);
        assert_eq!(Repr::parse(packet, checksum()), Err(Error::WrongChecksum));
        assert!(Repr::parse(packet, Checksum::Ignored).is_ok());
    }

    fn packet_repr() -> Repr {
        Repr {
            src_port: 48896,
            dst_port: 53,
            payload_len: PAYLOAD_BYTES.len() as u16,
        }
    }

    #[test]
    fn test_parse() {
        let packet = udp::new_checked(&PACKET_BYTES[..]).unwrap();
        let repr = Repr::parse(packet, checksum()).unwrap();
        assert_eq!(repr, packet_repr());
        assert_eq!(packet.payload_slice(), &PAYLOAD_BYTES[..]);
    }

    #[test]
    fn test_emit() {
        let repr = packet_repr();
        let bytes = repr.to_bytes(&PAYLOAD_BYTES, checksum());
        assert_eq!(&bytes[..], &PACKET_BYTES[..]);
    }

    #[test]
    fn test_zero_destination() {
        let mut bytes = PACKET_BYTES;
        bytes[2] = 0;
        bytes[3] = 0;
        let packet = udp::new_checked(&bytes[..]).unwrap();
        assert_eq!(Repr::parse(packet, Checksum::Ignored), Err(Error::Malformed));
    }
}
