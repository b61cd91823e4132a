//! IPv6 addresses, the fixed IPv6 header and the transport checksum.
//!
//! Only the parts of IPv6 the transports need are represented. Extension headers are not
//! traversed, a datagram whose next header is not a known transport is simply not recognized.
use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};

/// Minimum MTU required of all links supporting IPv6. See [RFC 8200 § 5].
///
/// [RFC 8200 § 5]: https://tools.ietf.org/html/rfc8200#section-5
pub const MIN_MTU: usize = 1280;

/// The length of the fixed IPv6 header.
pub const HEADER_LEN: usize = field::DST_ADDR.end;

/// A sixteen-octet IPv6 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address(pub [u8; 16]);

/// An address and port pair.
///
/// A port of `0` or the unspecified address act as a wildcard where an endpoint is matched
/// against incoming traffic.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Endpoint {
    /// The address of the endpoint.
    pub addr: Address,
    /// The transport port.
    pub port: u16,
}

enum_with_unknown! {
    /// Next header values, as assigned by IANA.
    pub enum Protocol(u8) {
        /// IPv6 hop-by-hop options.
        HopByHop = 0x00,
        /// Transmission Control Protocol.
        Tcp = 0x06,
        /// User Datagram Protocol.
        Udp = 0x11,
        /// ICMP for IPv6.
        Icmpv6 = 0x3a,
    }
}

impl Address {
    /// The [unspecified address].
    ///
    /// [unspecified address]: https://tools.ietf.org/html/rfc4291#section-2.5.2
    pub const UNSPECIFIED: Address = Address([0x00; 16]);

    /// The [loopback address].
    ///
    /// [loopback address]: https://tools.ietf.org/html/rfc4291#section-2.5.3
    pub const LOOPBACK: Address =
        Address([0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);

    /// Construct an IPv6 address from parts.
    pub fn new(
        a0: u16, a1: u16, a2: u16, a3: u16,
        a4: u16, a5: u16, a6: u16, a7: u16,
    ) -> Address {
        let mut addr = [0u8; 16];
        for (chunk, part) in addr.chunks_mut(2).zip([a0, a1, a2, a3, a4, a5, a6, a7].iter()) {
            NetworkEndian::write_u16(chunk, *part);
        }
        Address(addr)
    }

    /// Construct an IPv6 address from a sequence of octets, in big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is not sixteen octets long.
    pub fn from_bytes(data: &[u8]) -> Address {
        let mut bytes = [0; 16];
        bytes.copy_from_slice(data);
        Address(bytes)
    }

    /// Return an IPv6 address as a sequence of octets, in big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Query whether the IPv6 address is the unspecified address.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0x00; 16]
    }

    /// Whether an endpoint bound to `self` accepts traffic for `addr`.
    pub fn accepts(&self, addr: Address) -> bool {
        self.is_unspecified() || *self == addr
    }

    fn words(&self) -> [u16; 8] {
        let mut words = [0u16; 8];
        for (word, chunk) in words.iter_mut().zip(self.0.chunks(2)) {
            *word = NetworkEndian::read_u16(chunk);
        }
        words
    }
}

impl From<std::net::Ipv6Addr> for Address {
    fn from(addr: std::net::Ipv6Addr) -> Self {
        Address(addr.octets())
    }
}

impl From<Address> for std::net::Ipv6Addr {
    fn from(addr: Address) -> Self {
        std::net::Ipv6Addr::from(addr.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Collapse the longest run of at least two zero words into "::", see
        // https://tools.ietf.org/html/rfc5952#section-4.2
        let words = self.words();
        let (mut best, mut best_len) = (0, 0);
        let mut index = 0;
        while index < words.len() {
            let run = words[index..].iter().take_while(|&&w| w == 0).count();
            if run > best_len {
                best = index;
                best_len = run;
            }
            index += run.max(1);
        }

        if best_len < 2 {
            best_len = 0;
            best = words.len();
        }

        for (i, word) in words.iter().enumerate() {
            if i == best {
                write!(f, "::")?;
            } else if i > best && i < best + best_len {
                continue;
            } else {
                if i != 0 && i != best + best_len {
                    write!(f, ":")?;
                }
                write!(f, "{:x}", word)?;
            }
        }
        Ok(())
    }
}

impl Endpoint {
    /// Create an endpoint from address and port.
    pub const fn new(addr: Address, port: u16) -> Self {
        Endpoint { addr, port }
    }

    /// Whether the endpoint leaves its port unspecified.
    pub fn is_wildcard(&self) -> bool {
        self.port == 0
    }
}

impl From<std::net::SocketAddrV6> for Endpoint {
    fn from(addr: std::net::SocketAddrV6) -> Self {
        Endpoint::new((*addr.ip()).into(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]:{}", self.addr, self.port)
    }
}

byte_wrapper! {
    /// A byte sequence representing an IPv6 header.
    pub struct ipv6([u8]);
}

// Ranges and constants describing the IPv6 header
//
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Version| Traffic Class |           Flow Label                  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         Payload Length        |  Next Header  |   Hop Limit   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +                         Source Address                        +
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +                      Destination Address                      +
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// See https://tools.ietf.org/html/rfc8200#section-3 for details.
mod field {
    use crate::wire::field::Field;

    pub(crate) const VER_TC_FLOW: Field = 0..4;
    pub(crate) const LENGTH:      Field = 4..6;
    pub(crate) const NXT_HDR:     usize = 6;
    pub(crate) const HOP_LIMIT:   usize = 7;
    pub(crate) const SRC_ADDR:    Field = 8..24;
    pub(crate) const DST_ADDR:    Field = 24..40;
}

impl ipv6 {
    /// Create a raw octet buffer with an IPv6 packet structure.
    #[inline]
    pub fn new_unchecked(buffer: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Create a raw octet buffer with an IPv6 packet structure.
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

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error::Truncated)` if the buffer is too short.
    ///
    /// The result of this check is invalidated by calling [set_payload_len].
    ///
    /// [set_payload_len]: #method.set_payload_len
    #[inline]
    pub fn check_len(&self) -> Result<()> {
        let len = self.0.len();
        if len < field::DST_ADDR.end || len < self.total_len() {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// The underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Return the version field.
    #[inline]
    pub fn version(&self) -> u8 {
        self.0[field::VER_TC_FLOW.start] >> 4
    }

    /// Return the payload length field.
    #[inline]
    pub fn payload_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::LENGTH])
    }

    /// Return the payload length added to the known header length.
    #[inline]
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.payload_len() as usize
    }

    /// Return the next header field.
    #[inline]
    pub fn next_header(&self) -> Protocol {
        Protocol::from(self.0[field::NXT_HDR])
    }

    /// Return the hop limit field.
    #[inline]
    pub fn hop_limit(&self) -> u8 {
        self.0[field::HOP_LIMIT]
    }

    /// Return the source address field.
    #[inline]
    pub fn src_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::SRC_ADDR])
    }

    /// Return the destination address field.
    #[inline]
    pub fn dst_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::DST_ADDR])
    }

    /// The payload, bounded by the payload length field.
    #[inline]
    pub fn payload_slice(&self) -> &[u8] {
        &self.0[HEADER_LEN..self.total_len()]
    }

    /// Set version, traffic class and flow label at once.
    ///
    /// The stack never uses traffic classes or flow labels, so these are always zeroed.
    #[inline]
    pub fn set_version(&mut self, value: u8) {
        NetworkEndian::write_u32(&mut self.0[field::VER_TC_FLOW], u32::from(value & 0x0f) << 28);
    }

    /// Set the payload length field.
    #[inline]
    pub fn set_payload_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::LENGTH], value)
    }

    /// Set the next header field.
    #[inline]
    pub fn set_next_header(&mut self, value: Protocol) {
        self.0[field::NXT_HDR] = value.into()
    }

    /// Set the hop limit field.
    #[inline]
    pub fn set_hop_limit(&mut self, value: u8) {
        self.0[field::HOP_LIMIT] = value
    }

    /// Set the source address field.
    #[inline]
    pub fn set_src_addr(&mut self, value: Address) {
        self.0[field::SRC_ADDR].copy_from_slice(value.as_bytes())
    }

    /// Set the destination address field.
    #[inline]
    pub fn set_dst_addr(&mut self, value: Address) {
        self.0[field::DST_ADDR].copy_from_slice(value.as_bytes())
    }

    /// The payload area, bounded by the payload length field.
    #[inline]
    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        let end = self.total_len();
        &mut self.0[HEADER_LEN..end]
    }
}

/// A high-level representation of the fixed IPv6 header.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    /// IPv6 address of the source node.
    pub src_addr:    Address,
    /// IPv6 address of the destination node.
    pub dst_addr:    Address,
    /// Protocol contained in the next header.
    pub next_header: Protocol,
    /// Length of the payload including the extension headers.
    pub payload_len: usize,
    /// The 8-bit hop limit field.
    pub hop_limit:   u8,
}

impl Repr {
    /// Parse an IPv6 header and return a high-level representation.
    pub fn parse(packet: &ipv6) -> Result<Repr> {
        packet.check_len()?;
        if packet.version() != 6 {
            return Err(Error::Malformed);
        }

        Ok(Repr {
            src_addr:    packet.src_addr(),
            dst_addr:    packet.dst_addr(),
            next_header: packet.next_header(),
            payload_len: packet.payload_len() as usize,
            hop_limit:   packet.hop_limit(),
        })
    }

    /// Return the length of a header that will be emitted from this high-level representation.
    pub fn buffer_len(&self) -> usize {
        HEADER_LEN
    }

    /// Emit a high-level representation into an IPv6 header.
    pub fn emit(&self, packet: &mut ipv6) {
        packet.set_version(6);
        packet.set_payload_len(self.payload_len as u16);
        packet.set_next_header(self.next_header);
        packet.set_hop_limit(self.hop_limit);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IPv6 src={} dst={} nxt_hdr={:?} hop_limit={} len={}",
               self.src_addr, self.dst_addr, self.next_header, self.hop_limit, self.payload_len)
    }
}

pub(crate) mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::*;

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final complement).
    pub(crate) fn data(mut data: &[u8]) -> u16 {
        let mut accum = 0;

        // For each 32-byte chunk...
        const CHUNK_SIZE: usize = 32;
        while data.len() >= CHUNK_SIZE {
            let mut d = &data[..CHUNK_SIZE];
            // ... take by 2 bytes and sum them.
            while d.len() >= 2 {
                accum += NetworkEndian::read_u16(d) as u32;
                d = &d[2..];
            }

            data = &data[CHUNK_SIZE..];
        }

        // Sum the rest that does not fit the last 32-byte chunk,
        // taking by 2 bytes.
        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }

        // Add the last remaining odd byte, if any.
        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        propagate_carries(accum)
    }

    /// Combine several RFC 1071 compliant checksums.
    pub(crate) fn combine(checksums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in checksums {
            accum += word as u32;
        }
        propagate_carries(accum)
    }

    /// Compute the IPv6 pseudo header checksum.
    ///
    /// See [RFC 8200 § 8.1](https://tools.ietf.org/html/rfc8200#section-8.1).
    pub(crate) fn pseudo_header(src_addr: &Address, dst_addr: &Address,
                         protocol: Protocol, length: u32) -> u16 {
        let mut proto_len = [0u8; 8];
        proto_len[7] = protocol.into();
        NetworkEndian::write_u32(&mut proto_len[0..4], length);
        combine(&[
            data(src_addr.as_bytes()),
            data(dst_addr.as_bytes()),
            data(&proto_len[..])
        ])
    }

    /// The complemented transport checksum of `segment`.
    ///
    /// The checksum field inside `segment` must be zero when filling, and left as received when
    /// verifying. A correct segment then verifies to `0`.
    pub(crate) fn transport(src_addr: &Address, dst_addr: &Address,
                            protocol: Protocol, segment: &[u8]) -> u16 {
        !combine(&[
            pseudo_header(src_addr, dst_addr, protocol, segment.len() as u32),
            data(segment),
        ])
    }
}
