//! The IPv6 layer boundary.
//!
//! The transports do not implement IPv6 themselves. They consume an implementation of [`Ipv6`]
//! that sends payloads to a destination and delivers inbound datagrams to registered handlers.
//! Link fragmentation and routing are the business of that implementation.
//!
//! [`Ipv6`]: trait.Ipv6.html
use std::sync::Arc;

use crate::wire::ip::{self, Address, Protocol};
use super::Result;

/// Receives every inbound datagram with a particular next header.
///
/// Handlers are called on the thread of the IPv6 layer. They should only forward the datagram to
/// the channel of their owning thread.
pub type Handler = Arc<dyn Fn(Datagram) + Send + Sync>;

/// The services the transports need from IPv6.
pub trait Ipv6: Send + Sync {
    /// The address of this host.
    fn local_addr(&self) -> Address;

    /// Send a transport payload.
    ///
    /// The implementation prepends the IPv6 header with the local address as source.
    fn send(&self, dst_addr: Address, protocol: Protocol, payload: &[u8]) -> Result<()>;

    /// Deliver datagrams with next header `protocol` to `handler`.
    ///
    /// A later registration for the same protocol replaces the earlier one.
    fn register(&self, protocol: Protocol, handler: Handler);
}

/// An owned IPv6 datagram, laid out as `[IPv6 header][transport header][payload]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram(Vec<u8>);

impl Datagram {
    /// Build a datagram with a default hop limit.
    pub fn new(src_addr: Address, dst_addr: Address, protocol: Protocol, payload: &[u8]) -> Self {
        let repr = ip::Repr {
            src_addr,
            dst_addr,
            next_header: protocol,
            payload_len: payload.len(),
            hop_limit: 64,
        };
        let mut buffer = vec![0; repr.buffer_len() + payload.len()];
        let packet = ip::ipv6::new_unchecked_mut(&mut buffer);
        repr.emit(packet);
        packet.payload_mut_slice().copy_from_slice(payload);
        Datagram(buffer)
    }

    /// Take ownership of received bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Datagram(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Validate the header and split off the transport part.
    ///
    /// The transport part is bounded by the payload length field, trailing bytes are ignored.
    pub fn parse(&self) -> crate::wire::Result<(ip::Repr, &[u8])> {
        let packet = ip::ipv6::new_checked(&self.0)?;
        let repr = ip::Repr::parse(packet)?;
        Ok((repr, packet.payload_slice()))
    }
}
