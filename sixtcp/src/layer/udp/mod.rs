//! The udp layer.
//!
//! Datagrams carry no connection state. An inbound datagram is routed to the datagram socket
//! bound to its destination port, regardless of where it came from, and handed to the owning
//! application thread as a notification. Everything that does not verify or has no socket is
//! dropped.
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::wire::{self, Checksum, UdpRepr};
use crate::wire::ip::{Endpoint, Protocol};
use crate::wire::udp;

use super::{Error, Result};
use super::ip::{Datagram, Ipv6};
use super::socket::Notification;
use super::tcp::Shared;

#[cfg(test)]
mod tests;

/// A message to the udp dispatcher.
#[derive(Debug)]
pub enum Command {
    /// A datagram with next header UDP arrived.
    Inbound(Datagram),
    /// Stop the dispatcher.
    Shutdown,
}

/// Routes inbound datagrams to their sockets.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// A dispatcher over the sockets of a stack.
    pub fn new(shared: Arc<Shared>) -> Self {
        Dispatcher { shared }
    }

    /// Handle commands until shut down or all senders are gone.
    pub fn run(&self, commands: Receiver<Command>) {
        for command in commands {
            match command {
                Command::Inbound(datagram) => self.handle(&datagram),
                Command::Shutdown => break,
            }
        }
        net_trace!("udp: dispatcher stopped");
    }

    /// Deliver one datagram, or drop it.
    pub fn handle(&self, datagram: &Datagram) {
        if let Err(err) = self.deliver(datagram) {
            net_debug!("udp: dropping datagram: {}", err);
        }
    }

    fn deliver(&self, datagram: &Datagram) -> wire::Result<()> {
        let (ip_repr, transport) = datagram.parse()?;
        if ip_repr.next_header != Protocol::Udp {
            return Err(wire::Error::Unrecognized);
        }

        let packet = udp::udp::new_checked(transport)?;
        let repr = UdpRepr::parse(packet, Checksum::Manual {
            src_addr: ip_repr.src_addr,
            dst_addr: ip_repr.dst_addr,
        })?;

        let local = Endpoint::new(ip_repr.dst_addr, repr.dst_port);
        let (id, socket) = self.shared.table.lookup_by_port(local)
            .ok_or(wire::Error::Unrecognized)?;
        let from = Endpoint::new(ip_repr.src_addr, repr.src_port);
        net_trace!("udp: {} from {} for {}", repr, from, id);
        socket.notify(Notification::Datagram(from, packet.payload_slice().to_vec()));
        Ok(())
    }
}

/// Send a datagram from `local` to `dst`.
///
/// An unspecified local address is replaced with the address of the IPv6 layer.
pub fn send_to(ip: &dyn Ipv6, local: Endpoint, dst: Endpoint, payload: &[u8]) -> Result<()> {
    if dst.port == 0 || dst.addr.is_unspecified() {
        return Err(Error::Unreachable);
    }
    if payload.len() > usize::from(u16::MAX) - udp::HEADER_LEN {
        return Err(Error::BadSize);
    }

    let src_addr = if local.addr.is_unspecified() {
        ip.local_addr()
    } else {
        local.addr
    };
    let repr = UdpRepr {
        src_port: local.port,
        dst_port: dst.port,
        payload_len: payload.len() as u16,
    };
    let bytes = repr.to_bytes(payload, Checksum::Manual {
        src_addr,
        dst_addr: dst.addr,
    });
    ip.send(dst.addr, Protocol::Udp, &bytes)
}
