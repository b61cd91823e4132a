//! Udp layer tests.
use std::iter;

use parking_lot::Mutex;

use super::*;
use crate::config::Config;
use crate::layer::ip::Handler;
use crate::layer::socket::{Kind, Socket, SocketId};
use crate::layer::tcp::{Admission, Connection};
use crate::time::{Instant, ManualClock};
use crate::wire::ip::Address;

const LOCAL: Address = Address([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
const PEER: Address = Address([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);

static PAYLOAD_BYTES: [u8; 12] =
    [0xaa, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0xff];

struct Capture {
    addr: Address,
    sent: Mutex<Vec<Datagram>>,
}

impl Ipv6 for Capture {
    fn local_addr(&self) -> Address {
        self.addr
    }

    fn send(&self, dst_addr: Address, protocol: Protocol, payload: &[u8]) -> Result<()> {
        self.sent.lock().push(Datagram::new(self.addr, dst_addr, protocol, payload));
        Ok(())
    }

    fn register(&self, _: Protocol, _: Handler) { }
}

fn capture(addr: Address) -> Arc<Capture> {
    Arc::new(Capture { addr, sent: Mutex::new(Vec::new()) })
}

fn shared(ip: Arc<Capture>) -> Arc<Shared> {
    let clock = Arc::new(ManualClock::new(Instant::from_millis(0)));
    Arc::new(Shared::new(Config::default(), ip, clock, Admission::seeded(0)))
}

fn bound(shared: &Shared, local: Endpoint) -> (SocketId, Arc<Socket>) {
    let (id, socket) = shared.table
        .allocate(Kind::Datagram, None, Connection::new(&shared.config), 0)
        .unwrap();
    socket.tuple.lock().local = local;
    (id, socket)
}

fn received(socket: &Socket) -> Vec<Notification> {
    iter::from_fn(|| socket.try_notification()).collect()
}

/// A datagram from the peer's port 5000 to `dst`.
fn from_peer(dst: Endpoint) -> Datagram {
    let peer = capture(PEER);
    send_to(&*peer, Endpoint::new(Address::UNSPECIFIED, 5000), dst, &PAYLOAD_BYTES).unwrap();
    let datagram = peer.sent.lock().pop().unwrap();
    datagram
}

#[test]
fn simple() {
    let shared = shared(capture(LOCAL));
    let dispatcher = Dispatcher::new(shared.clone());
    let (_, socket) = bound(&shared, Endpoint::new(Address::UNSPECIFIED, 5683));

    dispatcher.handle(&from_peer(Endpoint::new(LOCAL, 5683)));
    assert_eq!(received(&socket), vec![
        Notification::Datagram(Endpoint::new(PEER, 5000), PAYLOAD_BYTES.to_vec()),
    ]);
}

#[test]
fn send_fills_header() {
    let ip = capture(LOCAL);
    send_to(&*ip, Endpoint::new(Address::UNSPECIFIED, 7), Endpoint::new(PEER, 9), b"ping")
        .unwrap();

    let datagram = ip.sent.lock().pop().unwrap();
    let (ip_repr, transport) = datagram.parse().unwrap();
    assert_eq!(ip_repr.src_addr, LOCAL);
    assert_eq!(ip_repr.dst_addr, PEER);
    assert_eq!(ip_repr.next_header, Protocol::Udp);

    let packet = udp::udp::new_checked(transport).unwrap();
    let repr = UdpRepr::parse(packet, Checksum::Manual { src_addr: LOCAL, dst_addr: PEER })
        .unwrap();
    assert_eq!(repr, UdpRepr { src_port: 7, dst_port: 9, payload_len: 4 });
    assert_eq!(packet.payload_slice(), b"ping");
}

#[test]
fn unknown_port_dropped() {
    let shared = shared(capture(LOCAL));
    let dispatcher = Dispatcher::new(shared.clone());
    let (_, socket) = bound(&shared, Endpoint::new(LOCAL, 5683));

    dispatcher.handle(&from_peer(Endpoint::new(LOCAL, 5684)));
    assert!(received(&socket).is_empty());
}

#[test]
fn bad_checksum_dropped() {
    let shared = shared(capture(LOCAL));
    let dispatcher = Dispatcher::new(shared.clone());
    let (_, socket) = bound(&shared, Endpoint::new(LOCAL, 5683));

    let mut bytes = from_peer(Endpoint::new(LOCAL, 5683)).as_bytes().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x10;
    dispatcher.handle(&Datagram::from_bytes(bytes));
    assert!(received(&socket).is_empty());
}

#[test]
fn zero_checksum_dropped() {
    let shared = shared(capture(LOCAL));
    let dispatcher = Dispatcher::new(shared.clone());
    let (_, socket) = bound(&shared, Endpoint::new(LOCAL, 5683));

    let repr = UdpRepr { src_port: 5000, dst_port: 5683, payload_len: 4 };
    let bytes = repr.to_bytes(b"ping", Checksum::Ignored);
    dispatcher.handle(&Datagram::new(PEER, LOCAL, Protocol::Udp, &bytes));
    assert!(received(&socket).is_empty());
}

#[test]
fn stream_sockets_are_not_datagram_sinks() {
    let shared = shared(capture(LOCAL));
    let dispatcher = Dispatcher::new(shared.clone());
    let config = &shared.config;
    let (_, stream) = shared.table
        .allocate(Kind::Stream, None, Connection::new(config), config.recv_buffer)
        .unwrap();
    stream.tuple.lock().local = Endpoint::new(LOCAL, 5683);

    dispatcher.handle(&from_peer(Endpoint::new(LOCAL, 5683)));
    assert!(received(&stream).is_empty());
}

#[test]
fn oversized_and_unreachable() {
    let ip = capture(LOCAL);
    let local = Endpoint::new(LOCAL, 7);
    let huge = vec![0; usize::from(u16::MAX)];
    assert_eq!(send_to(&*ip, local, Endpoint::new(PEER, 9), &huge), Err(Error::BadSize));
    assert_eq!(send_to(&*ip, local, Endpoint::new(PEER, 0), b"x"), Err(Error::Unreachable));
    assert_eq!(
        send_to(&*ip, local, Endpoint::new(Address::UNSPECIFIED, 9), b"x"),
        Err(Error::Unreachable));
    assert!(ip.sent.lock().is_empty());
}
