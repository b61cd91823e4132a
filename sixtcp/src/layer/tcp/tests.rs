//! Tcp layer tests.
//!
//! The state machine is tested on bare control blocks first. The scenarios after that run two
//! hosts, each with its own dispatcher, synchronously on the test thread. Their IPv6 layers only
//! capture what is sent, and the test decides which datagrams reach the other side. Both hosts
//! read the same manual clock and the timer sweep is triggered by hand.
use std::iter;
use std::mem;
use std::sync::{Arc, mpsc};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use super::*;
use crate::config::Config;
use crate::layer::{Error, Result};
use crate::layer::ip::{Datagram, Handler, Ipv6};
use crate::layer::socket::{Kind, Notification, Socket, SocketId};
use crate::time::{Duration, Instant, ManualClock};
use crate::wire::{Checksum, TcpFlags, TcpRepr, TcpSeqNumber};
use crate::wire::hc::{self, Level};
use crate::wire::ip::{Address, Endpoint, Protocol};

const ADDR_A: Address = Address([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
const ADDR_B: Address = Address([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
const CLIENT_PORT: u16 = 49152;
const SERVER_PORT: u16 = 80;

/// An IPv6 layer that keeps everything sent.
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

struct Host {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    ip: Arc<Capture>,
}

impl Host {
    fn new(addr: Address, iss: i32, context: u16, config: Config, clock: &Arc<ManualClock>) -> Self {
        let ip = Arc::new(Capture { addr, sent: Mutex::new(Vec::new()) });
        let admission = Admission::starting_at(TcpSeqNumber(iss), context, 0);
        let shared = Arc::new(Shared::new(config, ip.clone(), clock.clone(), admission));
        Host {
            dispatcher: Dispatcher::new(shared.clone()),
            shared,
            ip,
        }
    }

    fn stream(&self, port: u16) -> (SocketId, Arc<Socket>) {
        let config = &self.shared.config;
        let (id, socket) = self.shared.table
            .allocate(Kind::Stream, None, Connection::new(config), config.recv_buffer)
            .unwrap();
        socket.tuple.lock().local = Endpoint::new(self.ip.addr, port);
        (id, socket)
    }

    fn socket(&self, id: SocketId) -> Arc<Socket> {
        self.shared.table.get(id).unwrap()
    }

    fn request(&self, id: SocketId, request: Request) {
        assert!(self.dispatcher.handle(Command::App(id, request)));
    }

    fn take(&self) -> Vec<Datagram> {
        mem::take(&mut *self.ip.sent.lock())
    }

    fn receive(&self, datagrams: Vec<Datagram>) {
        for datagram in datagrams {
            assert!(self.dispatcher.handle(Command::Inbound(datagram)));
        }
    }

    fn tick(&self) {
        let (commands, timer) = mpsc::channel();
        timer::sweep(&self.shared, &commands).unwrap();
        drop(commands);
        for command in timer {
            assert!(self.dispatcher.handle(command));
        }
    }
}

/// Deliver everything in flight until both sides are quiet.
fn exchange(a: &Host, b: &Host) {
    loop {
        let to_b = a.take();
        let to_a = b.take();
        if to_a.is_empty() && to_b.is_empty() {
            break;
        }
        b.receive(to_b);
        a.receive(to_a);
    }
}

fn transport(datagram: &Datagram) -> &[u8] {
    datagram.parse().unwrap().1
}

fn notifications(socket: &Socket) -> Vec<Notification> {
    iter::from_fn(|| socket.try_notification()).collect()
}

struct Pair {
    clock: Arc<ManualClock>,
    a: Host,
    b: Host,
    client: SocketId,
    listener: SocketId,
    child: SocketId,
}

/// A connection from A to B, established with the initial sequence numbers 100 and 500.
fn connected(config: Config) -> Pair {
    let clock = Arc::new(ManualClock::new(Instant::from_secs(1)));
    let a = Host::new(ADDR_A, 100, 7, config.clone(), &clock);
    let b = Host::new(ADDR_B, 500, 9, config, &clock);

    let (listener, _) = b.stream(SERVER_PORT);
    b.request(listener, Request::Listen);
    let (client, client_socket) = a.stream(CLIENT_PORT);
    a.request(client, Request::Connect(Endpoint::new(ADDR_B, SERVER_PORT)));
    exchange(&a, &b);

    assert_eq!(notifications(&client_socket), vec![Notification::Connected]);
    let child = match notifications(&b.socket(listener)).as_slice() {
        [Notification::Ready, Notification::Accepted(child)] => *child,
        other => panic!("unexpected listener events {:?}", other),
    };

    Pair { clock, a, b, client, listener, child }
}

fn established() -> Connection {
    let mut tcb = Connection::new(&Config::default());
    tcb.current = State::Established;
    tcb.send.initial_seq = TcpSeqNumber(999);
    tcb.send.unacked = TcpSeqNumber(1000);
    tcb.send.next = TcpSeqNumber(1000);
    tcb.send.window = 512;
    tcb.recv.initial_seq = TcpSeqNumber(1999);
    tcb.recv.next = TcpSeqNumber(2000);
    tcb
}

fn segment(flags: TcpFlags, seq: i32, ack: Option<i32>, payload_len: u16) -> TcpRepr {
    let mut flags = flags;
    flags.set_ack(ack.is_some());
    TcpRepr {
        src_port: CLIENT_PORT,
        dst_port: SERVER_PORT,
        flags,
        seq_number: TcpSeqNumber(seq),
        ack_number: ack.map(TcpSeqNumber),
        window_len: 512,
        max_seg_size: None,
        payload_len,
    }
}

#[test]
fn handshake_sequence_numbers() {
    let config = Config::default();
    let now = Instant::from_secs(1);

    let mut a = Connection::new(&config);
    let syn = a.open_active(TcpSeqNumber(100), None, now).answer.unwrap();
    assert_eq!(syn.flags, TcpFlags::SYN);
    assert_eq!(syn.seq_number, TcpSeqNumber(100));
    assert_eq!(syn.ack_number, None);
    assert_eq!(syn.max_seg_size, Some(config.mss));
    assert_eq!(a.current, State::SynSent);

    let mut listener = Connection::new(&config);
    listener.open_passive();
    assert!(listener.arrives(&syn, now).spawn);
    assert_eq!(listener.current, State::Listen);

    let mut b = Connection::new(&config);
    let syn_ack = b.accept_syn(&syn, TcpSeqNumber(500), None, now).answer.unwrap();
    assert_eq!(syn_ack.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(syn_ack.seq_number, TcpSeqNumber(500));
    assert_eq!(syn_ack.ack_number, Some(TcpSeqNumber(101)));
    assert_eq!(b.current, State::SynReceived);

    let signals = a.arrives(&syn_ack, now + Duration::from_millis(10));
    let ack = signals.answer.unwrap();
    assert_eq!(ack.flags, TcpFlags::ACK);
    assert_eq!(ack.seq_number, TcpSeqNumber(101));
    assert_eq!(ack.ack_number, Some(TcpSeqNumber(501)));
    assert_eq!(signals.notify, vec![Notification::Connected]);
    assert_eq!(a.current, State::Established);

    let signals = b.arrives(&ack, now + Duration::from_millis(20));
    assert!(signals.accepted);
    assert_eq!(signals.answer, None);
    assert_eq!(b.current, State::Established);

    assert_eq!(a.recv.next, TcpSeqNumber(501));
    assert_eq!(b.recv.next, TcpSeqNumber(101));
    assert_eq!(a.send.unacked, a.send.next);
    assert_eq!(b.send.unacked, b.send.next);
}

#[test]
fn consistency_verdicts() {
    let mut tcb = established();
    tcb.send_data(&[0; 10], Instant::from_millis(0));
    assert_eq!(tcb.send.next, TcpSeqNumber(1010));

    let check = |flags, seq, ack, len| tcb.check(&segment(flags, seq, ack, len));
    assert_eq!(check(TcpFlags::default(), 2000, Some(1011), 0), Verdict::AckTooBig);
    assert_eq!(check(TcpFlags::default(), 2000, Some(999), 0), Verdict::AckTooSmall);
    assert_eq!(check(TcpFlags::default(), 2000, Some(1000), 0), Verdict::AckTooSmall);
    assert_eq!(check(TcpFlags::default(), 2000, Some(1000), 4), Verdict::PacketOk);
    assert_eq!(check(TcpFlags::default(), 2000, Some(1010), 0), Verdict::PacketOk);
    assert_eq!(check(TcpFlags::default(), 1990, Some(1005), 5), Verdict::SeqTooSmall);
    assert_eq!(check(TcpFlags::FIN, 1999, None, 0), Verdict::SeqTooSmall);
    assert_eq!(check(TcpFlags::default(), 1990, None, 0), Verdict::PacketOk);
}

#[test]
fn rejected_acks_do_not_mutate() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut tcb = established();
    tcb.send_data(&[1; 8], Instant::from_millis(0));

    for _ in 0..500 {
        let ack = match rng.gen_range(0..3) {
            0 => 1008 + rng.gen_range(1..100_000),
            1 => 1000 - rng.gen_range(1..100_000),
            _ => 1000,
        };
        let before = (tcb.current, tcb.send.unacked, tcb.send.next, tcb.recv.next, tcb.in_flight.clone());
        let signals = tcb.arrives(&segment(TcpFlags::default(), 2000, Some(ack), 0), Instant::from_millis(5));
        let after = (tcb.current, tcb.send.unacked, tcb.send.next, tcb.recv.next, tcb.in_flight.clone());
        assert_eq!(before, after, "ack {} changed the connection", ack);
        assert!(signals.notify.is_empty());
        if let Some(answer) = signals.answer {
            assert_eq!(answer.flags, TcpFlags::ACK);
            assert_eq!(answer.ack_number, Some(TcpSeqNumber(2000)));
        }
    }
}

#[test]
fn random_segments_keep_window_order() {
    const STATES: [State; 11] = [
        State::Closed, State::Listen, State::SynSent, State::SynReceived, State::Established,
        State::FinWait1, State::FinWait2, State::Closing, State::TimeWait, State::CloseWait,
        State::LastAck,
    ];
    let mut rng = StdRng::seed_from_u64(11);

    for &state in STATES.iter() {
        let mut tcb = established();
        tcb.current = state;
        tcb.send.next = TcpSeqNumber(1001);
        for step in 0..300 {
            let mut flags = TcpFlags(rng.gen_range(0..0x20));
            flags.set_ack(false);
            let ack = if rng.gen() { Some(995 + rng.gen_range(0..10)) } else { None };
            let seq = 1995 + rng.gen_range(0..10);
            let len = rng.gen_range(0..4);
            let time = Instant::from_millis(step);
            let signals = tcb.arrives(&segment(flags, seq, ack, len), time);
            assert!(tcb.send.unacked <= tcb.send.next, "{:?} after {:?}", tcb.send, state);
            if let Some(answer) = signals.answer {
                assert!(answer.payload_len as usize <= tcb.in_flight.len());
            }
        }
    }
}

#[test]
fn duplicate_data_is_reacked() {
    let mut tcb = established();
    let data = segment(TcpFlags::PSH, 2000, Some(1000), 5);

    let signals = tcb.arrives(&data, Instant::from_millis(0));
    assert!(signals.accept_payload);
    assert_eq!(signals.answer.unwrap().ack_number, Some(TcpSeqNumber(2005)));
    assert_eq!(tcb.recv.window, 512 - 5);

    let signals = tcb.arrives(&data, Instant::from_millis(0));
    assert!(!signals.accept_payload);
    assert_eq!(signals.answer.unwrap().ack_number, Some(TcpSeqNumber(2005)));
    assert_eq!(tcb.recv.next, TcpSeqNumber(2005));
}

#[test]
fn no_reassembly_or_overrun() {
    let mut tcb = established();
    tcb.recv.window = 4;

    let signals = tcb.arrives(&segment(TcpFlags::PSH, 2000, Some(1000), 5), Instant::from_millis(0));
    assert!(!signals.accept_payload);
    assert_eq!(signals.answer.unwrap().ack_number, Some(TcpSeqNumber(2000)));

    let signals = tcb.arrives(&segment(TcpFlags::PSH, 2002, Some(1000), 2), Instant::from_millis(0));
    assert!(!signals.accept_payload);
    assert_eq!(signals.answer.unwrap().ack_number, Some(TcpSeqNumber(2000)));
    assert_eq!(tcb.recv.next, TcpSeqNumber(2000));
}

#[test]
fn sent_data_is_acknowledged() {
    let mut tcb = established();
    let signals = tcb.send_data(b"hello", Instant::from_millis(0));
    let answer = signals.answer.unwrap();
    assert_eq!(answer.seq_number, TcpSeqNumber(1000));
    assert_eq!(answer.payload_len, 5);
    assert_eq!(tcb.in_flight, b"hello");

    // Only one segment at a time.
    assert_eq!(tcb.send_data(b"more", Instant::from_millis(0)).notify,
        vec![Notification::Rejected(crate::layer::Error::Illegal)]);

    let signals = tcb.arrives(&segment(TcpFlags::default(), 2000, Some(1005), 0), Instant::from_millis(300));
    assert_eq!(signals.notify, vec![Notification::Acked]);
    assert!(tcb.in_flight.is_empty());
    assert_eq!(tcb.send.unacked, TcpSeqNumber(1005));
    assert_eq!(tcb.timing.rtt.srtt(), Some(Duration::from_millis(300)));
}

#[test]
fn passive_close() {
    let mut tcb = established();
    let signals = tcb.arrives(&segment(TcpFlags::FIN, 2000, Some(1000), 0), Instant::from_millis(0));
    assert!(signals.eof);
    let answer = signals.answer.unwrap();
    assert_eq!(answer.flags, TcpFlags::FIN | TcpFlags::ACK);
    assert_eq!(answer.seq_number, TcpSeqNumber(1000));
    assert_eq!(answer.ack_number, Some(TcpSeqNumber(2001)));
    assert_eq!(tcb.current, State::LastAck);

    let signals = tcb.arrives(&segment(TcpFlags::default(), 2001, Some(1001), 0), Instant::from_millis(0));
    assert_eq!(signals.notify, vec![Notification::Closed]);
    assert_eq!(tcb.current, State::Closed);
}

#[test]
fn active_close() {
    let mut tcb = established();
    let answer = tcb.close(Instant::from_millis(0)).answer.unwrap();
    assert_eq!(answer.flags, TcpFlags::FIN | TcpFlags::ACK);
    assert_eq!(tcb.current, State::FinWait1);
    assert!(tcb.detached);

    let signals = tcb.arrives(&segment(TcpFlags::default(), 2000, Some(1001), 0), Instant::from_millis(0));
    assert_eq!(signals.notify, vec![Notification::Closed]);
    assert_eq!(tcb.current, State::FinWait2);

    let signals = tcb.arrives(&segment(TcpFlags::FIN, 2000, Some(1001), 0), Instant::from_millis(0));
    assert_eq!(signals.answer.unwrap().ack_number, Some(TcpSeqNumber(2001)));
    assert_eq!(tcb.current, State::TimeWait);

    // A retransmitted FIN is acknowledged again.
    let signals = tcb.arrives(&segment(TcpFlags::FIN, 2000, Some(1001), 0), Instant::from_millis(0));
    assert_eq!(signals.answer.unwrap().ack_number, Some(TcpSeqNumber(2001)));
    assert_eq!(tcb.current, State::TimeWait);
}

#[test]
fn simultaneous_close() {
    let mut tcb = established();
    tcb.close(Instant::from_millis(0));

    let signals = tcb.arrives(&segment(TcpFlags::FIN, 2000, Some(1000), 0), Instant::from_millis(0));
    let answer = signals.answer.unwrap();
    assert_eq!(answer.flags, TcpFlags::FIN | TcpFlags::ACK);
    assert_eq!(answer.seq_number, TcpSeqNumber(1000));
    assert_eq!(tcb.current, State::Closing);

    let signals = tcb.arrives(&segment(TcpFlags::default(), 2001, Some(1001), 0), Instant::from_millis(0));
    assert_eq!(signals.notify, vec![Notification::Closed]);
    assert_eq!(tcb.current, State::TimeWait);
}

#[test]
fn reset_closes() {
    let mut tcb = established();
    assert_eq!(tcb.arrives(&segment(TcpFlags::RST, 1500, None, 0), Instant::from_millis(0)),
        Signals::default());
    assert_eq!(tcb.current, State::Established);

    let signals = tcb.arrives(&segment(TcpFlags::RST, 2000, None, 0), Instant::from_millis(0));
    assert_eq!(signals.notify, vec![Notification::Reset]);
    assert!(signals.eof);
    assert_eq!(tcb.current, State::Closed);

    let mut tcb = Connection::new(&Config::default());
    tcb.open_active(TcpSeqNumber(100), None, Instant::from_millis(0));
    tcb.arrives(&segment(TcpFlags::RST, 0, Some(100), 0), Instant::from_millis(0));
    assert_eq!(tcb.current, State::SynSent);
    let signals = tcb.arrives(&segment(TcpFlags::RST, 0, Some(101), 0), Instant::from_millis(0));
    assert_eq!(signals.notify, vec![Notification::Reset]);
    assert_eq!(tcb.current, State::Closed);
}

#[test]
fn repeated_syn_ack_is_reacked() {
    let mut tcb = established();
    let mut syn_ack = segment(TcpFlags::SYN, 1999, Some(1000), 0);
    syn_ack.max_seg_size = Some(64);
    let signals = tcb.arrives(&syn_ack, Instant::from_millis(0));
    assert_eq!(signals.answer.unwrap().ack_number, Some(TcpSeqNumber(2000)));
    assert_eq!(signals.level, Some(Level::Full));
    assert_eq!(tcb.current, State::Established);
}

#[test]
fn handshake_over_compression() {
    let clock = Arc::new(ManualClock::new(Instant::from_secs(1)));
    let a = Host::new(ADDR_A, 100, 7, Config::default(), &clock);
    let b = Host::new(ADDR_B, 500, 9, Config::default(), &clock);
    let (listener, listener_socket) = b.stream(SERVER_PORT);
    b.request(listener, Request::Listen);
    let (client, client_socket) = a.stream(CLIENT_PORT);
    a.request(client, Request::Connect(Endpoint::new(ADDR_B, SERVER_PORT)));

    let syn = a.take();
    assert_eq!(syn.len(), 1);
    assert_eq!(hc::classify(transport(&syn[0])), Ok((Level::Full, 7)));
    b.receive(syn);

    let syn_ack = b.take();
    assert_eq!(syn_ack.len(), 1);
    assert_eq!(hc::classify(transport(&syn_ack[0])), Ok((Level::Full, 7)));
    a.receive(syn_ack);
    assert_eq!(client_socket.state(), State::Established);
    assert_eq!(notifications(&client_socket), vec![Notification::Connected]);

    let ack = a.take();
    assert_eq!(ack.len(), 1);
    assert_eq!(hc::classify(transport(&ack[0])), Ok((Level::Full, 7)));
    b.receive(ack);

    let child = match notifications(&listener_socket).as_slice() {
        [Notification::Ready, Notification::Accepted(child)] => *child,
        other => panic!("unexpected listener events {:?}", other),
    };
    let tcb = b.socket(child).tcb.lock().clone();
    assert_eq!(tcb.current, State::Established);
    assert_eq!(tcb.recv.next, TcpSeqNumber(101));
    assert_eq!(tcb.send.next, TcpSeqNumber(501));
    match tcb.compression {
        Compression::Context(context) => {
            assert_eq!(context.id, 7);
            assert_eq!(context.level, Level::Compressed);
        },
        Compression::NoCompression => panic!("connection is not compressed"),
    }
    assert_eq!(listener_socket.state(), State::Listen);
}

#[test]
fn compressed_data_segment() {
    let pair = connected(Config::default());
    let (a, b) = (&pair.a, &pair.b);

    a.request(pair.client, Request::Send(b"abc".to_vec()));
    let data = a.take();
    assert_eq!(hc::classify(transport(&data[0])), Ok((Level::Compressed, 7)));
    // Nothing changed since the handshake ACK.
    assert_eq!(transport(&data[0]).len(), 6 + 3);
    b.receive(data);
    exchange(a, b);
    assert_eq!(notifications(&a.socket(pair.client)), vec![Notification::Acked]);

    a.request(pair.client, Request::Send(b"de".to_vec()));
    let data = a.take();
    // Only the low byte of the sequence number changed.
    assert_eq!(transport(&data[0]).len(), 7 + 2);
    b.receive(data);
    exchange(a, b);
    assert_eq!(notifications(&a.socket(pair.client)), vec![Notification::Acked]);

    let mut buf = [0; 8];
    let child = b.socket(pair.child);
    assert_eq!(child.buffer.read(&mut buf), 5);
    assert_eq!(&buf[..5], b"abcde");
}

#[test]
fn retry_uses_mostly_compressed() {
    let pair = connected(Config::default());
    let (a, b) = (&pair.a, &pair.b);

    a.request(pair.client, Request::Send(b"abc".to_vec()));
    assert_eq!(a.take().len(), 1);

    a.tick();
    assert!(a.take().is_empty());

    let rto = a.socket(pair.client).tcb.lock().timing.rtt.rto();
    pair.clock.advance(rto);
    a.tick();
    let retry = a.take();
    assert_eq!(retry.len(), 1);
    assert_eq!(hc::classify(transport(&retry[0])), Ok((Level::MostlyCompressed, 7)));

    b.receive(retry);
    let ack = b.take();
    assert_eq!(hc::classify(transport(&ack[0])), Ok((Level::MostlyCompressed, 7)));
    a.receive(ack);
    assert_eq!(notifications(&a.socket(pair.client)), vec![Notification::Acked]);
}

#[test]
fn resync_after_lost_ack() {
    let pair = connected(Config::default());
    let (a, b) = (&pair.a, &pair.b);

    a.request(pair.client, Request::Send(b"abc".to_vec()));
    b.receive(a.take());
    // The compressed ACK is lost, B's send context is now ahead of A's receive context.
    assert_eq!(b.take().len(), 1);

    let rto = a.socket(pair.client).tcb.lock().timing.rtt.rto();
    pair.clock.advance(rto);
    a.tick();
    b.receive(a.take());
    let ack = b.take();
    assert_eq!(hc::classify(transport(&ack[0])), Ok((Level::MostlyCompressed, 7)));
    a.receive(ack);
    assert_eq!(notifications(&a.socket(pair.client)), vec![Notification::Acked]);

    // Both contexts agree again.
    a.request(pair.client, Request::Send(b"de".to_vec()));
    exchange(a, b);
    assert_eq!(notifications(&a.socket(pair.client)), vec![Notification::Acked]);
    let mut buf = [0; 8];
    assert_eq!(b.socket(pair.child).buffer.read(&mut buf), 5);
    assert_eq!(&buf[..5], b"abcde");
}

#[test]
fn lost_syn_ack_retry() {
    let clock = Arc::new(ManualClock::new(Instant::from_secs(1)));
    let a = Host::new(ADDR_A, 100, 7, Config::default(), &clock);
    let (client, socket) = a.stream(CLIENT_PORT);
    a.request(client, Request::Connect(Endpoint::new(ADDR_B, SERVER_PORT)));
    assert_eq!(a.take().len(), 1);

    clock.advance(Duration::from_millis(1900));
    a.tick();
    assert!(a.take().is_empty());

    clock.advance(Duration::from_millis(100));
    a.tick();
    let retry = a.take();
    assert_eq!(retry.len(), 1);
    // A retried SYN picks the next context id.
    assert_eq!(hc::classify(transport(&retry[0])), Ok((Level::Full, 8)));
    assert_eq!(socket.tcb.lock().timing.retries, 1);

    // Exactly one retry per timeout.
    a.tick();
    assert!(a.take().is_empty());

    clock.advance(Duration::from_secs(3));
    a.tick();
    assert_eq!(a.take().len(), 1);
    clock.advance(Duration::from_secs(4));
    a.tick();
    assert_eq!(a.take().len(), 1);
    assert_eq!(socket.tcb.lock().timing.retries, 3);
    assert!(notifications(&socket).is_empty());

    clock.advance(Duration::from_secs(5));
    a.tick();
    assert!(a.take().is_empty());
    assert_eq!(socket.state(), State::Closed);
    assert_eq!(notifications(&socket), vec![Notification::TimedOut]);
    // The application still holds the socket.
    assert!(a.shared.table.get(client).is_some());
}

#[test]
fn rejected_request_keeps_stream_open() {
    let clock = Arc::new(ManualClock::new(Instant::from_secs(1)));
    let a = Host::new(ADDR_A, 100, 7, Config::default(), &clock);
    let b = Host::new(ADDR_B, 500, 9, Config::default(), &clock);
    let (client, client_socket) = a.stream(CLIENT_PORT);

    a.request(client, Request::Send(b"early".to_vec()));
    assert_eq!(notifications(&client_socket), vec![Notification::Rejected(Error::Illegal)]);
    assert!(a.take().is_empty());
    assert!(!client_socket.buffer.is_closed());

    // Nobody answers, the first attempt times out.
    a.request(client, Request::Connect(Endpoint::new(ADDR_B, SERVER_PORT)));
    for secs in &[2, 3, 4, 5] {
        clock.advance(Duration::from_secs(*secs));
        a.tick();
        a.take();
    }
    assert_eq!(notifications(&client_socket), vec![Notification::TimedOut]);
    assert!(client_socket.buffer.is_closed());

    let (listener, listener_socket) = b.stream(SERVER_PORT);
    b.request(listener, Request::Listen);
    a.request(client, Request::Connect(Endpoint::new(ADDR_B, SERVER_PORT)));
    assert!(!client_socket.buffer.is_closed());
    exchange(&a, &b);
    assert_eq!(notifications(&client_socket), vec![Notification::Connected]);
    let child = match notifications(&listener_socket).as_slice() {
        [Notification::Ready, Notification::Accepted(child)] => *child,
        other => panic!("unexpected listener events {:?}", other),
    };

    b.request(child, Request::Send(b"ping".to_vec()));
    exchange(&a, &b);
    let mut buf = [0; 8];
    assert_eq!(client_socket.buffer.read(&mut buf), 4);
    assert_eq!(&buf[..4], b"ping");
}

/// Both hosts hand out context ids starting at 7.
fn same_contexts() -> (Arc<ManualClock>, Host, Host) {
    let clock = Arc::new(ManualClock::new(Instant::from_secs(1)));
    let a = Host::new(ADDR_A, 100, 7, Config::default(), &clock);
    let b = Host::new(ADDR_B, 500, 7, Config::default(), &clock);
    (clock, a, b)
}

fn context_id(socket: &Socket) -> u16 {
    match &socket.tcb.lock().compression {
        Compression::Context(context) => context.id,
        Compression::NoCompression => panic!("connection is not compressed"),
    }
}

#[test]
fn context_ids_differ_per_peer() {
    let (_clock, a, b) = same_contexts();
    let (listener_b, _) = b.stream(SERVER_PORT);
    b.request(listener_b, Request::Listen);
    let (client_a, client_a_socket) = a.stream(CLIENT_PORT);
    a.request(client_a, Request::Connect(Endpoint::new(ADDR_B, SERVER_PORT)));
    exchange(&a, &b);
    assert_eq!(notifications(&client_a_socket), vec![Notification::Connected]);
    assert_eq!(context_id(&client_a_socket), 7);

    // The other direction must not reuse the id of the first connection.
    let (listener_a, listener_a_socket) = a.stream(81);
    a.request(listener_a, Request::Listen);
    let (client_b, client_b_socket) = b.stream(CLIENT_PORT);
    b.request(client_b, Request::Connect(Endpoint::new(ADDR_A, 81)));
    let syn = b.take();
    assert_eq!(syn.len(), 1);
    assert_eq!(hc::classify(transport(&syn[0])), Ok((Level::Full, 8)));
    a.receive(syn);
    exchange(&a, &b);
    assert_eq!(notifications(&client_b_socket), vec![Notification::Connected]);
    let child_a = match notifications(&listener_a_socket).as_slice() {
        [Notification::Ready, Notification::Accepted(child)] => *child,
        other => panic!("unexpected listener events {:?}", other),
    };

    b.request(client_b, Request::Send(b"hello".to_vec()));
    let data = b.take();
    assert_eq!(hc::classify(transport(&data[0])), Ok((Level::Compressed, 8)));
    a.receive(data);
    exchange(&a, &b);
    assert_eq!(notifications(&client_b_socket), vec![Notification::Acked]);

    let mut buf = [0; 8];
    assert_eq!(a.socket(child_a).buffer.read(&mut buf), 5);
    assert_eq!(&buf[..5], b"hello");
    assert!(client_a_socket.buffer.is_empty());
}

#[test]
fn crossed_syns_with_same_context() {
    let (clock, a, b) = same_contexts();
    let (listener_a, listener_a_socket) = a.stream(81);
    a.request(listener_a, Request::Listen);
    let (listener_b, listener_b_socket) = b.stream(SERVER_PORT);
    b.request(listener_b, Request::Listen);

    let (client_a, client_a_socket) = a.stream(CLIENT_PORT);
    a.request(client_a, Request::Connect(Endpoint::new(ADDR_B, SERVER_PORT)));
    let (client_b, client_b_socket) = b.stream(CLIENT_PORT);
    b.request(client_b, Request::Connect(Endpoint::new(ADDR_A, 81)));

    // Each side refuses the SYN colliding with its own attempt.
    let (to_b, to_a) = (a.take(), b.take());
    assert_eq!(hc::classify(transport(&to_b[0])), Ok((Level::Full, 7)));
    assert_eq!(hc::classify(transport(&to_a[0])), Ok((Level::Full, 7)));
    b.receive(to_b);
    a.receive(to_a);
    assert!(a.take().is_empty());
    assert!(b.take().is_empty());
    assert_eq!(a.shared.table.sockets().len(), 2);
    assert_eq!(b.shared.table.sockets().len(), 2);

    clock.advance(Duration::from_secs(2));
    a.tick();
    let retry = a.take();
    assert_eq!(hc::classify(transport(&retry[0])), Ok((Level::Full, 8)));
    b.receive(retry);
    exchange(&a, &b);
    assert_eq!(notifications(&client_a_socket), vec![Notification::Connected]);

    // B skips the id its accepted connection took over.
    b.tick();
    let retry = b.take();
    assert_eq!(hc::classify(transport(&retry[0])), Ok((Level::Full, 9)));
    a.receive(retry);
    exchange(&a, &b);
    assert_eq!(notifications(&client_b_socket), vec![Notification::Connected]);

    let child_b = match notifications(&listener_b_socket).as_slice() {
        [Notification::Ready, Notification::Accepted(child)] => *child,
        other => panic!("unexpected listener events {:?}", other),
    };
    let child_a = match notifications(&listener_a_socket).as_slice() {
        [Notification::Ready, Notification::Accepted(child)] => *child,
        other => panic!("unexpected listener events {:?}", other),
    };

    a.request(client_a, Request::Send(b"to b".to_vec()));
    b.request(client_b, Request::Send(b"to a".to_vec()));
    exchange(&a, &b);
    let mut buf = [0; 8];
    assert_eq!(b.socket(child_b).buffer.read(&mut buf), 4);
    assert_eq!(&buf[..4], b"to b");
    assert_eq!(a.socket(child_a).buffer.read(&mut buf), 4);
    assert_eq!(&buf[..4], b"to a");
}

#[test]
fn half_open_child_gives_up_quietly() {
    let clock = Arc::new(ManualClock::new(Instant::from_secs(1)));
    let a = Host::new(ADDR_A, 100, 7, Config::default(), &clock);
    let b = Host::new(ADDR_B, 500, 9, Config::default(), &clock);
    let (listener, listener_socket) = b.stream(SERVER_PORT);
    b.request(listener, Request::Listen);
    let (client, _) = a.stream(CLIENT_PORT);
    a.request(client, Request::Connect(Endpoint::new(ADDR_B, SERVER_PORT)));
    b.receive(a.take());
    assert_eq!(b.take().len(), 1);
    assert_eq!(b.shared.table.sockets().len(), 2);

    for secs in &[2, 3, 4] {
        clock.advance(Duration::from_secs(*secs));
        b.tick();
        assert_eq!(b.take().len(), 1);
    }
    clock.advance(Duration::from_secs(5));
    b.tick();
    assert!(b.take().is_empty());

    assert_eq!(b.shared.table.sockets().len(), 1);
    assert_eq!(listener_socket.state(), State::Listen);
    assert_eq!(notifications(&listener_socket), vec![Notification::Ready]);
}

#[test]
fn close_handshake() {
    let pair = connected(Config::default());
    let (a, b) = (&pair.a, &pair.b);
    let client = a.socket(pair.client);
    let child = b.socket(pair.child);

    a.request(pair.client, Request::Close);
    exchange(a, b);
    assert_eq!(notifications(&client), vec![Notification::Closed]);
    assert_eq!(client.state(), State::TimeWait);
    assert!(child.buffer.is_closed());
    assert_eq!(child.state(), State::Closed);
    assert_eq!(notifications(&child), vec![Notification::Closed]);

    // The accepted side stays until its owner closes it.
    assert!(b.shared.table.get(pair.child).is_some());
    b.request(pair.child, Request::Close);
    assert_eq!(notifications(&child), vec![Notification::Closed]);
    assert!(b.shared.table.get(pair.child).is_none());
    assert!(b.take().is_empty());

    pair.clock.advance(Duration::from_secs(2));
    a.tick();
    assert!(a.shared.table.get(pair.client).is_none());
    assert!(b.shared.table.get(pair.listener).is_some());
}

#[test]
fn zero_time_wait_releases_immediately() {
    let mut config = Config::default();
    config.time_wait = Duration::from_millis(0);
    let pair = connected(config);

    pair.a.request(pair.client, Request::Close);
    exchange(&pair.a, &pair.b);
    assert!(pair.a.shared.table.get(pair.client).is_none());
}

#[test]
fn receive_window_tracks_buffer() {
    let mut config = Config::default();
    config.recv_buffer = 4;
    let pair = connected(config);
    let (a, b) = (&pair.a, &pair.b);
    let client = a.socket(pair.client);
    assert_eq!(client.tcb.lock().send_capacity(), 4);

    a.request(pair.client, Request::Send(b"abcd".to_vec()));
    exchange(a, b);
    assert_eq!(notifications(&client), vec![Notification::Acked]);
    assert_eq!(client.tcb.lock().send.window, 0);
    assert_eq!(client.tcb.lock().send_capacity(), 1);

    let mut buf = [0; 4];
    assert_eq!(b.socket(pair.child).buffer.read(&mut buf), 4);
    a.request(pair.client, Request::Send(b"e".to_vec()));
    exchange(a, b);
    assert_eq!(notifications(&client), vec![Notification::Acked]);
    assert_eq!(client.tcb.lock().send.window, 3);
}

#[test]
fn plain_reset() {
    let mut config = Config::default();
    config.compression = false;
    let pair = connected(config);
    let (a, b) = (&pair.a, &pair.b);
    let client = a.socket(pair.client);
    assert_eq!(client.tcb.lock().compression, Compression::NoCompression);

    let rst = TcpRepr {
        src_port: SERVER_PORT,
        dst_port: CLIENT_PORT,
        flags: TcpFlags::RST,
        seq_number: TcpSeqNumber(501),
        ack_number: None,
        window_len: 0,
        max_seg_size: None,
        payload_len: 0,
    };
    let bytes = rst.to_bytes(&[], Checksum::Manual { src_addr: ADDR_B, dst_addr: ADDR_A });
    a.receive(vec![Datagram::new(ADDR_B, ADDR_A, Protocol::Tcp, &bytes)]);

    assert_eq!(client.state(), State::Closed);
    assert_eq!(notifications(&client), vec![Notification::Reset]);
    assert!(client.buffer.is_closed());
    assert!(b.take().is_empty());
}

#[test]
fn reset_releases_queued_child() {
    let mut config = Config::default();
    config.compression = false;
    let clock = Arc::new(ManualClock::new(Instant::from_secs(1)));
    let a = Host::new(ADDR_A, 100, 7, config.clone(), &clock);
    let b = Host::new(ADDR_B, 500, 9, config, &clock);
    let (listener, listener_socket) = b.stream(SERVER_PORT);
    b.request(listener, Request::Listen);
    let (client, _) = a.stream(CLIENT_PORT);
    a.request(client, Request::Connect(Endpoint::new(ADDR_B, SERVER_PORT)));
    b.receive(a.take());
    assert_eq!(b.shared.table.sockets().len(), 2);

    let rst = segment(TcpFlags::RST, 101, None, 0);
    let bytes = rst.to_bytes(&[], Checksum::Manual { src_addr: ADDR_A, dst_addr: ADDR_B });
    b.receive(vec![Datagram::new(ADDR_A, ADDR_B, Protocol::Tcp, &bytes)]);

    assert_eq!(b.shared.table.sockets().len(), 1);
    assert_eq!(listener_socket.state(), State::Listen);
}

#[test]
fn corrupted_segment_is_dropped() {
    let pair = connected(Config::default());
    let (a, b) = (&pair.a, &pair.b);

    a.request(pair.client, Request::Send(b"abc".to_vec()));
    let data = a.take();
    let mut bytes = data[0].as_bytes().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    b.receive(vec![Datagram::from_bytes(bytes)]);
    assert!(b.take().is_empty());
    assert!(b.socket(pair.child).buffer.is_empty());
}
