//! The TCP dispatcher thread.
//!
//! All changes to connections happen here, in the order the commands arrive in the
//! dispatcher's channel. Segments come from the IPv6 layer, requests from application threads
//! and expired timeouts from the timer thread.
use std::convert::TryFrom;
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use parking_lot::MutexGuard;

use crate::config::Config;
use crate::time::Clock;
use crate::wire::{self, Checksum, TcpRepr};
use crate::wire::hc::{self, Fields, Level};
use crate::wire::ip::{Address, Endpoint, Protocol, Repr as Ipv6Repr};
use crate::wire::tcp;

use super::super::ip::{Datagram, Ipv6};
use super::super::socket::{FourTuple, Kind, Notification, Socket, SocketId, SocketTable};
use super::admission::Admission;
use super::connection::{Compression, Connection, Context, Signals, State};
use super::timer::{self, TimerEvent};

/// State shared by the protocol threads and the application surface.
pub struct Shared {
    /// The tunables.
    pub config: Config,
    /// All sockets.
    pub table: SocketTable,
    /// Initial values of new connections.
    pub admission: Admission,
    /// The network below.
    pub ip: Arc<dyn Ipv6>,
    /// The time source.
    pub clock: Arc<dyn Clock>,
}

/// A message to the dispatcher.
#[derive(Debug)]
pub enum Command {
    /// A datagram carrying a TCP segment arrived.
    Inbound(Datagram),
    /// An application thread wants something from one of its sockets.
    App(SocketId, Request),
    /// A timeout of a connection expired.
    Timer(SocketId, TimerEvent),
    /// Stop the dispatcher.
    Shutdown,
}

/// Operations requested by an application thread.
///
/// Each is answered with a notification on the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Wait for connections, answered with `Ready`.
    Listen,
    /// Connect to the peer, answered with `Connected` once established.
    Connect(Endpoint),
    /// Send a single segment, answered with `Acked`.
    Send(Vec<u8>),
    /// Close our side, answered with `Closed`.
    Close,
}

/// Processes commands for one stack.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Shared {
    /// Bundle the parts of a stack.
    pub fn new(config: Config, ip: Arc<dyn Ipv6>, clock: Arc<dyn Clock>, admission: Admission)
        -> Self
    {
        Shared {
            table: SocketTable::new(config.sockets),
            config,
            admission,
            ip,
            clock,
        }
    }
}

impl Dispatcher {
    /// A dispatcher working on the shared state.
    pub fn new(shared: Arc<Shared>) -> Self {
        Dispatcher { shared }
    }

    /// Handle commands until shut down or all senders are gone.
    pub fn run(&self, commands: Receiver<Command>) {
        for command in commands {
            if !self.handle(command) {
                break;
            }
        }
        net_trace!("tcp: dispatcher stopped");
    }

    /// Handle one command, returning `false` on shutdown.
    pub fn handle(&self, command: Command) -> bool {
        match command {
            Command::Inbound(datagram) => self.inbound(&datagram),
            Command::App(id, request) => self.request(id, request),
            Command::Timer(id, event) => self.timer(id, event),
            Command::Shutdown => return false,
        }
        true
    }

    fn inbound(&self, datagram: &Datagram) {
        let (ip_repr, payload) = match datagram.parse() {
            Ok(parsed) => parsed,
            Err(err) => {
                net_debug!("tcp: dropping datagram: {}", err);
                return;
            },
        };
        if ip_repr.next_header != Protocol::Tcp {
            return;
        }

        let result = if self.shared.config.compression {
            match hc::classify(payload) {
                Ok((Level::Full, context_id)) => self.inbound_full(&ip_repr, payload, context_id),
                Ok((_, context_id)) => self.inbound_compressed(&ip_repr, payload, context_id),
                Err(err) => Err(err),
            }
        } else {
            self.inbound_plain(&ip_repr, payload)
        };

        if let Err(err) = result {
            net_debug!("tcp: dropping segment from {}: {}", ip_repr.src_addr, err);
        }
    }

    fn inbound_plain(&self, ip_repr: &Ipv6Repr, segment: &[u8]) -> wire::Result<()> {
        let (repr, payload) = parse_segment(ip_repr, segment)?;
        self.deliver(ip_repr, &repr, payload, None)
    }

    fn inbound_full(&self, ip_repr: &Ipv6Repr, data: &[u8], context_id: u16) -> wire::Result<()> {
        let full = hc::Full::parse(data)?;
        let (repr, payload) = parse_segment(ip_repr, full.segment)?;
        self.deliver(ip_repr, &repr, payload, Some(context_id))
    }

    fn inbound_compressed(&self, ip_repr: &Ipv6Repr, data: &[u8], context_id: u16)
        -> wire::Result<()>
    {
        let (id, socket) = self.shared.table
            .lookup_by_context(ip_repr.src_addr, ip_repr.dst_addr, context_id)
            .ok_or(wire::Error::Unrecognized)?;
        let tuple = socket.tuple();
        let mut tcb = socket.tcb.lock();
        let last = match &tcb.compression {
            Compression::Context(context) => context.recv,
            Compression::NoCompression => return Err(wire::Error::Unrecognized),
        };

        let (header, header_len) = hc::Compressed::parse(data, &last)?;
        let payload = &data[header_len..];
        let repr = TcpRepr {
            src_port: tuple.foreign.port,
            dst_port: tuple.local.port,
            flags: header.flags,
            seq_number: header.fields.seq,
            ack_number: header.ack_number(),
            window_len: header.fields.window,
            max_seg_size: None,
            payload_len: u16::try_from(payload.len()).map_err(|_| wire::Error::Malformed)?,
        };

        // The checksum covers the segment as it would have been sent uncompressed.
        let mut segment = repr.to_bytes(payload, Checksum::Ignored);
        tcp::tcp::new_unchecked_mut(&mut segment).set_checksum(header.checksum);
        if !tcp::tcp::new_unchecked(&segment).verify_checksum(ip_repr.src_addr, ip_repr.dst_addr) {
            return Err(wire::Error::WrongChecksum);
        }
        net_trace!("tcp: {} for {}", header, id);

        if let Compression::Context(context) = &mut tcb.compression {
            context.recv = header.fields;
        }
        // Answer a resynchronization in kind.
        let level = if header.mostly { Some(Level::MostlyCompressed) } else { None };
        self.segment(id, &socket, tcb, &repr, payload, level);
        Ok(())
    }

    /// Hand an uncompressed segment to its connection or listener.
    fn deliver(&self, ip_repr: &Ipv6Repr, repr: &TcpRepr, payload: &[u8], context: Option<u16>)
        -> wire::Result<()>
    {
        let local = Endpoint::new(ip_repr.dst_addr, repr.dst_port);
        let foreign = Endpoint::new(ip_repr.src_addr, repr.src_port);
        let table = &self.shared.table;
        let (id, socket) = table.lookup_by_tuple(local, foreign)
            .or_else(|| table.lookup_by_listen(local))
            .ok_or(wire::Error::Unrecognized)?;

        if let Some(context_id) = context {
            // Compressed segments of the other connection would be taken for this one.
            if table.context_in_use(foreign.addr, context_id, id) {
                net_debug!("tcp: {} offers context {} already in use", foreign, context_id);
                return Ok(());
            }
        }

        let mut tcb = socket.tcb.lock();
        if tcb.current == State::Listen {
            let signals = tcb.arrives(repr, self.shared.clock.now());
            drop(tcb);
            if signals.spawn {
                self.spawn(id, FourTuple { local, foreign }, repr, context);
            }
            return Ok(());
        }

        if let Some(context_id) = context {
            seed_context(&mut tcb.compression, context_id);
        }
        if let Compression::Context(context) = &mut tcb.compression {
            context.recv = observed(repr, &context.recv);
        }
        self.segment(id, &socket, tcb, repr, payload, None);
        Ok(())
    }

    /// Create a queued connection for a SYN that reached a listener.
    fn spawn(&self, listener: SocketId, tuple: FourTuple, repr: &TcpRepr, context: Option<u16>) {
        let config = &self.shared.config;
        let (id, socket) = match self.shared.table.allocate(
            Kind::Stream,
            Some(listener),
            Connection::new(config),
            config.recv_buffer)
        {
            Ok(allocated) => allocated,
            // Already logged, the peer will retry its SYN.
            Err(_) => return,
        };
        *socket.tuple.lock() = tuple;
        net_debug!("tcp: {} spawned {} for {}", listener, id, tuple.foreign);

        let mut tcb = socket.tcb.lock();
        let iss = self.shared.admission.next_iss();
        let context = if config.compression { context } else { None };
        let signals = tcb.accept_syn(repr, iss, context, self.shared.clock.now());
        if let Compression::Context(context) = &mut tcb.compression {
            context.recv = observed(repr, &context.recv);
        }
        let release = self.apply(id, &socket, &mut tcb, State::Closed, signals, &[]);
        drop(tcb);
        if release {
            self.shared.table.release(id);
        }
    }

    /// Run a segment through the state machine of a locked connection.
    fn segment(
        &self,
        id: SocketId,
        socket: &Arc<Socket>,
        mut tcb: MutexGuard<Connection>,
        repr: &TcpRepr,
        payload: &[u8],
        level: Option<Level>,
    ) {
        refresh_window(socket, &mut tcb);
        let before = tcb.current;
        let mut signals = tcb.arrives(repr, self.shared.clock.now());
        if signals.level.is_none() {
            signals.level = level;
        }
        let release = self.apply(id, socket, &mut tcb, before, signals, payload);
        drop(tcb);
        if release {
            self.shared.table.release(id);
        }
    }

    fn request(&self, id: SocketId, request: Request) {
        let socket = match self.shared.table.get(id) {
            Some(socket) => socket,
            None => {
                net_debug!("tcp: request for stale socket {}", id);
                return;
            },
        };
        let now = self.shared.clock.now();
        let mut tcb = socket.tcb.lock();
        let before = tcb.current;
        let opens = matches!(request, Request::Listen | Request::Connect(_));
        if opens && before == State::Closed {
            // A new connection starts with a fresh stream.
            socket.buffer.reopen();
        }
        refresh_window(&socket, &mut tcb);
        let signals = match request {
            Request::Listen => tcb.open_passive(),
            Request::Connect(foreign) => {
                if before == State::Closed {
                    socket.tuple.lock().foreign = foreign;
                }
                let context = if self.shared.config.compression {
                    Some(self.fresh_context(foreign.addr, id))
                } else {
                    None
                };
                tcb.open_active(self.shared.admission.next_iss(), context, now)
            },
            Request::Send(data) => tcb.send_data(&data, now),
            Request::Close => tcb.close(now),
        };
        let release = self.apply(id, &socket, &mut tcb, before, signals, &[]);
        drop(tcb);
        if release {
            self.shared.table.release(id);
        }
    }

    fn timer(&self, id: SocketId, event: TimerEvent) {
        let socket = match self.shared.table.get(id) {
            Some(socket) => socket,
            None => return,
        };
        let now = self.shared.clock.now();
        let mut tcb = socket.tcb.lock();
        // The event may have been overtaken by an acknowledgement.
        if timer::poll(&tcb, now, &self.shared.config) != Some(event) {
            return;
        }
        refresh_window(&socket, &mut tcb);
        let before = tcb.current;
        if event == TimerEvent::Retry && before == State::SynSent {
            // The peer may have dropped the SYN for colliding with a context id of its own.
            let foreign = socket.tuple().foreign.addr;
            if let Compression::Context(context) = &mut tcb.compression {
                context.id = self.fresh_context(foreign, id);
            }
        }
        let signals = match event {
            TimerEvent::Retry => tcb.retry(now),
            TimerEvent::GiveUp => tcb.give_up(),
        };
        let release = self.apply(id, &socket, &mut tcb, before, signals, &[]);
        drop(tcb);
        if release {
            self.shared.table.release(id);
        }
    }

    /// Perform the effects of the state machine.
    ///
    /// `before` is the state the connection was in when the event arrived. Returns whether the
    /// socket is to be released, which the caller does once the connection is unlocked.
    fn apply(
        &self,
        id: SocketId,
        socket: &Socket,
        tcb: &mut Connection,
        before: State,
        signals: Signals,
        payload: &[u8],
    ) -> bool {
        if signals.accept_payload {
            socket.buffer.push(payload);
        }

        if let Some(answer) = signals.answer {
            self.transmit(socket, tcb, answer, signals.level);
        }

        if signals.eof {
            socket.buffer.close();
        }

        for notification in signals.notify {
            socket.notify(notification);
        }

        if signals.accepted {
            // Owned by the application from here on, unless the listener is gone.
            match socket.parent().and_then(|parent| self.shared.table.get(parent)) {
                Some(listener) => {
                    tcb.detached = false;
                    listener.notify(Notification::Accepted(id));
                },
                None => { net_warn!("tcp: {} established without its listener", id); },
            }
        }

        if tcb.current == State::TimeWait && self.shared.config.time_wait.as_millis() == 0 {
            tcb.current = State::Closed;
        }

        if tcb.current != State::Closed {
            return false;
        }
        // A refused request leaves a closed socket as it was.
        if before != State::Closed {
            socket.buffer.close();
        }
        tcb.detached
    }

    /// A context id that no other connection with the peer uses.
    ///
    /// Both ends draw ids from their own counters, so an id the peer picked for a connection in
    /// the other direction may come up here as well.
    fn fresh_context(&self, foreign: Address, except: SocketId) -> u16 {
        let admission = &self.shared.admission;
        loop {
            let context_id = admission.next_context();
            if !self.shared.table.context_in_use(foreign, context_id, except) {
                return context_id;
            }
            net_trace!("tcp: context {} already in use with {}", context_id, foreign);
        }
    }

    /// Send a segment of a connection in the form its compression state asks for.
    fn transmit(&self, socket: &Socket, tcb: &mut Connection, mut repr: TcpRepr, level: Option<Level>) {
        let tuple = socket.tuple();
        repr.src_port = tuple.local.port;
        repr.dst_port = tuple.foreign.port;
        let payload = &tcb.in_flight[..usize::from(repr.payload_len)];
        let segment = repr.to_bytes(payload, Checksum::Manual {
            src_addr: tuple.local.addr,
            dst_addr: tuple.foreign.addr,
        });

        let bytes = match &mut tcb.compression {
            Compression::NoCompression => segment,
            Compression::Context(context) => match compress(context, &repr, &segment, payload, level) {
                Ok(bytes) => bytes,
                Err(err) => {
                    net_warn!("tcp: cannot compress {}: {}", repr.flags, err);
                    return;
                },
            },
        };

        net_trace!("tcp: {} -> {} {} seq={} len={}",
            tuple.local, tuple.foreign, repr.flags, repr.seq_number, repr.payload_len);
        if let Err(err) = self.shared.ip.send(tuple.foreign.addr, Protocol::Tcp, &bytes) {
            net_debug!("tcp: send to {} failed: {}", tuple.foreign.addr, err);
        }
    }
}

fn parse_segment<'a>(ip_repr: &Ipv6Repr, segment: &'a [u8]) -> wire::Result<(TcpRepr, &'a [u8])> {
    let packet = tcp::tcp::new_checked(segment)?;
    let repr = TcpRepr::parse(packet, Checksum::Manual {
        src_addr: ip_repr.src_addr,
        dst_addr: ip_repr.dst_addr,
    })?;
    Ok((repr, packet.payload_slice()))
}

/// Build the wire form of a segment and record what was sent.
fn compress(
    context: &mut Context,
    repr: &TcpRepr,
    segment: &[u8],
    payload: &[u8],
    level: Option<Level>,
) -> wire::Result<Vec<u8>> {
    let level = if repr.flags.syn() {
        Level::Full
    } else {
        level.unwrap_or(context.level)
    };

    let bytes = match level {
        Level::Full => hc::Full { context_id: context.id, segment }.to_bytes(),
        Level::Compressed | Level::MostlyCompressed => {
            let checksum = tcp::tcp::new_unchecked(segment).checksum();
            let header = hc::Compressed::new(
                level == Level::MostlyCompressed,
                context.id,
                repr.flags,
                repr.seq_number,
                repr.ack_number,
                repr.window_len,
                checksum,
                &context.send)?;
            header.to_bytes(&context.send, payload)
        },
    };

    context.send = observed(repr, &context.send);
    Ok(bytes)
}

/// The context values after a header went over the wire.
///
/// Without the ACK flag the acknowledgement field carries nothing and the context keeps its
/// value, on both ends.
fn observed(repr: &TcpRepr, last: &Fields) -> Fields {
    Fields {
        seq: repr.seq_number,
        ack: repr.ack_number.unwrap_or(last.ack),
        window: repr.window_len,
    }
}

fn seed_context(compression: &mut Compression, id: u16) {
    match compression {
        Compression::Context(context) => context.id = id,
        Compression::NoCompression => *compression = Compression::Context(Context {
            id,
            recv: Fields::default(),
            send: Fields::default(),
            level: Level::Full,
        }),
    }
}

/// Advertise the free space of the receive buffer.
fn refresh_window(socket: &Socket, tcb: &mut Connection) {
    tcb.recv.window = socket.buffer.free().min(usize::from(u16::MAX)) as u16;
}

