//! The per-connection state machine.
use crate::config::Config;
use crate::time::Instant;
use crate::wire::{TcpFlags, TcpRepr, TcpSeqNumber};
use crate::wire::hc::{Fields, Level};

use super::super::Error;
use super::super::socket::Notification;
use super::timer::RttEstimator;

/// The state of a connection.
///
/// Includes current state machine state, the values negotiated during the handshake, the timing
/// of the last transmission and the compression context. The control block is only ever changed
/// by the dispatcher.
#[derive(Clone, Debug)]
pub struct Connection {
    /// The current state of the state machine.
    pub current: State,

    /// The sending state.
    ///
    /// In RFC793 this is referred to as `SND`.
    pub send: Send,

    /// The receiving state.
    ///
    /// In RFC793 this is referred to as `RCV`.
    pub recv: Receive,

    /// The largest payload of a single segment in either direction.
    ///
    /// Starts as the local maximum and is lowered to the peer's option during the handshake.
    pub mss: u16,

    /// Retransmission bookkeeping.
    pub timing: Timing,

    /// Header compression state, if compression is in use.
    pub compression: Compression,

    /// The payload of the segment awaiting acknowledgement.
    ///
    /// Transmission is stop-and-wait so there is at most one such segment. Its first byte has
    /// the sequence number `send.unacked`.
    pub in_flight: Vec<u8>,

    /// Whether no application holds a handle to this connection.
    ///
    /// A detached connection is released as soon as it reaches `Closed`. Queued connections of a
    /// listener are detached until accepted, application sockets become detached on close.
    pub detached: bool,
}

/// Sequence space of the sending direction.
#[derive(Clone, Copy, Debug, Hash)]
pub struct Send {
    /// The next not yet acknowledged sequence number.
    ///
    /// In RFC793 this is referred to as `SND.UNA`.
    pub unacked: TcpSeqNumber,

    /// The next sequence number to use for transmission.
    ///
    /// In RFC793 this is referred to as `SND.NXT`.
    pub next: TcpSeqNumber,

    /// The send window size indicated by the receiver.
    ///
    /// In RFC793 this is referred to as `SND.WND`.
    pub window: u16,

    /// The initial sequence number.
    ///
    /// In RFC793 this is referred to as `ISS`.
    pub initial_seq: TcpSeqNumber,
}

/// Sequence space of the receiving direction.
#[derive(Clone, Copy, Debug, Hash)]
pub struct Receive {
    /// The next expected sequence number.
    ///
    /// In RFC793 this is referred to as `RCV.NXT`.
    pub next: TcpSeqNumber,

    /// The receive window size indicated by us.
    ///
    /// Always the free space of the receive buffer. In RFC793 this is referred to as `RCV.WND`.
    pub window: u16,

    /// The initial receive sequence number.
    ///
    /// In RFC793 this is referred to as `IRS`.
    pub initial_seq: TcpSeqNumber,
}

/// Retransmission timing.
#[derive(Clone, Copy, Debug)]
pub struct Timing {
    /// When the segment awaiting acknowledgement was last sent.
    ///
    /// In TIME_WAIT and FIN_WAIT_2 this is the start of the quiet time.
    pub last_packet_time: Instant,

    /// Retransmissions since the last acknowledgement that advanced `send.unacked`.
    pub retries: u32,

    /// The round trip estimator.
    pub rtt: RttEstimator,
}

/// Header compression state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Segments are sent as ordinary TCP.
    NoCompression,
    /// Segments are sent in one of the header compression forms.
    Context(Context),
}

/// The context shared with the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Context {
    /// The connection's context id, chosen by the active opener.
    pub id: u16,
    /// The last header values received.
    pub recv: Fields,
    /// The last header values sent.
    pub send: Fields,
    /// The form of the next segment.
    pub level: Level,
}

/// State enum of the statemachine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// No connection. Both the initial and the terminal state.
    Closed,

    /// A listening connection.
    ///
    /// Akin to an open server socket. Every SYN spawns a new queued connection while the
    /// listener itself remains here.
    Listen,

    /// An open connection request.
    SynSent,

    /// Connection request we intend to answer, waiting on ack.
    SynReceived,

    /// An open connection.
    Established,

    /// Closed our side of the connection.
    FinWait1,

    /// Closing connection nicely, initiated by us and acknowledged.
    FinWait2,

    /// Closed both sides but we don't know the other knows.
    Closing,

    /// Both sides recognized connection as closed.
    TimeWait,

    /// Other side closed its connection.
    CloseWait,

    /// Connection closed after other side closed its already.
    LastAck,
}

/// Outcome of the consistency check of an incoming segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// The segment may be processed.
    PacketOk,
    /// Acknowledges data we never sent.
    AckTooBig,
    /// Acknowledges nothing new.
    AckTooSmall,
    /// A duplicate of something already received.
    SeqTooSmall,
}

/// Output signals of the model.
///
/// The dispatcher performs the side effects on the socket and the network.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signals {
    /// Need to send some tcp answer.
    ///
    /// Ports are left zero, they are taken from the socket. An answer with payload carries the
    /// bytes in `Connection::in_flight`.
    pub answer: Option<TcpRepr>,

    /// Send the answer in this form instead of the context's current level.
    pub level: Option<Level>,

    /// The payload of the arrived segment goes into the receive buffer.
    pub accept_payload: bool,

    /// No more data will arrive.
    pub eof: bool,

    /// Events for the owning application thread, in order.
    pub notify: Vec<Notification>,

    /// A queued connection completed its handshake, tell the listener.
    pub accepted: bool,

    /// A listener received a SYN, a queued connection is to be spawned for it.
    pub spawn: bool,
}

impl Connection {
    /// A closed connection with the local defaults.
    pub fn new(config: &Config) -> Self {
        Connection {
            current: State::Closed,
            send: Send {
                unacked: TcpSeqNumber::default(),
                next: TcpSeqNumber::default(),
                window: 0,
                initial_seq: TcpSeqNumber::default(),
            },
            recv: Receive {
                next: TcpSeqNumber::default(),
                window: config.max_window(),
                initial_seq: TcpSeqNumber::default(),
            },
            mss: config.mss,
            timing: Timing {
                last_packet_time: Instant::from_millis(0),
                retries: 0,
                rtt: RttEstimator::new(config),
            },
            compression: Compression::NoCompression,
            in_flight: Vec::new(),
            detached: false,
        }
    }

    /// Wait for connections.
    pub fn open_passive(&mut self) -> Signals {
        if self.current != State::Closed {
            return Signals::rejected(Error::Illegal);
        }
        self.current = State::Listen;
        Signals::notify(Notification::Ready)
    }

    /// Start a connection by sending a SYN.
    ///
    /// With a context id, segments of the connection are compressed.
    pub fn open_active(&mut self, iss: TcpSeqNumber, context: Option<u16>, time: Instant)
        -> Signals
    {
        if self.current != State::Closed {
            return Signals::rejected(Error::Illegal);
        }
        self.send = Send {
            unacked: iss,
            next: iss + 1,
            window: 0,
            initial_seq: iss,
        };
        self.compression = Compression::with_context(context);
        self.in_flight.clear();
        self.restart_timer(time);
        self.current = State::SynSent;

        Signals {
            answer: Some(self.syn_segment()),
            .. Signals::default()
        }
    }

    /// Initialize a queued connection from the SYN its listener received.
    pub fn accept_syn(
        &mut self,
        segment: &TcpRepr,
        iss: TcpSeqNumber,
        context: Option<u16>,
        time: Instant,
    ) -> Signals {
        if self.current != State::Closed || !segment.flags.syn() {
            return Signals::default();
        }
        self.recv.initial_seq = segment.seq_number;
        self.recv.next = segment.seq_number + 1;
        self.send = Send {
            unacked: iss,
            next: iss + 1,
            window: segment.window_len,
            initial_seq: iss,
        };
        self.negotiate_mss(segment);
        self.compression = Compression::with_context(context);
        self.detached = true;
        self.restart_timer(time);
        self.current = State::SynReceived;

        Signals {
            answer: Some(self.syn_segment()),
            .. Signals::default()
        }
    }

    /// Send one segment of application data.
    ///
    /// The data must fit into a single segment. It stays in `in_flight` until acknowledged.
    pub fn send_data(&mut self, data: &[u8], time: Instant) -> Signals {
        if self.current != State::Established || !self.in_flight.is_empty() {
            return Signals::rejected(Error::Illegal);
        }
        if data.is_empty() || data.len() > usize::from(self.mss) {
            return Signals::rejected(Error::BadSize);
        }
        self.in_flight.extend_from_slice(data);
        let answer = self.data_segment();
        self.send.next += data.len();
        self.restart_timer(time);

        Signals {
            answer: Some(answer),
            .. Signals::default()
        }
    }

    /// The largest chunk `send_data` should be called with.
    ///
    /// Never zero, a closed peer window is probed with single bytes until it reopens.
    pub fn send_capacity(&self) -> usize {
        usize::from(self.mss.min(self.send.window)).max(1)
    }

    /// Close our side of the connection.
    pub fn close(&mut self, time: Instant) -> Signals {
        self.detached = true;
        match self.current {
            State::Closed | State::Listen | State::SynSent | State::SynReceived => {
                self.current = State::Closed;
                self.in_flight.clear();
                let mut signals = Signals::notify(Notification::Closed);
                signals.eof = true;
                signals
            },
            State::Established | State::CloseWait => {
                self.current = match self.current {
                    State::Established => State::FinWait1,
                    _ => State::LastAck,
                };
                if self.in_flight.is_empty() {
                    self.restart_timer(time);
                }
                let answer = self.segment(TcpFlags::FIN | TcpFlags::ACK, self.send.next);
                self.send.next += 1;
                Signals {
                    answer: Some(answer),
                    .. Signals::default()
                }
            },
            State::FinWait2 | State::TimeWait => Signals::notify(Notification::Closed),
            // Our FIN is out already, the notification follows its acknowledgement.
            State::FinWait1 | State::Closing | State::LastAck => Signals::default(),
        }
    }

    /// Handle an incoming segment.
    pub fn arrives(&mut self, segment: &TcpRepr, time: Instant) -> Signals {
        match self.current {
            State::Closed => Signals::default(),
            State::Listen => self.arrives_listen(segment),
            State::SynSent => self.arrives_syn_sent(segment, time),
            State::SynReceived => self.arrives_syn_received(segment, time),
            _ => self.arrives_synchronized(segment, time),
        }
    }

    /// Resend the segment awaiting acknowledgement.
    pub fn retry(&mut self, time: Instant) -> Signals {
        let answer = match self.retransmission() {
            Some(answer) => answer,
            None => return Signals::default(),
        };
        self.timing.retries += 1;
        self.timing.last_packet_time = time;
        net_debug!("tcp: retry {} in {:?}", self.timing.retries, self.current);

        Signals {
            answer: Some(answer),
            level: self.resync_level(),
            .. Signals::default()
        }
    }

    /// Abandon the connection after its timeout expired.
    pub fn give_up(&mut self) -> Signals {
        let quiet = match self.current {
            State::Closed | State::Listen => return Signals::default(),
            State::SynReceived | State::FinWait2 | State::TimeWait => true,
            _ => false,
        };
        net_debug!("tcp: giving up in {:?}", self.current);
        self.current = State::Closed;
        self.in_flight.clear();

        let mut signals = Signals::default();
        signals.eof = true;
        if !quiet {
            signals.notify.push(Notification::TimedOut);
        }
        signals
    }

    /// Classify an incoming segment against the current sequence space.
    ///
    /// The acknowledgement must cover something in `(send.unacked, send.next]`. A segment that
    /// occupies sequence space but acknowledges nothing new is still fine. Occupied sequence
    /// space must not start below `recv.next`.
    pub fn check(&self, segment: &TcpRepr) -> Verdict {
        if let Some(ack) = segment.ack_number {
            if ack > self.send.next {
                return Verdict::AckTooBig;
            }
            if ack < self.send.unacked {
                return Verdict::AckTooSmall;
            }
            if ack == self.send.unacked && segment.sequence_len() == 0 {
                return Verdict::AckTooSmall;
            }
        }

        if segment.sequence_len() > 0 && segment.seq_number < self.recv.next {
            return Verdict::SeqTooSmall;
        }

        Verdict::PacketOk
    }

    fn arrives_listen(&mut self, segment: &TcpRepr) -> Signals {
        if segment.flags.rst() {
            return Signals::default();
        }

        if segment.ack_number.is_some() {
            // What are you acking? A previous connection.
            net_debug!("tcp: listener ignores ack {}", segment.flags);
            return Signals::default();
        }

        if !segment.flags.syn() {
            return Signals::default();
        }

        Signals {
            spawn: true,
            .. Signals::default()
        }
    }

    fn arrives_syn_sent(&mut self, segment: &TcpRepr, time: Instant) -> Signals {
        if segment.flags.rst() {
            if segment.ack_number == Some(self.send.next) {
                return self.reset();
            }
            return Signals::default();
        }

        // Simultaneous open is not supported, only a SYN-ACK is of interest.
        let ack = match segment.ack_number {
            Some(ack) if segment.flags.syn() => ack,
            _ => return Signals::default(),
        };
        if ack != self.send.next {
            net_debug!("tcp: SYN-ACK acknowledges {} instead of {}", ack, self.send.next);
            return Signals::default();
        }

        self.recv.initial_seq = segment.seq_number;
        self.recv.next = segment.seq_number + 1;
        self.send.unacked = ack;
        self.send.window = segment.window_len;
        self.negotiate_mss(segment);
        self.acknowledge_timing(time);
        self.current = State::Established;
        // The final handshake segment still goes out in full form.
        self.compression.set_level(Level::Compressed);

        Signals {
            answer: Some(self.ack_segment()),
            level: Some(Level::Full),
            notify: vec![Notification::Connected],
            .. Signals::default()
        }
    }

    fn arrives_syn_received(&mut self, segment: &TcpRepr, time: Instant) -> Signals {
        if segment.flags.rst() {
            self.current = State::Closed;
            let mut signals = Signals::default();
            signals.eof = true;
            return signals;
        }

        if segment.flags.syn() {
            if segment.ack_number.is_none() && segment.seq_number == self.recv.initial_seq {
                // The SYN-ACK was lost.
                return Signals {
                    answer: Some(self.syn_segment()),
                    .. Signals::default()
                };
            }
            return Signals::default();
        }

        let ack = match segment.ack_number {
            Some(ack) => ack,
            None => return Signals::default(),
        };
        if self.check(segment) != Verdict::PacketOk || ack != self.send.next {
            return Signals::default();
        }

        self.send.unacked = ack;
        self.send.window = segment.window_len;
        self.acknowledge_timing(time);
        self.current = State::Established;
        self.compression.set_level(Level::Compressed);

        let mut signals = if segment.sequence_len() > 0 {
            self.arrives_synchronized(segment, time)
        } else {
            Signals::default()
        };
        signals.accepted = true;
        signals
    }

    fn arrives_synchronized(&mut self, segment: &TcpRepr, time: Instant) -> Signals {
        if segment.flags.rst() {
            if segment.seq_number >= self.recv.next {
                return self.reset();
            }
            return Signals::default();
        }

        if segment.flags.syn() {
            if self.current == State::Established && segment.seq_number == self.recv.initial_seq {
                // Our handshake ACK was lost, repeat it exactly.
                return Signals {
                    answer: Some(self.ack_segment()),
                    level: Some(Level::Full),
                    .. Signals::default()
                };
            }
            return Signals::default();
        }

        match self.check(segment) {
            Verdict::PacketOk => (),
            Verdict::AckTooSmall => {
                net_trace!("tcp: dropping stale ack");
                return Signals::default();
            },
            verdict => {
                net_debug!("tcp: {:?}, re-sending ack {}", verdict, self.recv.next);
                return Signals {
                    answer: Some(self.ack_segment()),
                    level: self.resync_level(),
                    .. Signals::default()
                };
            },
        }

        let mut signals = Signals::default();
        if let Some(ack) = segment.ack_number {
            self.send.window = segment.window_len;
            self.acknowledged(ack, time, &mut signals);
        }

        let payload_len = usize::from(segment.payload_len);
        if payload_len > 0 {
            if !self.may_receive() {
                return signals;
            }
            if segment.seq_number != self.recv.next || payload_len > usize::from(self.recv.window) {
                net_debug!("tcp: no room for {} bytes at {}", payload_len, segment.seq_number);
                signals.answer = Some(self.ack_segment());
                return signals;
            }
            self.recv.next += payload_len;
            self.recv.window -= segment.payload_len;
            signals.accept_payload = true;
            signals.answer = Some(self.ack_segment());
        }

        if segment.flags.fin() {
            if segment.seq_number + payload_len != self.recv.next {
                signals.answer = Some(self.ack_segment());
                return signals;
            }
            self.recv.next += 1;
            signals.eof = true;
            match self.current {
                State::Established => {
                    // Close our side right away.
                    if self.in_flight.is_empty() {
                        self.restart_timer(time);
                    }
                    signals.answer = Some(self.segment(TcpFlags::FIN | TcpFlags::ACK, self.send.next));
                    self.send.next += 1;
                    self.current = State::LastAck;
                },
                State::FinWait1 => {
                    signals.answer = Some(self.segment(TcpFlags::FIN | TcpFlags::ACK, self.send.next - 1));
                    self.current = State::Closing;
                },
                State::FinWait2 => {
                    signals.answer = Some(self.ack_segment());
                    self.timing.last_packet_time = time;
                    self.current = State::TimeWait;
                },
                _ => (),
            }
        }

        signals
    }

    /// Process an acknowledgement that passed the check.
    fn acknowledged(&mut self, ack: TcpSeqNumber, time: Instant, signals: &mut Signals) {
        if ack > self.send.unacked {
            let acked_data = (ack - self.send.unacked).min(self.in_flight.len());
            self.in_flight.drain(..acked_data);
            self.send.unacked = ack;
            self.acknowledge_timing(time);
            if acked_data > 0 && self.in_flight.is_empty() {
                signals.notify.push(Notification::Acked);
            }
        }

        if self.send.unacked != self.send.next {
            return;
        }

        // Everything including our FIN is acknowledged.
        match self.current {
            State::FinWait1 => {
                signals.notify.push(Notification::Closed);
                self.current = State::FinWait2;
                self.timing.last_packet_time = time;
            },
            State::Closing => {
                signals.notify.push(Notification::Closed);
                self.current = State::TimeWait;
                self.timing.last_packet_time = time;
            },
            State::LastAck => {
                signals.notify.push(Notification::Closed);
                self.current = State::Closed;
            },
            _ => (),
        }
    }

    fn reset(&mut self) -> Signals {
        net_debug!("tcp: reset in {:?}", self.current);
        self.current = State::Closed;
        self.in_flight.clear();
        let mut signals = Signals::notify(Notification::Reset);
        signals.eof = true;
        signals
    }

    fn may_receive(&self) -> bool {
        match self.current {
            State::Established | State::FinWait1 | State::FinWait2 => true,
            _ => false,
        }
    }

    fn negotiate_mss(&mut self, segment: &TcpRepr) {
        if let Some(peer) = segment.max_seg_size {
            self.mss = self.mss.min(peer).max(1);
        }
    }

    fn restart_timer(&mut self, time: Instant) {
        self.timing.last_packet_time = time;
        self.timing.retries = 0;
    }

    /// Take a round trip sample unless the acknowledged segment was retransmitted.
    fn acknowledge_timing(&mut self, time: Instant) {
        if self.timing.retries == 0 {
            let rtt = time - self.timing.last_packet_time;
            self.timing.rtt.sample(rtt);
        }
        self.restart_timer(time);
    }

    /// Mostly compressed form for an answer after the peer missed something.
    fn resync_level(&self) -> Option<Level> {
        match self.compression {
            Compression::Context(Context { level: Level::Compressed, .. }) =>
                Some(Level::MostlyCompressed),
            _ => None,
        }
    }

    fn retransmission(&self) -> Option<TcpRepr> {
        match self.current {
            State::SynSent | State::SynReceived => Some(self.syn_segment()),
            State::Established | State::CloseWait if !self.in_flight.is_empty() =>
                Some(self.data_segment()),
            State::FinWait1 | State::Closing | State::LastAck => Some(if self.in_flight.is_empty() {
                self.segment(TcpFlags::FIN | TcpFlags::ACK, self.send.next - 1)
            } else {
                self.data_segment()
            }),
            _ => None,
        }
    }

    fn segment(&self, flags: TcpFlags, seq_number: TcpSeqNumber) -> TcpRepr {
        TcpRepr {
            src_port: 0,
            dst_port: 0,
            flags,
            seq_number,
            ack_number: Some(self.recv.next),
            window_len: self.recv.window,
            max_seg_size: None,
            payload_len: 0,
        }
    }

    fn ack_segment(&self) -> TcpRepr {
        self.segment(TcpFlags::ACK, self.send.next)
    }

    /// The segment carrying `in_flight`, and our FIN right behind it if that was sent.
    fn data_segment(&self) -> TcpRepr {
        let mut flags = TcpFlags::ACK | TcpFlags::PSH;
        let fin_sent = match self.current {
            State::FinWait1 | State::Closing | State::LastAck => true,
            _ => false,
        };
        flags.set_fin(fin_sent);
        TcpRepr {
            payload_len: self.in_flight.len() as u16,
            .. self.segment(flags, self.send.unacked)
        }
    }

    fn syn_segment(&self) -> TcpRepr {
        let (flags, ack_number) = match self.current {
            State::SynReceived => (TcpFlags::SYN | TcpFlags::ACK, Some(self.recv.next)),
            _ => (TcpFlags::SYN, None),
        };
        TcpRepr {
            ack_number,
            max_seg_size: Some(self.mss),
            .. self.segment(flags, self.send.initial_seq)
        }
    }
}

impl Compression {
    fn with_context(context: Option<u16>) -> Self {
        match context {
            Some(id) => Compression::Context(Context {
                id,
                recv: Fields::default(),
                send: Fields::default(),
                level: Level::Full,
            }),
            None => Compression::NoCompression,
        }
    }

    /// Switch the form of future segments.
    pub fn set_level(&mut self, level: Level) {
        if let Compression::Context(context) = self {
            context.level = level;
        }
    }
}

impl Signals {
    fn notify(notification: Notification) -> Self {
        Signals {
            notify: vec![notification],
            .. Signals::default()
        }
    }

    fn rejected(error: Error) -> Self {
        Signals::notify(Notification::Rejected(error))
    }
}

impl Default for State {
    fn default() -> Self {
        State::Closed
    }
}
