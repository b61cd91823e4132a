//! The socket table.
//!
//! Sockets live in a fixed number of slots. A [`SocketId`] names a slot together with the
//! generation it was handed out in, so that an id never refers to a later occupant of the same
//! slot. The table is shared by the application threads, the TCP dispatcher, the retransmission
//! timer and the UDP dispatcher.
//!
//! Locks are always taken in the order table, then connection. Lookups return a cloned handle
//! and release the table before anything else is locked by a thread other than the dispatcher.
//!
//! [`SocketId`]: struct.SocketId.html
use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::wire::ip::{Address, Endpoint};
use super::tcp::{Compression, Connection, State};
use super::{Error, Result};

/// The handle of an allocated socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SocketId {
    index: usize,
    generation: u32,
}

/// The transport of a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A TCP socket.
    Stream,
    /// A UDP socket.
    Datagram,
}

/// Local and foreign endpoint of a socket.
///
/// Unspecified addresses and zero ports are wildcards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FourTuple {
    /// Our side.
    pub local: Endpoint,
    /// The peer.
    pub foreign: Endpoint,
}

/// Events delivered to the application thread owning a socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// The socket is listening.
    Ready,
    /// The active open completed.
    Connected,
    /// A queued connection of a listener completed its handshake.
    Accepted(SocketId),
    /// All data sent so far was acknowledged.
    Acked,
    /// The peer did not answer within the retransmission budget.
    TimedOut,
    /// The peer reset the connection.
    Reset,
    /// Our side of the connection is closed.
    Closed,
    /// The request was refused.
    Rejected(Error),
    /// A UDP datagram and its sender.
    Datagram(Endpoint, Vec<u8>),
}

/// A socket's fixed capacity receive buffer.
///
/// The dispatcher appends, the application drains. The lock is held only for the copy.
pub struct RecvBuffer {
    state: Mutex<BufferState>,
    readable: Condvar,
}

struct BufferState {
    data: VecDeque<u8>,
    capacity: usize,
    eof: bool,
}

/// A socket.
pub struct Socket {
    kind: Kind,
    parent: Option<SocketId>,
    /// The endpoints, written by bind and on connection setup.
    pub(crate) tuple: Mutex<FourTuple>,
    /// The control block, only ever written by the dispatcher thread.
    pub(crate) tcb: Mutex<Connection>,
    /// Incoming stream data.
    pub(crate) buffer: RecvBuffer,
    events: Mutex<Sender<Notification>>,
    inbox: Mutex<Receiver<Notification>>,
}

/// All sockets of a stack.
pub struct SocketTable {
    slots: RwLock<Vec<Slot>>,
}

struct Slot {
    generation: u32,
    socket: Option<Arc<Socket>>,
}

impl SocketId {
    /// The slot index.
    pub fn index(self) -> usize {
        self.index
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

impl RecvBuffer {
    /// An empty buffer.
    pub fn new(capacity: usize) -> Self {
        RecvBuffer {
            state: Mutex::new(BufferState {
                data: VecDeque::with_capacity(capacity),
                capacity,
                eof: false,
            }),
            readable: Condvar::new(),
        }
    }

    /// Free space in bytes.
    pub fn free(&self) -> usize {
        let state = self.state.lock();
        state.capacity - state.data.len()
    }

    /// Bytes waiting to be read.
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Whether no bytes are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append as much of `data` as fits, returning the number of bytes taken.
    pub fn push(&self, data: &[u8]) -> usize {
        let mut state = self.state.lock();
        let count = data.len().min(state.capacity - state.data.len());
        state.data.extend(&data[..count]);
        drop(state);
        if count > 0 {
            self.readable.notify_all();
        }
        count
    }

    /// Mark the end of the stream, waking blocked readers.
    pub fn close(&self) {
        self.state.lock().eof = true;
        self.readable.notify_all();
    }

    /// Start a new stream, discarding whatever is left of the previous one.
    pub fn reopen(&self) {
        let mut state = self.state.lock();
        state.data.clear();
        state.eof = false;
    }

    /// Whether the end of the stream was marked.
    pub fn is_closed(&self) -> bool {
        self.state.lock().eof
    }

    /// Read into `buf`, blocking while the buffer is empty and open.
    ///
    /// Returns `0` only once the stream has ended and all data was read.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut state = self.state.lock();
        while state.data.is_empty() && !state.eof && !buf.is_empty() {
            self.readable.wait(&mut state);
        }
        let count = buf.len().min(state.data.len());
        for (dst, src) in buf.iter_mut().zip(state.data.drain(..count)) {
            *dst = src;
        }
        count
    }
}

impl Socket {
    fn new(kind: Kind, parent: Option<SocketId>, tcb: Connection, capacity: usize) -> Self {
        let (events, inbox) = mpsc::channel();
        Socket {
            kind,
            parent,
            tuple: Mutex::new(FourTuple::default()),
            tcb: Mutex::new(tcb),
            buffer: RecvBuffer::new(capacity),
            events: Mutex::new(events),
            inbox: Mutex::new(inbox),
        }
    }

    /// The transport of this socket.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The listener a queued connection was spawned from.
    pub fn parent(&self) -> Option<SocketId> {
        self.parent
    }

    /// The current endpoints.
    pub fn tuple(&self) -> FourTuple {
        *self.tuple.lock()
    }

    /// The current connection state.
    pub fn state(&self) -> State {
        self.tcb.lock().current
    }

    /// Deliver a notification to the owning application thread.
    pub fn notify(&self, notification: Notification) {
        // The receiving half lives as long as the socket.
        let _ = self.events.lock().send(notification);
    }

    /// Block until the next notification.
    pub fn wait(&self) -> Notification {
        let inbox = self.inbox.lock();
        // The sending half lives as long as the socket.
        match inbox.recv() {
            Ok(notification) => notification,
            Err(_) => Notification::Closed,
        }
    }

    /// The next notification, if one is pending.
    pub fn try_notification(&self) -> Option<Notification> {
        self.inbox.lock().try_recv().ok()
    }

    /// Discard pending notifications.
    pub fn drain(&self) {
        let inbox = self.inbox.lock();
        while let Ok(stale) = inbox.try_recv() {
            net_trace!("socket: discarding stale {:?}", stale);
        }
    }
}

impl SocketTable {
    /// A table with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot { generation: 0, socket: None })
            .collect();
        SocketTable { slots: RwLock::new(slots) }
    }

    /// Occupy a free slot.
    ///
    /// Fails with `Exhausted` if every slot is in use.
    pub fn allocate(&self, kind: Kind, parent: Option<SocketId>, tcb: Connection, buffer: usize)
        -> Result<(SocketId, Arc<Socket>)>
    {
        let mut slots = self.slots.write();
        let (index, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.socket.is_none())
            .ok_or_else(|| {
                net_warn!("socket: table exhausted");
                Error::Exhausted
            })?;
        let socket = Arc::new(Socket::new(kind, parent, tcb, buffer));
        slot.socket = Some(socket.clone());
        let id = SocketId { index, generation: slot.generation };
        net_trace!("socket: allocated {} ({:?})", id, kind);
        Ok((id, socket))
    }

    /// The socket behind an id, if it is still allocated.
    pub fn get(&self, id: SocketId) -> Option<Arc<Socket>> {
        let slots = self.slots.read();
        let slot = slots.get(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.socket.clone()
    }

    /// Return a slot to the pool.
    ///
    /// Ends the receive stream so that blocked readers return. Ids of the slot become stale.
    pub fn release(&self, id: SocketId) {
        let mut slots = self.slots.write();
        let slot = match slots.get_mut(id.index) {
            Some(slot) if slot.generation == id.generation => slot,
            _ => return,
        };
        if let Some(socket) = slot.socket.take() {
            socket.buffer.close();
            slot.generation = slot.generation.wrapping_add(1);
            net_trace!("socket: released {}", id);
        }
    }

    /// All allocated sockets.
    pub fn sockets(&self) -> Vec<(SocketId, Arc<Socket>)> {
        let slots = self.slots.read();
        slots.iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let socket = slot.socket.clone()?;
                Some((SocketId { index, generation: slot.generation }, socket))
            })
            .collect()
    }

    fn find<F>(&self, predicate: F) -> Option<(SocketId, Arc<Socket>)>
        where F: Fn(&Socket) -> bool
    {
        let slots = self.slots.read();
        slots.iter()
            .enumerate()
            .find_map(|(index, slot)| {
                let socket = slot.socket.as_ref()?;
                if predicate(socket) {
                    Some((SocketId { index, generation: slot.generation }, socket.clone()))
                } else {
                    None
                }
            })
    }

    /// The connection with exactly these endpoints.
    pub fn lookup_by_tuple(&self, local: Endpoint, foreign: Endpoint)
        -> Option<(SocketId, Arc<Socket>)>
    {
        self.find(|socket| {
            if socket.kind != Kind::Stream {
                return false;
            }
            let tuple = socket.tuple();
            tuple.local.port == local.port
                && tuple.local.addr.accepts(local.addr)
                && tuple.foreign == foreign
                && !matches!(socket.state(), State::Closed | State::Listen)
        })
    }

    /// A listener for the local endpoint whose peer is still a wildcard.
    pub fn lookup_by_listen(&self, local: Endpoint) -> Option<(SocketId, Arc<Socket>)> {
        self.find(|socket| {
            if socket.kind != Kind::Stream {
                return false;
            }
            let tuple = socket.tuple();
            tuple.local.port == local.port
                && tuple.local.addr.accepts(local.addr)
                && tuple.foreign.is_wildcard()
                && matches!(socket.state(), State::Listen | State::SynReceived)
        })
    }

    /// The connection between two hosts that uses a compression context id.
    pub fn lookup_by_context(&self, foreign: Address, local: Address, context_id: u16)
        -> Option<(SocketId, Arc<Socket>)>
    {
        self.find(|socket| {
            if socket.kind != Kind::Stream {
                return false;
            }
            let tuple = socket.tuple();
            if tuple.foreign.addr != foreign || !tuple.local.addr.accepts(local) {
                return false;
            }
            let tcb = socket.tcb.lock();
            match &tcb.compression {
                Compression::Context(context) => context.id == context_id
                    && !matches!(tcb.current, State::Closed | State::Listen),
                Compression::NoCompression => false,
            }
        })
    }

    /// Whether a connection with the peer other than `except` holds the context id.
    pub fn context_in_use(&self, foreign: Address, context_id: u16, except: SocketId) -> bool {
        let slots = self.slots.read();
        slots.iter()
            .enumerate()
            .filter(|(index, slot)| {
                *index != except.index || slot.generation != except.generation
            })
            .filter_map(|(_, slot)| slot.socket.as_ref())
            .filter(|socket| socket.kind == Kind::Stream && socket.tuple().foreign.addr == foreign)
            .any(|socket| {
                let tcb = socket.tcb.lock();
                match &tcb.compression {
                    Compression::Context(context) => context.id == context_id
                        && !matches!(tcb.current, State::Closed | State::Listen),
                    Compression::NoCompression => false,
                }
            })
    }

    /// The datagram socket bound to a local port.
    pub fn lookup_by_port(&self, local: Endpoint) -> Option<(SocketId, Arc<Socket>)> {
        self.find(|socket| {
            let tuple = socket.tuple();
            socket.kind == Kind::Datagram
                && tuple.local.port == local.port
                && tuple.local.addr.accepts(local.addr)
        })
    }

    /// Whether a socket of `kind` other than `except` is bound to the port.
    pub fn is_bound(&self, kind: Kind, local: Endpoint, except: SocketId) -> bool {
        let slots = self.slots.read();
        slots.iter()
            .enumerate()
            .filter(|(index, slot)| {
                *index != except.index || slot.generation != except.generation
            })
            .filter_map(|(_, slot)| slot.socket.as_ref())
            .any(|socket| {
                let tuple = socket.tuple();
                socket.kind == kind
                    && socket.parent.is_none()
                    && tuple.local.port == local.port
                    && (tuple.local.addr.accepts(local.addr) || local.addr.accepts(tuple.local.addr))
            })
    }

    /// The lowest unused port at or above `from`.
    pub fn unused_port(&self, kind: Kind, from: u16) -> Option<u16> {
        let slots = self.slots.read();
        (from..=u16::MAX).find(|&port| {
            !slots.iter()
                .filter_map(|slot| slot.socket.as_ref())
                .any(|socket| socket.kind == kind && socket.tuple().local.port == port)
        })
    }
}
