//! Running a stack.
//!
//! A [`Stack`] owns the protocol threads of one host and offers the socket calls to the
//! application. Every call that needs the protocol sends a request to the TCP dispatcher and
//! then blocks on the socket's notifications until the outcome arrives. Calls may come from any
//! number of threads, but each socket should be used by one thread at a time.
//!
//! ```no_run
//! use sixtcp::{Config, Stack};
//! use sixtcp::layer::socket::Kind;
//! use sixtcp::nic::Network;
//! use sixtcp::wire::ip::{Address, Endpoint};
//!
//! let network = Network::new();
//! let host = network.host(Address::LOOPBACK).unwrap();
//! let stack = Stack::new(Config::default(), host).unwrap();
//!
//! let server = stack.socket(Kind::Stream).unwrap();
//! stack.bind(server, Endpoint::new(Address::UNSPECIFIED, 7)).unwrap();
//! stack.listen(server).unwrap();
//! let client = stack.accept(server).unwrap();
//! let mut buf = [0; 64];
//! let len = stack.recv(client, &mut buf).unwrap();
//! stack.send(client, &buf[..len]).unwrap();
//! stack.close(client).unwrap();
//! ```
//!
//! [`Stack`]: struct.Stack.html
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::config::{Config, EPHEMERAL_PORTS};
use crate::layer::{Error, Result};
use crate::layer::ip::{Datagram, Handler, Ipv6};
use crate::layer::socket::{Kind, Notification, Socket, SocketId};
use crate::layer::tcp::{self, Admission, Command, Connection, Dispatcher, Request, Shared, State};
use crate::layer::udp;
use crate::time::{Clock, SystemClock};
use crate::wire::ip::{Endpoint, Protocol};

/// The protocol threads of one host and the socket calls.
pub struct Stack {
    shared: Arc<Shared>,
    tcp: Mutex<Sender<Command>>,
    udp: Mutex<Sender<udp::Command>>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Stack {
    /// Start a stack on top of an IPv6 layer.
    pub fn new(config: Config, ip: Arc<dyn Ipv6>) -> io::Result<Self> {
        Stack::with_clock(config, ip, Arc::new(SystemClock::new()))
    }

    /// Start a stack that reads the time from `clock`.
    pub fn with_clock(config: Config, ip: Arc<dyn Ipv6>, clock: Arc<dyn Clock>)
        -> io::Result<Self>
    {
        let shared = Arc::new(Shared::new(config, ip, clock, Admission::new()));
        let running = Arc::new(AtomicBool::new(true));
        let (tcp_send, tcp_recv) = mpsc::channel();
        let (udp_send, udp_recv) = mpsc::channel();

        let mut threads = Vec::with_capacity(3);
        let dispatcher = Dispatcher::new(shared.clone());
        threads.push(thread::Builder::new()
            .name("sixtcp-tcp".into())
            .spawn(move || dispatcher.run(tcp_recv))?);

        let timer = {
            let (shared, commands, running) = (shared.clone(), tcp_send.clone(), running.clone());
            thread::Builder::new()
                .name("sixtcp-timer".into())
                .spawn(move || tcp::timer::run(shared, commands, running))?
        };
        threads.push(timer);

        let dispatcher = udp::Dispatcher::new(shared.clone());
        threads.push(thread::Builder::new()
            .name("sixtcp-udp".into())
            .spawn(move || dispatcher.run(udp_recv))?);

        let inbound = Mutex::new(tcp_send.clone());
        shared.ip.register(Protocol::Tcp, Arc::new(move |datagram| {
            let _ = inbound.lock().send(Command::Inbound(datagram));
        }));
        let inbound = Mutex::new(udp_send.clone());
        shared.ip.register(Protocol::Udp, Arc::new(move |datagram| {
            let _ = inbound.lock().send(udp::Command::Inbound(datagram));
        }));

        net_debug!("stack: running on {}", shared.ip.local_addr());
        Ok(Stack {
            shared,
            tcp: Mutex::new(tcp_send),
            udp: Mutex::new(udp_send),
            running,
            threads,
        })
    }

    /// The configuration the stack runs with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Allocate a socket.
    pub fn socket(&self, kind: Kind) -> Result<SocketId> {
        let config = &self.shared.config;
        let buffer = match kind {
            Kind::Stream => config.recv_buffer,
            // Datagrams are queued as notifications.
            Kind::Datagram => 0,
        };
        let (id, _) = self.shared.table.allocate(kind, None, Connection::new(config), buffer)?;
        Ok(id)
    }

    /// Assign the local endpoint.
    ///
    /// Port 0 picks an unused ephemeral port.
    pub fn bind(&self, id: SocketId, local: Endpoint) -> Result<Endpoint> {
        let socket = self.get(id)?;
        if socket.state() != State::Closed || !socket.tuple().local.is_wildcard() {
            return Err(Error::Illegal);
        }
        if !local.addr.is_unspecified() && local.addr != self.shared.ip.local_addr() {
            return Err(Error::Unreachable);
        }

        let mut local = local;
        if local.port == 0 {
            local.port = self.ephemeral(socket.kind())?;
        } else if self.shared.table.is_bound(socket.kind(), local, id) {
            return Err(Error::AddrInUse);
        }
        socket.tuple.lock().local = local;
        net_debug!("stack: {} bound to {}", id, local);
        Ok(local)
    }

    /// Connect to a remote endpoint.
    ///
    /// Binds an unbound socket first. Blocks until the connection is established or the
    /// handshake failed.
    pub fn connect(&self, id: SocketId, remote: Endpoint) -> Result<()> {
        let socket = self.stream(id)?;
        if remote.is_wildcard() || remote.addr.is_unspecified() {
            return Err(Error::Unreachable);
        }

        let mut local = socket.tuple().local;
        if local.addr.is_unspecified() {
            local.addr = self.shared.ip.local_addr();
        }
        if local.port == 0 {
            local.port = self.ephemeral(Kind::Stream)?;
        }
        socket.tuple.lock().local = local;

        self.request(id, &socket, Request::Connect(remote))?;
        outcome(&socket, Notification::Connected)
    }

    /// Wait for connections on a bound socket.
    pub fn listen(&self, id: SocketId) -> Result<()> {
        let socket = self.stream(id)?;
        if socket.tuple().local.is_wildcard() {
            return Err(Error::Illegal);
        }
        self.request(id, &socket, Request::Listen)?;
        outcome(&socket, Notification::Ready)
    }

    /// Take the next established connection of a listener.
    ///
    /// Blocks until one completes its handshake.
    pub fn accept(&self, id: SocketId) -> Result<SocketId> {
        let socket = self.stream(id)?;
        if socket.state() != State::Listen {
            return Err(Error::Illegal);
        }
        loop {
            match socket.wait() {
                Notification::Accepted(child) => return Ok(child),
                Notification::Closed => return Err(Error::NotConnected),
                other => { net_trace!("stack: {} ignores {:?} while accepting", id, other); },
            }
        }
    }

    /// Send all of `data`.
    ///
    /// Data goes out one segment at a time, each no larger than the peer's window and maximum
    /// segment size. Blocks until the last segment is acknowledged.
    pub fn send(&self, id: SocketId, data: &[u8]) -> Result<usize> {
        let socket = self.stream(id)?;
        let mut sent = 0;
        while sent < data.len() {
            let len = socket.tcb.lock().send_capacity().min(data.len() - sent);
            let chunk = data[sent..sent + len].to_vec();
            self.request(id, &socket, Request::Send(chunk))?;
            outcome(&socket, Notification::Acked)?;
            sent += len;
        }
        Ok(sent)
    }

    /// Read received data.
    ///
    /// Blocks while nothing was received. Returns 0 once the peer closed its side and everything
    /// was read.
    pub fn recv(&self, id: SocketId, buf: &mut [u8]) -> Result<usize> {
        let socket = self.stream(id)?;
        match socket.state() {
            State::Listen => return Err(Error::Illegal),
            State::Closed if !socket.buffer.is_closed() => return Err(Error::NotConnected),
            _ => (),
        }
        Ok(socket.buffer.read(buf))
    }

    /// Close the socket.
    ///
    /// For a connection this blocks until our FIN is acknowledged. The id is invalid afterwards.
    pub fn close(&self, id: SocketId) -> Result<()> {
        let socket = self.get(id)?;
        match socket.kind() {
            Kind::Datagram => {
                self.shared.table.release(id);
                Ok(())
            },
            Kind::Stream => {
                self.request(id, &socket, Request::Close)?;
                outcome(&socket, Notification::Closed)
            },
        }
    }

    /// Send a datagram.
    ///
    /// Binds an unbound socket to an ephemeral port first.
    pub fn send_to(&self, id: SocketId, remote: Endpoint, payload: &[u8]) -> Result<()> {
        let socket = self.datagram(id)?;
        let mut local = socket.tuple().local;
        if local.port == 0 {
            local.port = self.ephemeral(Kind::Datagram)?;
            socket.tuple.lock().local = local;
        }
        udp::send_to(&*self.shared.ip, local, remote, payload)
    }

    /// Receive a datagram and its sender.
    ///
    /// Blocks until one arrives. A datagram longer than `buf` is truncated.
    pub fn recv_from(&self, id: SocketId, buf: &mut [u8]) -> Result<(usize, Endpoint)> {
        let socket = self.datagram(id)?;
        if socket.tuple().local.is_wildcard() {
            return Err(Error::Illegal);
        }
        loop {
            match socket.wait() {
                Notification::Datagram(from, data) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    return Ok((len, from));
                },
                Notification::Closed => return Err(Error::NotConnected),
                other => { net_trace!("stack: {} ignores {:?}", id, other); },
            }
        }
    }

    /// The connection state of a socket.
    pub fn state(&self, id: SocketId) -> Result<State> {
        Ok(self.get(id)?.state())
    }

    /// The local endpoint of a socket.
    pub fn local(&self, id: SocketId) -> Result<Endpoint> {
        Ok(self.get(id)?.tuple().local)
    }

    /// The remote endpoint of a connection.
    pub fn peer(&self, id: SocketId) -> Result<Endpoint> {
        let tuple = self.stream(id)?.tuple();
        if tuple.foreign.is_wildcard() {
            return Err(Error::NotConnected);
        }
        Ok(tuple.foreign)
    }

    fn get(&self, id: SocketId) -> Result<Arc<Socket>> {
        self.shared.table.get(id).ok_or(Error::NotConnected)
    }

    fn stream(&self, id: SocketId) -> Result<Arc<Socket>> {
        let socket = self.get(id)?;
        match socket.kind() {
            Kind::Stream => Ok(socket),
            Kind::Datagram => Err(Error::Illegal),
        }
    }

    fn datagram(&self, id: SocketId) -> Result<Arc<Socket>> {
        let socket = self.get(id)?;
        match socket.kind() {
            Kind::Datagram => Ok(socket),
            Kind::Stream => Err(Error::Illegal),
        }
    }

    fn ephemeral(&self, kind: Kind) -> Result<u16> {
        self.shared.table.unused_port(kind, EPHEMERAL_PORTS).ok_or(Error::Exhausted)
    }

    /// Hand a request to the dispatcher, forgetting outcomes of earlier calls.
    fn request(&self, id: SocketId, socket: &Socket, request: Request) -> Result<()> {
        socket.drain();
        self.tcp.lock()
            .send(Command::App(id, request))
            .map_err(|_| Error::NotConnected)
    }
}

/// Wait until `done` or a failure is notified.
fn outcome(socket: &Socket, done: Notification) -> Result<()> {
    loop {
        match socket.wait() {
            notification if notification == done => return Ok(()),
            Notification::TimedOut => return Err(Error::TimedOut),
            Notification::Reset => return Err(Error::Reset),
            Notification::Rejected(err) => return Err(err),
            Notification::Closed => return Err(Error::NotConnected),
            other => { net_trace!("stack: waiting for {:?}, ignoring {:?}", done, other); },
        }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.tcp.lock().send(Command::Shutdown);
        let _ = self.udp.lock().send(udp::Command::Shutdown);

        let ignore: Handler = Arc::new(|_: Datagram| ());
        self.shared.ip.register(Protocol::Tcp, ignore.clone());
        self.shared.ip.register(Protocol::Udp, ignore);

        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                net_warn!("stack: a protocol thread panicked");
            }
        }
    }
}
