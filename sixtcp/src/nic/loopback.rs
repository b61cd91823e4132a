//! Implementation of a software loop-back network.
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::layer::{Error, Result};
use crate::layer::ip::{Datagram, Handler, Ipv6};
use crate::wire::ip::{Address, Protocol};

/// Decides for every datagram whether it is lost.
pub type Filter = Box<dyn FnMut(&Datagram) -> bool + Send>;

/// A software network connecting hosts in the same process.
///
/// Datagrams are delivered synchronously, the sending thread calls the handler the destination
/// registered for the protocol. Handlers only forward into a channel so this never blocks.
pub struct Network {
    hosts: RwLock<HashMap<Address, Weak<Host>>>,
    filter: Mutex<Option<Filter>>,
    delivered: AtomicUsize,
    dropped: AtomicUsize,
}

/// A host attached to a loop-back network.
pub struct Host {
    addr: Address,
    network: Arc<Network>,
    handlers: RwLock<HashMap<Protocol, Handler>>,
}

impl Network {
    /// Create an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Network {
            hosts: RwLock::new(HashMap::new()),
            filter: Mutex::new(None),
            delivered: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        })
    }

    /// Attach a host with an address.
    ///
    /// Fails with `AddrInUse` while another host with that address is attached.
    pub fn host(self: &Arc<Self>, addr: Address) -> Result<Arc<Host>> {
        let mut hosts = self.hosts.write();
        if hosts.get(&addr).and_then(Weak::upgrade).is_some() {
            return Err(Error::AddrInUse);
        }
        let host = Arc::new(Host {
            addr,
            network: Arc::clone(self),
            handlers: RwLock::new(HashMap::new()),
        });
        hosts.insert(addr, Arc::downgrade(&host));
        Ok(host)
    }

    /// Lose every datagram for which `filter` returns `true`.
    pub fn set_filter<F>(&self, filter: F)
        where F: FnMut(&Datagram) -> bool + Send + 'static,
    {
        *self.filter.lock() = Some(Box::new(filter));
    }

    /// Deliver everything again.
    pub fn clear_filter(&self) {
        *self.filter.lock() = None;
    }

    /// Number of datagrams handed to a host.
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of datagrams lost to the filter or for lack of a receiver.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn route(&self, dst_addr: Address, datagram: Datagram) -> Result<()> {
        let host = self.hosts.read()
            .get(&dst_addr)
            .and_then(Weak::upgrade)
            .ok_or(Error::Unreachable)?;

        let lost = match &mut *self.filter.lock() {
            Some(filter) => filter(&datagram),
            None => false,
        };
        if lost {
            net_trace!("loopback: losing datagram for {}", dst_addr);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        if host.receive(datagram) {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl Host {
    /// The network this host is attached to.
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    fn receive(&self, datagram: Datagram) -> bool {
        let next_header = match datagram.parse() {
            Ok((repr, _)) => repr.next_header,
            Err(err) => {
                net_debug!("loopback: {} drops malformed datagram: {}", self.addr, err);
                return false;
            },
        };
        let handler = match self.handlers.read().get(&next_header) {
            Some(handler) => Arc::clone(handler),
            None => {
                net_trace!("loopback: {} has no handler for {:?}", self.addr, next_header);
                return false;
            },
        };
        handler(datagram);
        true
    }
}

impl Ipv6 for Host {
    fn local_addr(&self) -> Address {
        self.addr
    }

    fn send(&self, dst_addr: Address, protocol: Protocol, payload: &[u8]) -> Result<()> {
        let dst_addr = if dst_addr == Address::LOOPBACK { self.addr } else { dst_addr };
        let datagram = Datagram::new(self.addr, dst_addr, protocol, payload);
        self.network.route(dst_addr, datagram)
    }

    fn register(&self, protocol: Protocol, handler: Handler) {
        self.handlers.write().insert(protocol, handler);
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        let mut hosts = self.network.hosts.write();
        // A new host may have taken the address already.
        if hosts.get(&self.addr).map_or(false, |weak| weak.strong_count() == 0) {
            hosts.remove(&self.addr);
        }
    }
}
