//! The process logic of protocol layers.
//!
//! ## Layering
//!
//! Each protocol is split into two parts; the packet logic contained in `wire` and the processing
//! part in this module. The IPv6 layer below is a collaborator described by the [`Ipv6`] trait,
//! the transports on top of it share the [`SocketTable`].
//!
//! ## Threads
//!
//! Processing happens on dedicated threads that own one channel each. The TCP dispatcher is the
//! only writer of connection state, the retransmission timer only ever sends commands to it. The
//! UDP dispatcher is stateless and forwards datagrams to the owning socket's channel.
//!
//! [`Ipv6`]: ip/trait.Ipv6.html
//! [`SocketTable`]: socket/struct.SocketTable.html
use core::fmt;

pub mod ip;
pub mod socket;
pub mod tcp;
pub mod udp;

/// The result type of application visible operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Failures reported to the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The operation was not permitted.
    ///
    /// Returned when the socket's kind or state does not allow the operation.
    Illegal,

    /// Not enough space for the requested packet.
    ///
    /// The payload does not fit a single datagram.
    BadSize,

    /// Unable to find a route towards the destination address.
    Unreachable,

    /// The action could not be completed because there were not enough resources.
    ///
    /// The socket table is full. Closing sockets will make room again.
    Exhausted,

    /// The retransmission budget was used up without an answer from the peer.
    TimedOut,

    /// The handle does not refer to a live socket or the socket has no peer.
    NotConnected,

    /// The peer aborted the connection.
    Reset,

    /// Another socket is already bound to the endpoint.
    AddrInUse,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Illegal => write!(f, "operation not permitted in this state"),
            Error::BadSize => write!(f, "payload too large"),
            Error::Unreachable => write!(f, "destination unreachable"),
            Error::Exhausted => write!(f, "no free socket"),
            Error::TimedOut => write!(f, "connection timed out"),
            Error::NotConnected => write!(f, "socket not connected"),
            Error::Reset => write!(f, "connection reset by peer"),
            Error::AddrInUse => write!(f, "address in use"),
        }
    }
}

impl std::error::Error for Error {}

/// Can convert from a wire error.
///
/// This indicates some layer tried to operate on a packet but failed.
impl From<crate::wire::Error> for Error {
    fn from(_: crate::wire::Error) -> Self {
        Error::Illegal
    }
}
