//! Network interfaces below the transports.
//!
//! The stack consumes IPv6 through the [`Ipv6`] trait only. This module offers an in-process
//! implementation, a loopback [`Network`] on which any number of hosts exchange datagrams
//! directly. It is meant for tests and demonstrations, and allows simulating loss with a filter.
//!
//! [`Ipv6`]: ../layer/ip/trait.Ipv6.html
//! [`Network`]: loopback/struct.Network.html
pub mod loopback;

pub use loopback::{Host, Network};
