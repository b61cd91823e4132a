//! A TCP and UDP transport for constrained IPv6 links.
//!
//! ## Table of contents
//!
//! 1. [Highlights](#highlights)
//! 2. [Design](#design-and-relevant-core-concepts)
//! 3. [The wire module](wire/index.html)
//!    1. [Ip V6](wire/ip/index.html)
//!    1. [Tcp](wire/tcp/index.html)
//!    1. [Udp](wire/udp/index.html)
//!    1. [Header compression](wire/hc/index.html)
//! 4. [The layers](layer/index.html)
//!    1. [The socket table](layer/socket/index.html)
//!    1. [Tcp](layer/tcp/index.html)
//!    1. [Udp](layer/udp/index.html)
//! 5. [Running a stack](stack/index.html)
//!
//! ## Highlights
//!
//! * A small TCP state machine with stop-and-wait transmission, suited for links with frames of
//!   barely more than a hundred bytes.
//! * Link-aware TCP header compression. After the handshake, a data segment usually carries a
//!   header of seven bytes instead of twenty.
//! * Jacobson-style retransmission timeouts with exponential backoff.
//!
//! ## Design and relevant core concepts
//!
//! The stack runs as a handful of threads that talk to each other and to the application only
//! through messages. One thread owns the TCP segment dispatch and is the only writer of
//! connection state, one sweeps all sockets for retransmission timeouts and one dispatches UDP
//! datagrams. The timer never touches a connection directly, it merely injects events into the
//! dispatcher's channel, so the state machine reacts to one closed set of events regardless of
//! where they originate.
//!
//! Resources are bounded upfront. The socket table has a fixed number of slots and every socket
//! has a fixed receive buffer. Running out of either is an ordinary error returned to the caller
//! and never fatal to the protocol threads.
//!
//! The IPv6 layer itself is not part of this crate. It is consumed through the
//! [`Ipv6`](layer/ip/trait.Ipv6.html) trait, for which the [`nic`](nic/index.html) module offers
//! an in-process loopback network.
#![warn(missing_docs)]
#![warn(unreachable_pub)]

#[macro_use] mod macros;
pub mod config;
pub mod layer;
pub mod nic;
pub mod stack;
pub mod time;
pub mod wire;

pub use config::Config;
pub use stack::Stack;
