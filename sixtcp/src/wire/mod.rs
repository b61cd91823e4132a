/*! Low-level packet access and construction.

# An overview over packet representations

The `wire` module deals with the packet *representation*. It provides two levels of
functionality.

 * First, it provides functions to extract fields from sequences of octets, and to insert fields
   into sequences of octets. This happens in the lowercase structures e.g. [`ipv6`], [`tcp`] or
   [`udp`].
 * Second, it provides a compact, high-level representation of header data that can be created
   from parsing and emitted into a sequence of octets. This happens through the `Repr` family of
   structs, e.g. [`tcp::Repr`].

[`ipv6`]: ip/struct.ipv6.html
[`tcp`]: tcp/struct.tcp.html
[`udp`]: udp/struct.udp.html
[`tcp::Repr`]: tcp/struct.Repr.html

The header compression codec in [`hc`] sits beside these. It does not describe a standalone
header but a diff of a TCP header against per-connection state, so its representation takes the
shared context as an additional input on both encoding and decoding.

[`hc`]: hc/index.html

The lowercase family guarantees that, if `check_len()` returned `Ok(())`, then no field accessor
or setter method will panic. When parsing untrusted input, it is *necessary* to use one of the
checked constructors. In the `Repr` family, `parse()` never panics and `emit()` never panics as
long as the underlying buffer is exactly `Repr::buffer_len()` octets long.

# Examples

To emit an IPv6 header into an octet buffer, and then parse it back:

```rust
use sixtcp::wire::ip::{self, Address, Protocol};
let repr = ip::Repr {
    src_addr:    Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
    dst_addr:    Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 2),
    next_header: Protocol::Udp,
    payload_len: 10,
    hop_limit:   64,
};
let mut buffer = vec![0; repr.buffer_len() + repr.payload_len];
repr.emit(ip::ipv6::new_unchecked_mut(&mut buffer));
let packet = ip::ipv6::new_checked(&buffer).expect("truncated packet");
let parsed = ip::Repr::parse(packet).expect("malformed packet");
assert_eq!(repr, parsed);
```
*/
// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// in large parts from `smoltcp` originally distributed under 0-clause BSD
//
// Applies to files in this folder unless otherwise noted. These are:
// * `error.rs`
// * `ip.rs`
// * `mod.rs` (this file)
// * `tcp.rs`
// * `udp.rs`

mod field {
    pub(crate) type Field = ::core::ops::Range<usize>;
}

mod error;
pub mod hc;
pub mod ip;
pub mod tcp;
pub mod udp;

pub use self::error::{
    Error,
    Result};

pub use self::ip::{
    Address as Ipv6Address,
    Endpoint as IpEndpoint,
    Protocol as IpProtocol,
    Repr as Ipv6Repr};

pub use self::tcp::{
    Flags as TcpFlags,
    Repr as TcpRepr,
    SeqNumber as TcpSeqNumber,
    TcpOption};

pub use self::udp::Repr as UdpRepr;

/// Abstraction for checksum behaviour.
///
/// The transport checksum covers a pseudo header consisting of the source and destination
/// address, so these must be provided when the checksum is to be filled or checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Checksum {
    /// Always fill the checksum and check if it exists.
    Manual {
        /// The source address of the enclosing IPv6 header.
        src_addr: Ipv6Address,
        /// The destination address of the enclosing IPv6 header.
        dst_addr: Ipv6Address,
    },

    /// Never inspect the checksum.
    ///
    /// This assumes that some other part has already performed the necessary checks.
    Ignored,
}
