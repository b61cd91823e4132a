//! The TCP layer.
//!
//! Connections follow the RFC 793 state machine with a single segment in flight per direction.
//! Each connection's control block lives in its socket and is changed by the [`Dispatcher`]
//! alone, which feeds it segments, application requests and timer events and performs the
//! resulting [`Signals`].
//!
//! With header compression enabled every segment is sent in one of the forms of the [`hc`]
//! codec. The SYN and SYN-ACK as well as the final handshake ACK go out in full form and set
//! up the context, afterwards headers are compressed. A retransmission after a timeout, or an
//! answer to a duplicate, uses the mostly compressed form so that a peer whose context went
//! stale catches up.
//!
//! [`Dispatcher`]: dispatch/struct.Dispatcher.html
//! [`Signals`]: connection/struct.Signals.html
//! [`hc`]: ../../wire/hc/index.html
pub mod admission;
pub mod connection;
pub mod dispatch;
pub mod timer;

pub use admission::Admission;

pub use connection::{
    Compression,
    Connection,
    Context,
    Signals,
    State,
    Verdict};

pub use dispatch::{
    Command,
    Dispatcher,
    Request,
    Shared};

pub use timer::{
    RttEstimator,
    TimerEvent};

#[cfg(test)]
mod tests;
