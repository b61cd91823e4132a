//! Tunables of the stack.
use crate::time::Duration;

/// Static configuration of a [`Stack`].
///
/// All fields are public, start from `Config::default()` and adjust what is needed.
///
/// [`Stack`]: ../stack/struct.Stack.html
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Number of socket slots, listeners and queued connections included.
    pub sockets: usize,
    /// Capacity of each socket's receive buffer in bytes.
    ///
    /// This also bounds the advertised receive window.
    pub recv_buffer: usize,
    /// The segment size announced to peers and the upper bound for our own segments.
    pub mss: u16,
    /// Whether TCP headers are compressed.
    ///
    /// Both ends must agree, there is no negotiation.
    pub compression: bool,
    /// Period of the retransmission sweep.
    pub tick: Duration,
    /// Wait for a handshake reply before the first retry.
    pub syn_timeout: Duration,
    /// Added to the handshake timeout with every retry.
    pub syn_backoff: Duration,
    /// Handshake retries before giving up.
    pub syn_retries: u32,
    /// Retransmission timeout before the first round trip sample.
    pub initial_rto: Duration,
    /// Lower bound of the retransmission timeout.
    pub min_rto: Duration,
    /// Once the backed off timeout exceeds this, the connection is abandoned.
    pub max_rto: Duration,
    /// Quiet time in TIME_WAIT. Zero releases the socket immediately.
    pub time_wait: Duration,
}

/// Start of the port range assigned to unbound connecting sockets.
pub const EPHEMERAL_PORTS: u16 = 49152;

impl Default for Config {
    fn default() -> Self {
        Config {
            sockets: 8,
            recv_buffer: 512,
            mss: 64,
            compression: true,
            tick: Duration::from_millis(100),
            syn_timeout: Duration::from_secs(2),
            syn_backoff: Duration::from_secs(1),
            syn_retries: 3,
            initial_rto: Duration::from_secs(3),
            min_rto: Duration::from_secs(1),
            max_rto: Duration::from_secs(60),
            time_wait: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// The advertised window for an empty receive buffer.
    pub fn max_window(&self) -> u16 {
        self.recv_buffer.min(usize::from(u16::MAX)) as u16
    }
}
