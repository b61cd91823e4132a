use structopt::StructOpt;

use sixtcp::time::Duration;

#[derive(Clone, Debug, StructOpt)]
pub struct Config {
    /// Total number of bytes to echo.
    #[structopt(short = "n", default_value = "1024")]
    pub total_bytes: usize,

    /// Bytes per round trip, at most the receive buffer.
    #[structopt(short = "l", default_value = "128")]
    pub buffer_bytes: usize,

    /// Port of the echo server.
    #[structopt(long = "port", default_value = "7")]
    pub port: u16,

    /// Echo datagrams instead of a stream.
    #[structopt(long = "udp")]
    pub udp: bool,

    /// Send ordinary TCP headers.
    #[structopt(long = "no-compression")]
    pub no_compression: bool,

    /// Lose every n-th TCP datagram, 0 loses nothing.
    #[structopt(long = "lose-every", default_value = "0")]
    pub lose_every: usize,

    /// The largest segment payload.
    #[structopt(long = "mss", default_value = "64")]
    pub mss: u16,

    /// Receive buffer per socket.
    #[structopt(long = "buffer", default_value = "512")]
    pub recv_buffer: usize,

    /// Timer tick in milliseconds.
    #[structopt(long = "tick", default_value = "20")]
    pub tick_ms: u64,
}

impl Config {
    pub fn from_args() -> Self {
        StructOpt::from_args()
    }

    /// The stack configuration both hosts run with.
    pub fn stack(&self) -> sixtcp::Config {
        let mut config = sixtcp::Config::default();
        config.compression = !self.no_compression;
        config.mss = self.mss.max(1);
        config.recv_buffer = self.recv_buffer.max(1);
        config.tick = Duration::from_millis(self.tick_ms.max(1));
        config
    }

    /// Bytes per round trip, so that an echo always fits the client's buffer.
    pub fn chunk(&self) -> usize {
        self.buffer_bytes.min(self.recv_buffer).max(1)
    }
}
