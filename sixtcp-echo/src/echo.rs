//! The echo exchange between two stacks.
use core::fmt;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use sixtcp::Stack;
use sixtcp::layer::{self, socket::Kind};
use sixtcp::layer::ip::Datagram;
use sixtcp::nic::Network;
use sixtcp::wire::ip::{Address, Endpoint, Protocol};

use crate::config::Config;
use crate::pattern;
use crate::score::Score;

/// Address of the host running the echo server.
pub const SERVER: Address = Address([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
/// Address of the host running the client.
pub const CLIENT: Address = Address([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);

#[derive(Debug)]
pub enum Error {
    /// A stack could not start its threads.
    Io(io::Error),
    /// A socket operation failed.
    Stack(layer::Error),
    /// The echo differs from what was sent.
    Mismatch {
        /// Stream position of the first chunk that differs.
        offset: usize,
    },
    /// The connection ended before everything came back.
    Truncated {
        /// Bytes echoed until then.
        echoed: usize,
    },
    /// The server thread panicked.
    Server,
}

/// Run the echo described by the configuration.
pub fn run(config: &Config) -> Result<Score, Error> {
    let network = Network::new();
    if config.lose_every > 0 {
        lose_tcp(&network, config.lose_every);
    }

    let stack = config.stack();
    let server = Arc::new(Stack::new(stack.clone(), network.host(SERVER)?)?);
    let client = Stack::new(stack, network.host(CLIENT)?)?;

    let start = Instant::now();
    let data_len = if config.udp {
        let handle = serve_datagrams(Arc::clone(&server), config)?;
        let echoed = echo_datagrams(&client, config)?;
        handle.join().map_err(|_| Error::Server)??;
        echoed
    } else {
        let handle = serve_stream(Arc::clone(&server), config)?;
        let echoed = echo_stream(&client, config)?;
        handle.join().map_err(|_| Error::Server)??;
        echoed
    };

    Ok(Score {
        data_len,
        time: start.elapsed(),
        delivered: network.delivered(),
        dropped: network.dropped(),
    })
}

/// Lose every n-th TCP datagram.
fn lose_tcp(network: &Network, every: usize) {
    let mut count = 0;
    network.set_filter(move |datagram: &Datagram| {
        match datagram.parse() {
            Ok((repr, _)) if repr.next_header == Protocol::Tcp => (),
            _ => return false,
        }
        count += 1;
        count % every == 0
    });
}

fn serve_stream(server: Arc<Stack>, config: &Config)
    -> Result<thread::JoinHandle<Result<(), Error>>, Error>
{
    let listener = server.socket(Kind::Stream)?;
    server.bind(listener, Endpoint::new(Address::UNSPECIFIED, config.port))?;
    server.listen(listener)?;
    let mut buf = vec![0; config.chunk()];

    Ok(thread::spawn(move || {
        let conn = server.accept(listener)?;
        loop {
            let len = server.recv(conn, &mut buf)?;
            if len == 0 {
                break;
            }
            server.send(conn, &buf[..len])?;
        }
        server.close(conn)?;
        server.close(listener)?;
        Ok(())
    }))
}

fn echo_stream(client: &Stack, config: &Config) -> Result<usize, Error> {
    let sock = client.socket(Kind::Stream)?;
    client.connect(sock, Endpoint::new(SERVER, config.port))?;

    let mut sent = vec![0; config.chunk()];
    let mut echoed = vec![0; config.chunk()];
    let mut offset = 0;
    while offset < config.total_bytes {
        let len = sent.len().min(config.total_bytes - offset);
        pattern::init(&mut sent[..len], offset);
        client.send(sock, &sent[..len])?;

        let mut received = 0;
        while received < len {
            match client.recv(sock, &mut echoed[received..len])? {
                0 => return Err(Error::Truncated { echoed: offset + received }),
                n => received += n,
            }
        }
        if sent[..len] != echoed[..len] {
            return Err(Error::Mismatch { offset });
        }
        offset += len;
    }

    client.close(sock)?;
    Ok(offset)
}

fn datagram_count(config: &Config) -> usize {
    (config.total_bytes + config.chunk() - 1) / config.chunk()
}

fn serve_datagrams(server: Arc<Stack>, config: &Config)
    -> Result<thread::JoinHandle<Result<(), Error>>, Error>
{
    let sock = server.socket(Kind::Datagram)?;
    server.bind(sock, Endpoint::new(Address::UNSPECIFIED, config.port))?;
    let count = datagram_count(config);
    let mut buf = vec![0; config.chunk()];

    Ok(thread::spawn(move || {
        for _ in 0..count {
            let (len, from) = server.recv_from(sock, &mut buf)?;
            server.send_to(sock, from, &buf[..len])?;
        }
        server.close(sock)?;
        Ok(())
    }))
}

fn echo_datagrams(client: &Stack, config: &Config) -> Result<usize, Error> {
    let sock = client.socket(Kind::Datagram)?;
    let server = Endpoint::new(SERVER, config.port);

    let mut sent = vec![0; config.chunk()];
    let mut echoed = vec![0; config.chunk()];
    let mut offset = 0;
    for _ in 0..datagram_count(config) {
        let len = sent.len().min(config.total_bytes - offset);
        pattern::init(&mut sent[..len], offset);
        client.send_to(sock, server, &sent[..len])?;

        let (received, from) = client.recv_from(sock, &mut echoed)?;
        if from != server || sent[..len] != echoed[..received] {
            return Err(Error::Mismatch { offset });
        }
        offset += len;
    }

    client.close(sock)?;
    Ok(offset)
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<layer::Error> for Error {
    fn from(err: layer::Error) -> Self {
        Error::Stack(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "could not start a stack: {}", err),
            Error::Stack(err) => write!(f, "{}", err),
            Error::Mismatch { offset } => write!(f, "echo differs at byte {}", offset),
            Error::Truncated { echoed } => write!(f, "connection closed after {} bytes", echoed),
            Error::Server => write!(f, "the server thread panicked"),
        }
    }
}

impl std::error::Error for Error {}
