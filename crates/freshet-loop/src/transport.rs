//! Transport seam between a [`Socket`](crate::Socket) and the bytes
//! underneath it.
//!
//! The event loop never talks to the operating system directly; it goes
//! through this trait. Production sockets use [`TcpTransport`] over a mio
//! stream, tests use the in-memory transport from [`crate::testing`].

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

/// Non-blocking byte transport.
///
/// Implementations must never block: `read` and `write` return
/// [`io::ErrorKind::WouldBlock`] when no progress can be made. `read`
/// returning `Ok(0)` signals the peer half-closed its side (FIN).
pub trait Transport {
    /// Read available bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write bytes, returning how many the transport accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Peer address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Hook the transport into the poll registry.
    ///
    /// Transports that are not driven by the poller (the simulated one)
    /// keep the default no-op.
    fn register(&mut self, _registry: &Registry, _token: Token) -> io::Result<()> {
        Ok(())
    }

    /// Detach the transport from the poll registry.
    fn deregister(&mut self, _registry: &Registry) -> io::Result<()> {
        Ok(())
    }
}

/// TCP transport over a non-blocking mio stream.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap an accepted mio stream.
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(
            &mut self.stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}
