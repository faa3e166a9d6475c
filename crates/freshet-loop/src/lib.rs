//! Non-blocking socket layer for the freshet HTTP server.
//!
//! The pieces fit together like this:
//!
//! - [`EventLoop`] — single-threaded mio poll loop owning listeners and
//!   sockets, dispatching readiness to registered socket contexts.
//! - [`SocketEvents`] — the handler contract a protocol layer implements
//!   (`on_open`, `on_data`, `on_writable`, `on_end`, `on_timeout`,
//!   `on_close`).
//! - [`Socket`] — per-connection handle: corked/uncorked writes with
//!   backpressure buffering, idle deadline, typed extension slot.
//! - [`Transport`] — the byte seam under a socket; TCP in production, an
//!   in-memory pair in [`testing`].
//!
//! One loop per thread; nothing here is `Send`, by design. Run several
//! loops on several threads for horizontal scaling.

#![deny(unsafe_code)]

mod event_loop;
mod socket;
pub mod testing;
mod transport;

pub use event_loop::{ContextId, DataVerdict, EventLoop, SocketEvents};
pub use socket::{Socket, SocketContextOptions, WriteOutcome};
pub use transport::{TcpTransport, Transport};
