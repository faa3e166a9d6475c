//! Socket handles.
//!
//! A [`Socket`] is a cheap clone-able handle over per-connection state owned
//! by the event loop: the transport, the cork and backpressure buffers, the
//! idle deadline, and a typed extension slot the owning protocol layer hangs
//! its data off.
//!
//! All mutation goes through interior mutability (`Cell`/`RefCell`): the loop
//! is single-threaded and callbacks re-enter socket operations freely, so
//! borrows are kept to single operations and never held across user code.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::io;
use std::net::IpAddr;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::event_loop::LoopInner;
use crate::transport::Transport;

/// Outcome of pushing bytes toward the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes the transport accepted during this call.
    pub written: usize,
    /// True when bytes remain buffered because the transport would block.
    pub backpressure: bool,
}

impl WriteOutcome {
    pub(crate) const EMPTY: WriteOutcome = WriteOutcome {
        written: 0,
        backpressure: false,
    };
}

/// TLS material accepted when creating a socket context.
///
/// The handshake itself lives outside this layer; the options are carried so
/// listener configuration keeps the same shape with and without TLS.
#[derive(Debug, Clone, Default)]
pub struct SocketContextOptions {
    pub key_file: Option<String>,
    pub cert_file: Option<String>,
    pub dh_params_file: Option<String>,
    pub passphrase: Option<String>,
}

impl SocketContextOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_key_file(mut self, path: impl Into<String>) -> Self {
        self.key_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_cert_file(mut self, path: impl Into<String>) -> Self {
        self.cert_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_dh_params_file(mut self, path: impl Into<String>) -> Self {
        self.dh_params_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }
}

pub(crate) struct SocketInner {
    pub(crate) token: usize,
    pub(crate) owner: Weak<LoopInner>,
    /// Id of the socket context whose event handlers receive this socket.
    pub(crate) context: Cell<usize>,
    pub(crate) transport: RefCell<Box<dyn Transport>>,
    /// Writes made while corked; flushed in one burst on uncork.
    cork_buf: RefCell<Vec<u8>>,
    /// Bytes accepted but not yet taken by the transport.
    pending: RefCell<Vec<u8>>,
    corked: Cell<bool>,
    closed: Cell<bool>,
    shut_down: Cell<bool>,
    pub(crate) deadline: Cell<Option<Instant>>,
    ext: RefCell<Option<Box<dyn Any>>>,
    peer: Option<IpAddr>,
}

/// Handle to a connection owned by the event loop.
#[derive(Clone)]
pub struct Socket {
    pub(crate) inner: Rc<SocketInner>,
}

impl Socket {
    pub(crate) fn new(
        token: usize,
        owner: Weak<LoopInner>,
        context: usize,
        transport: Box<dyn Transport>,
    ) -> Self {
        let peer = transport.peer_addr().map(|a| a.ip());
        Self {
            inner: Rc::new(SocketInner {
                token,
                owner,
                context: Cell::new(context),
                transport: RefCell::new(transport),
                cork_buf: RefCell::new(Vec::new()),
                pending: RefCell::new(Vec::new()),
                corked: Cell::new(false),
                closed: Cell::new(false),
                shut_down: Cell::new(false),
                deadline: Cell::new(None),
                ext: RefCell::new(None),
                peer,
            }),
        }
    }

    /// Two handles are the same socket if they share the underlying state.
    #[must_use]
    pub fn same_socket(&self, other: &Socket) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start coalescing writes; nothing reaches the transport until
    /// [`uncork`](Self::uncork).
    pub fn cork(&self) {
        self.inner.corked.set(true);
    }

    #[must_use]
    pub fn is_corked(&self) -> bool {
        self.inner.corked.get()
    }

    /// Flush the cork buffer and any pending backpressure.
    ///
    /// `backpressure` in the outcome means the send buffer was not fully
    /// drained; the caller decides whether that re-arms the idle timer.
    pub fn uncork(&self) -> WriteOutcome {
        self.inner.corked.set(false);
        let burst = std::mem::take(&mut *self.inner.cork_buf.borrow_mut());
        if burst.is_empty() && self.inner.pending.borrow().is_empty() {
            return WriteOutcome::EMPTY;
        }
        self.write_uncorked(&burst, true)
    }

    /// Write bytes, buffering whatever the transport does not accept.
    ///
    /// While corked the bytes land in the cork buffer and `backpressure`
    /// stays false; real pressure is discovered at uncork time. `msg_more`
    /// hints that more data follows immediately (kept for parity with the
    /// transport contract; the buffering already coalesces).
    pub fn write(&self, data: &[u8], _msg_more: bool) -> WriteOutcome {
        if self.inner.closed.get() {
            return WriteOutcome::EMPTY;
        }
        if self.inner.corked.get() {
            self.inner.cork_buf.borrow_mut().extend_from_slice(data);
            return WriteOutcome {
                written: 0,
                backpressure: false,
            };
        }
        self.write_uncorked(data, true)
    }

    /// Write without buffering the remainder.
    ///
    /// Returns how many bytes were accepted. While corked everything is
    /// accepted into the cork buffer, matching the corked [`write`] path.
    pub fn try_write(&self, data: &[u8]) -> usize {
        if self.inner.closed.get() {
            return 0;
        }
        if self.inner.corked.get() {
            self.inner.cork_buf.borrow_mut().extend_from_slice(data);
            return data.len();
        }
        if self.flush_pending().backpressure {
            return 0;
        }
        let (written, _blocked) = self.transport_write(data);
        written
    }

    /// Push previously buffered bytes toward the transport (a zero-byte
    /// write with drain semantics).
    pub fn drain(&self) -> WriteOutcome {
        if self.inner.closed.get() {
            return WriteOutcome::EMPTY;
        }
        self.flush_pending()
    }

    /// True when the backpressure buffer holds bytes.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.inner.pending.borrow().is_empty()
    }

    /// Arm the idle deadline `seconds` from now; `0` disarms it.
    pub fn set_timeout(&self, seconds: u32) {
        if seconds == 0 {
            self.inner.deadline.set(None);
        } else {
            self.inner
                .deadline
                .set(Some(Instant::now() + Duration::from_secs(u64::from(seconds))));
        }
    }

    #[must_use]
    pub fn timeout_armed(&self) -> bool {
        self.inner.deadline.get().is_some()
    }

    /// Close the socket abruptly.
    ///
    /// Fires the owning context's `on_close` exactly once, then detaches the
    /// socket from the loop. Buffered but unsent bytes are discarded.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        if let Some(owner) = self.inner.owner.upgrade() {
            LoopInner::socket_closed(&owner, self);
        }
    }

    /// Mark the write side shut down. No graceful FIN is attempted by this
    /// layer; protocol code checks the flag to refuse further work.
    pub fn shutdown(&self) {
        self.inner.shut_down.set(true);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.get()
    }

    /// Peer address, when the transport knows it.
    #[must_use]
    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.inner.peer
    }

    /// Replace the extension slot with `value`.
    pub fn set_ext<T: Any>(&self, value: T) {
        *self.inner.ext.borrow_mut() = Some(Box::new(value));
    }

    /// Clone the extension value out of the slot.
    #[must_use]
    pub fn ext<T: Any + Clone>(&self) -> Option<T> {
        self.inner
            .ext
            .borrow()
            .as_ref()
            .and_then(|b| b.downcast_ref::<T>())
            .cloned()
    }

    /// Drop whatever the extension slot holds.
    pub fn clear_ext(&self) {
        *self.inner.ext.borrow_mut() = None;
    }

    pub(crate) fn token(&self) -> usize {
        self.inner.token
    }

    pub(crate) fn context_id(&self) -> usize {
        self.inner.context.get()
    }

    pub(crate) fn set_context(&self, context: usize) {
        self.inner.context.set(context);
    }

    /// Flush pending, then write `data`; remainder goes to pending when
    /// `buffer_remainder` is set.
    fn write_uncorked(&self, data: &[u8], buffer_remainder: bool) -> WriteOutcome {
        let flushed = self.flush_pending();
        if flushed.backpressure {
            if buffer_remainder && !data.is_empty() {
                self.inner.pending.borrow_mut().extend_from_slice(data);
            }
            return WriteOutcome {
                written: flushed.written,
                backpressure: true,
            };
        }
        let (written, blocked) = self.transport_write(data);
        if blocked && buffer_remainder && written < data.len() {
            self.inner
                .pending
                .borrow_mut()
                .extend_from_slice(&data[written..]);
        }
        WriteOutcome {
            written: flushed.written + written,
            backpressure: blocked && written < data.len(),
        }
    }

    fn flush_pending(&self) -> WriteOutcome {
        let buffered = std::mem::take(&mut *self.inner.pending.borrow_mut());
        if buffered.is_empty() {
            return WriteOutcome::EMPTY;
        }
        let (written, blocked) = self.transport_write(&buffered);
        if written < buffered.len() {
            self.inner
                .pending
                .borrow_mut()
                .extend_from_slice(&buffered[written..]);
        }
        WriteOutcome {
            written,
            backpressure: blocked && written < buffered.len(),
        }
    }

    /// Write as much of `data` as the transport takes. Returns
    /// `(written, blocked)`; I/O errors count as blocked and are surfaced
    /// later by the read path.
    fn transport_write(&self, data: &[u8]) -> (usize, bool) {
        let mut transport = self.inner.transport.borrow_mut();
        let mut written = 0;
        while written < data.len() {
            match transport.write(&data[written..]) {
                Ok(0) => return (written, true),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return (written, true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::debug!("socket write error: {e}");
                    return (written, true);
                }
            }
        }
        (written, false)
    }
}
