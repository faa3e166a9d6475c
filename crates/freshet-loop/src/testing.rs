//! Deterministic in-memory peers for driving the loop in tests.
//!
//! [`SimPeer`] plays the remote end of a connection: it feeds bytes in,
//! collects what the server wrote, constrains the transport's write window
//! to induce backpressure, and expires idle deadlines without waiting on a
//! clock. Every event is dispatched synchronously through the same loop
//! paths the poller uses.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::event_loop::{ContextId, EventLoop, LoopInner};
use crate::socket::Socket;
use crate::transport::Transport;

struct SimState {
    /// Peer-to-server bytes not yet read.
    inbound: RefCell<VecDeque<u8>>,
    /// Server-to-peer bytes the transport accepted.
    written: RefCell<Vec<u8>>,
    /// Remaining bytes the transport accepts before reporting `WouldBlock`.
    window: Cell<usize>,
    /// Value `window` refills to on a writable event.
    capacity: Cell<usize>,
    /// Peer sent FIN; reads drain the buffer then return `Ok(0)`.
    fin: Cell<bool>,
}

struct SimTransport {
    state: Rc<SimState>,
}

impl Transport for SimTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.state.inbound.borrow_mut();
        if inbound.is_empty() {
            if self.state.fin.get() {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let mut n = 0;
        while n < buf.len() {
            match inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let window = self.state.window.get();
        if window == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let accepted = window.min(buf.len());
        self.state.window.set(window - accepted);
        self.state
            .written
            .borrow_mut()
            .extend_from_slice(&buf[..accepted]);
        Ok(accepted)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// The remote end of a simulated connection.
pub struct SimPeer {
    loop_: EventLoop,
    socket: Socket,
    state: Rc<SimState>,
}

impl EventLoop {
    /// Open a simulated connection into `context`.
    ///
    /// Dispatches `on_open` before returning, exactly like an accept.
    pub fn open_simulated(&self, context: ContextId) -> io::Result<SimPeer> {
        let state = Rc::new(SimState {
            inbound: RefCell::new(VecDeque::new()),
            written: RefCell::new(Vec::new()),
            window: Cell::new(usize::MAX),
            capacity: Cell::new(usize::MAX),
            fin: Cell::new(false),
        });
        let socket = self.attach(
            context,
            Box::new(SimTransport {
                state: Rc::clone(&state),
            }),
        )?;
        Ok(SimPeer {
            loop_: self.clone(),
            socket,
            state,
        })
    }
}

impl SimPeer {
    /// Deliver bytes to the server; the `on_data` turn runs synchronously.
    pub fn send(&self, bytes: &[u8]) {
        self.state
            .inbound
            .borrow_mut()
            .extend(bytes.iter().copied());
        LoopInner::socket_readable(&self.loop_.inner, &self.socket);
    }

    /// Drain everything the server has put on the wire so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut *self.state.written.borrow_mut())
    }

    /// Cap how many bytes the transport accepts before `WouldBlock`.
    pub fn set_write_capacity(&self, capacity: usize) {
        self.state.capacity.set(capacity);
        self.state.window.set(capacity);
    }

    /// Refill the write window and fire the writable path.
    pub fn writable(&self) {
        self.state.window.set(self.state.capacity.get());
        LoopInner::socket_writable(&self.loop_.inner, &self.socket);
    }

    /// Half-close from the peer (FIN after any unread bytes).
    pub fn half_close(&self) {
        self.state.fin.set(true);
        LoopInner::socket_readable(&self.loop_.inner, &self.socket);
    }

    /// Abrupt reset: the connection is torn down immediately.
    pub fn reset(&self) {
        self.socket.close();
    }

    /// Expire the idle deadline if one is armed. Returns whether it fired.
    pub fn expire_timer(&self) -> bool {
        if !self.socket.timeout_armed() {
            return false;
        }
        LoopInner::socket_timed_out(&self.loop_.inner, &self.socket);
        true
    }

    #[must_use]
    pub fn timer_armed(&self) -> bool {
        self.socket.timeout_armed()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }

    /// The server-side handle for this connection.
    #[must_use]
    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}
