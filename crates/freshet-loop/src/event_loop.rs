//! The single-threaded event loop.
//!
//! One [`EventLoop`] owns a mio poller, any number of listeners, and the
//! sockets accepted through them. Sockets belong to a *socket context*: a
//! registered [`SocketEvents`] handler set plus its options. Protocol layers
//! (HTTP, WebSocket) are socket contexts; a connection moves between them by
//! [adoption](EventLoop::adopt_socket) without the poller noticing.
//!
//! Everything runs on the calling thread. Handlers re-enter loop operations
//! (close, adopt, write) freely; interior borrows are never held across a
//! handler call.

use std::any::Any;
use std::cell::RefCell;
use std::io;
use std::net::ToSocketAddrs;
use std::rc::{Rc, Weak};
use std::time::Instant;

use log::{debug, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};

use crate::socket::{Socket, SocketContextOptions};
use crate::transport::{TcpTransport, Transport};

/// Listener tokens live above this offset so they never collide with
/// connection tokens.
const LISTENER_BASE: usize = 1 << 30;

/// Identifier of a registered socket context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextId(pub(crate) usize);

/// What `on_data` decided about the socket.
///
/// The typed replacement for "return a different socket pointer": the loop
/// learns whether the connection stays with its context, was handed to
/// another context, or is gone.
pub enum DataVerdict {
    /// The socket stays with its current context.
    Keep,
    /// The socket was adopted by another context mid-turn (protocol
    /// upgrade). Later events route through the new context.
    Adopted(Socket),
    /// The socket was closed during the turn.
    Closed,
}

/// Event handlers a socket context registers with the loop.
///
/// All callbacks run on the loop thread. `on_close` fires exactly once per
/// socket, whether the close came from the peer, a timeout, or the handlers
/// themselves.
pub trait SocketEvents {
    /// A connection was attached to this context.
    fn on_open(&self, socket: &Socket);

    /// Bytes arrived.
    fn on_data(&self, socket: &Socket, data: &[u8]) -> DataVerdict;

    /// The transport may accept more bytes.
    fn on_writable(&self, socket: &Socket);

    /// The peer half-closed its side.
    fn on_end(&self, socket: &Socket);

    /// The socket's idle deadline expired.
    fn on_timeout(&self, socket: &Socket);

    /// The socket is gone. Extension data is dropped after this returns.
    fn on_close(&self, socket: &Socket);
}

struct ContextSlot {
    handler: Weak<dyn SocketEvents>,
    #[allow(dead_code)]
    options: SocketContextOptions,
}

struct Listener {
    tcp: TcpListener,
    context: usize,
}

pub(crate) struct LoopInner {
    poll: RefCell<Poll>,
    contexts: RefCell<Vec<ContextSlot>>,
    sockets: RefCell<Vec<Option<Socket>>>,
    free_tokens: RefCell<Vec<usize>>,
    listeners: RefCell<Vec<Listener>>,
}

/// Handle to the loop; clones share the same loop.
#[derive(Clone)]
pub struct EventLoop {
    pub(crate) inner: Rc<LoopInner>,
}

impl EventLoop {
    /// Create a loop with a fresh poller.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            inner: Rc::new(LoopInner {
                poll: RefCell::new(Poll::new()?),
                contexts: RefCell::new(Vec::new()),
                sockets: RefCell::new(Vec::new()),
                free_tokens: RefCell::new(Vec::new()),
                listeners: RefCell::new(Vec::new()),
            }),
        })
    }

    /// Register a socket context.
    ///
    /// The loop keeps only a weak reference: the caller owns the handler,
    /// and dropping it orphans the context's sockets.
    pub fn add_context(&self, handler: Rc<dyn SocketEvents>) -> ContextId {
        self.add_context_with_options(handler, SocketContextOptions::default())
    }

    /// Register a socket context carrying listener options (TLS material).
    pub fn add_context_with_options(
        &self,
        handler: Rc<dyn SocketEvents>,
        options: SocketContextOptions,
    ) -> ContextId {
        let mut contexts = self.inner.contexts.borrow_mut();
        contexts.push(ContextSlot {
            handler: Rc::downgrade(&handler),
            options,
        });
        ContextId(contexts.len() - 1)
    }

    /// Bind a TCP listener whose accepted sockets belong to `context`.
    ///
    /// Returns the locally bound address (useful with port `0`).
    pub fn listen(
        &self,
        context: ContextId,
        host: &str,
        port: u16,
    ) -> io::Result<std::net::SocketAddr> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unresolvable address"))?;
        let mut tcp = TcpListener::bind(addr)?;
        let local = tcp.local_addr()?;
        let mut listeners = self.inner.listeners.borrow_mut();
        let token = Token(LISTENER_BASE + listeners.len());
        self.inner
            .poll
            .borrow()
            .registry()
            .register(&mut tcp, token, Interest::READABLE)?;
        listeners.push(Listener {
            tcp,
            context: context.0,
        });
        debug!("listening on {local}");
        Ok(local)
    }

    /// Attach an already-connected transport to `context`.
    ///
    /// Dispatches `on_open` before returning.
    pub fn attach(
        &self,
        context: ContextId,
        transport: Box<dyn Transport>,
    ) -> io::Result<Socket> {
        LoopInner::attach_transport(&self.inner, context.0, transport)
    }

    /// Re-home `socket` into another context with fresh extension data.
    ///
    /// The transport, its buffers, and its cork state are untouched; only
    /// the owning context and the extension slot change. From the poller's
    /// perspective nothing happened.
    pub fn adopt_socket<T: Any>(&self, socket: &Socket, context: ContextId, ext: T) -> Socket {
        socket.set_context(context.0);
        socket.set_ext(ext);
        socket.clone()
    }

    /// Drive the loop until no listeners or sockets remain.
    pub fn run(&self) -> io::Result<()> {
        let mut events = Events::with_capacity(256);
        loop {
            {
                let idle = self.inner.listeners.borrow().is_empty()
                    && !self.inner.sockets.borrow().iter().any(Option::is_some);
                if idle {
                    return Ok(());
                }
            }
            let timeout = self
                .inner
                .nearest_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()));
            match self.inner.poll.borrow_mut().poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            for event in events.iter() {
                let token = event.token().0;
                if token >= LISTENER_BASE {
                    LoopInner::accept_ready(&self.inner, token - LISTENER_BASE);
                    continue;
                }
                let socket = {
                    let sockets = self.inner.sockets.borrow();
                    sockets.get(token).and_then(Clone::clone)
                };
                let Some(socket) = socket else { continue };
                if event.is_writable() {
                    LoopInner::socket_writable(&self.inner, &socket);
                }
                if event.is_readable() || event.is_read_closed() {
                    LoopInner::socket_readable(&self.inner, &socket);
                }
            }
            LoopInner::sweep_timeouts(&self.inner);
        }
    }
}

impl LoopInner {
    fn handler(&self, context: usize) -> Option<Rc<dyn SocketEvents>> {
        self.contexts
            .borrow()
            .get(context)
            .and_then(|slot| slot.handler.upgrade())
    }

    pub(crate) fn attach_transport(
        this: &Rc<LoopInner>,
        context: usize,
        mut transport: Box<dyn Transport>,
    ) -> io::Result<Socket> {
        let token = {
            let recycled = this.free_tokens.borrow_mut().pop();
            match recycled {
                Some(token) => token,
                None => {
                    let mut sockets = this.sockets.borrow_mut();
                    sockets.push(None);
                    sockets.len() - 1
                }
            }
        };
        if let Err(e) = transport.register(this.poll.borrow().registry(), Token(token)) {
            this.free_tokens.borrow_mut().push(token);
            return Err(e);
        }
        let socket = Socket::new(token, Rc::downgrade(this), context, transport);
        this.sockets.borrow_mut()[token] = Some(socket.clone());
        if let Some(handler) = this.handler(context) {
            handler.on_open(&socket);
        }
        Ok(socket)
    }

    fn accept_ready(this: &Rc<LoopInner>, index: usize) {
        loop {
            let accepted = {
                let listeners = this.listeners.borrow();
                let Some(listener) = listeners.get(index) else {
                    return;
                };
                match listener.tcp.accept() {
                    Ok((stream, addr)) => Some((stream, addr, listener.context)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        None
                    }
                }
            };
            let Some((stream, addr, context)) = accepted else {
                return;
            };
            debug!("accepted connection from {addr}");
            if let Err(e) =
                Self::attach_transport(this, context, Box::new(TcpTransport::new(stream)))
            {
                warn!("failed to attach accepted connection: {e}");
            }
        }
    }

    /// Read until the transport would block, dispatching each chunk.
    pub(crate) fn socket_readable(this: &Rc<LoopInner>, socket: &Socket) {
        enum Step {
            Data(usize),
            Fin,
            Blocked,
            Errored,
        }
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            if socket.is_closed() {
                return;
            }
            let step = {
                let mut transport = socket.inner.transport.borrow_mut();
                match transport.read(&mut buf) {
                    Ok(0) => Step::Fin,
                    Ok(n) => Step::Data(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Step::Blocked,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("socket read error: {e}");
                        Step::Errored
                    }
                }
            };
            match step {
                Step::Data(n) => {
                    let Some(handler) = this.handler(socket.context_id()) else {
                        return;
                    };
                    match handler.on_data(socket, &buf[..n]) {
                        DataVerdict::Keep | DataVerdict::Adopted(_) => {}
                        DataVerdict::Closed => return,
                    }
                }
                Step::Fin => {
                    if let Some(handler) = this.handler(socket.context_id()) {
                        handler.on_end(socket);
                    }
                    return;
                }
                Step::Blocked => return,
                Step::Errored => {
                    socket.close();
                    return;
                }
            }
        }
    }

    pub(crate) fn socket_writable(this: &Rc<LoopInner>, socket: &Socket) {
        if socket.is_closed() {
            return;
        }
        if let Some(handler) = this.handler(socket.context_id()) {
            handler.on_writable(socket);
        }
    }

    pub(crate) fn socket_timed_out(this: &Rc<LoopInner>, socket: &Socket) {
        if socket.is_closed() {
            return;
        }
        socket.inner.deadline.set(None);
        if let Some(handler) = this.handler(socket.context_id()) {
            handler.on_timeout(socket);
        }
    }

    /// Fires `on_close` on the owning context, then detaches the socket.
    /// Called exactly once per socket, from [`Socket::close`].
    pub(crate) fn socket_closed(this: &Rc<LoopInner>, socket: &Socket) {
        socket.inner.deadline.set(None);
        if let Some(handler) = this.handler(socket.context_id()) {
            handler.on_close(socket);
        }
        socket.clear_ext();
        {
            let poll = this.poll.borrow();
            let _ = socket
                .inner
                .transport
                .borrow_mut()
                .deregister(poll.registry());
        }
        let token = socket.token();
        let mut sockets = this.sockets.borrow_mut();
        if let Some(slot) = sockets.get_mut(token) {
            if slot.as_ref().is_some_and(|s| s.same_socket(socket)) {
                *slot = None;
                this.free_tokens.borrow_mut().push(token);
            }
        }
    }

    fn sweep_timeouts(this: &Rc<LoopInner>) {
        let now = Instant::now();
        let expired: Vec<Socket> = this
            .sockets
            .borrow()
            .iter()
            .flatten()
            .filter(|s| s.inner.deadline.get().is_some_and(|d| d <= now))
            .cloned()
            .collect();
        for socket in expired {
            Self::socket_timed_out(this, &socket);
        }
    }

    fn nearest_deadline(&self) -> Option<Instant> {
        self.sockets
            .borrow()
            .iter()
            .flatten()
            .filter_map(|s| s.inner.deadline.get())
            .min()
    }
}
