//! The HTTP context: one per listener, owner of the route table, the
//! middleware lists, and the connection lifecycle.
//!
//! The context registers itself as a socket context on the event loop and
//! drives every connection through the same per-turn shape:
//!
//! ```text
//! on_data: cork -> parser -> (head -> use-handlers -> router -> handler)*
//!                         -> (body chunk -> in_stream)*
//!          then exactly one of: uncork | close | hand off (upgrade)
//! ```
//!
//! Timeout rules: the idle timer is armed between requests, disarmed while
//! a handler owns the request, re-armed while a body is still arriving or
//! while the outbound buffer holds bytes after an uncork. Expiry closes the
//! socket abruptly — a half-delivered payload must not look complete.

use std::cell::{Cell, RefCell};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use freshet_loop::{ContextId, DataVerdict, EventLoop, Socket, SocketContextOptions, SocketEvents};
use freshet_router::{Dispatch, HttpRouter, Params};
use log::{debug, error};

use crate::connection::{flags, ConnectionData};
use crate::parser::{ChunkVerdict, HeadVerdict, ParseOutcome, DEFAULT_MAX_HEAD_SIZE};
use crate::request::HttpRequest;
use crate::response::HttpResponse;

/// Slow clients are evicted after this many idle seconds by default.
pub const HTTP_IDLE_TIMEOUT_S: u32 = 10;

/// Tunables for one HTTP context.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Seconds of idleness before a connection is closed.
    pub idle_timeout_secs: u32,
    /// Cap on the request head (request line + headers).
    pub max_head_size: usize,
    /// TLS material handed to the socket layer, when serving TLS.
    pub tls: Option<SocketContextOptions>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            idle_timeout_secs: HTTP_IDLE_TIMEOUT_S,
            max_head_size: DEFAULT_MAX_HEAD_SIZE,
            tls: None,
        }
    }
}

impl ContextOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_idle_timeout_secs(mut self, secs: u32) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_max_head_size(mut self, bytes: usize) -> Self {
        self.max_head_size = bytes;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: SocketContextOptions) -> Self {
        self.tls = Some(tls);
        self
    }
}

type FilterHandler = Box<dyn FnMut(&HttpResponse, i32)>;
type UseHandler = Box<dyn FnMut(&HttpResponse, &mut HttpRequest)>;

/// The per-dispatch value threaded through the router.
struct RouterData {
    res: HttpResponse,
    req: HttpRequest,
}

struct ContextData {
    loop_: EventLoop,
    id: Cell<Option<ContextId>>,
    router: RefCell<HttpRouter<RouterData>>,
    filters: RefCell<Vec<FilterHandler>>,
    use_handlers: RefCell<Vec<UseHandler>>,
    /// Transient: set by the upgrade bridge inside a handler, consumed by
    /// the ingest pipeline on the same turn.
    upgraded: RefCell<Option<Socket>>,
    options: ContextOptions,
    misuse: Cell<u64>,
}

/// Handle to an HTTP context; clones share the same context.
#[derive(Clone)]
pub struct HttpContext {
    inner: Rc<ContextData>,
}

impl HttpContext {
    /// Create a context on `loop_` and register its event handlers.
    ///
    /// The context is torn down when the last handle drops; the loop keeps
    /// only a weak reference to it.
    pub fn create(loop_: &EventLoop, options: ContextOptions) -> HttpContext {
        let socket_options = options.tls.clone().unwrap_or_default();
        let inner = Rc::new(ContextData {
            loop_: loop_.clone(),
            id: Cell::new(None),
            router: RefCell::new(HttpRouter::new()),
            filters: RefCell::new(Vec::new()),
            use_handlers: RefCell::new(Vec::new()),
            upgraded: RefCell::new(None),
            options,
            misuse: Cell::new(0),
        });
        let id = loop_.add_context_with_options(inner.clone(), socket_options);
        inner.id.set(Some(id));
        HttpContext { inner }
    }

    /// The loop-side identifier of this context.
    #[must_use]
    pub fn context_id(&self) -> ContextId {
        self.inner
            .id
            .get()
            .expect("HttpContext is registered with its loop at create time")
    }

    /// The loop this context serves on.
    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.loop_
    }

    /// Register a connect/disconnect filter, called with `+1` on accept and
    /// `-1` on close (never on upgrade handover).
    pub fn filter(&self, handler: impl FnMut(&HttpResponse, i32) + 'static) {
        self.inner.filters.borrow_mut().push(Box::new(handler));
    }

    /// Register a use-handler, called for every request head before routing.
    pub fn use_handler(&self, handler: impl FnMut(&HttpResponse, &mut HttpRequest) + 'static) {
        self.inner.use_handlers.borrow_mut().push(Box::new(handler));
    }

    /// Register a route handler for `method` + `pattern`.
    ///
    /// Patterns support literal segments, `:name` parameters, and a trailing
    /// `*`. A handler may return [`Dispatch::Yielded`] to decline and let
    /// later routes try. Method `"*"` routes match any method, as the second
    /// routing pass.
    pub fn on_http(
        &self,
        method: &str,
        pattern: &str,
        mut handler: impl FnMut(&HttpResponse, &mut HttpRequest) -> Dispatch + 'static,
    ) {
        self.inner.router.borrow_mut().add(
            method,
            pattern,
            move |data: &mut RouterData, params: &Params| {
                data.req.set_params(params.clone());
                handler(&data.res, &mut data.req)
            },
        );
    }

    /// Bind a listener for this context. Registration should precede
    /// listening; the route table is treated as read-only once serving.
    pub fn listen(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        self.inner.loop_.listen(self.context_id(), host, port)
    }

    /// Hand the (already adopted) socket to the WebSocket layer.
    ///
    /// Only meaningful inside a request handler: the ingest pipeline
    /// consumes the slot on the same turn, uncorks the new socket, and
    /// routes subsequent events to the adopting context.
    pub fn upgrade_to_websocket(&self, new_socket: Socket) {
        *self.inner.upgraded.borrow_mut() = Some(new_socket);
    }

    /// How many handlers returned without responding or registering an
    /// abort handler. Always zero in a correct application.
    #[must_use]
    pub fn handler_misuse_count(&self) -> u64 {
        self.inner.misuse.get()
    }
}

fn conn_data(socket: &Socket) -> Option<Rc<ConnectionData>> {
    socket.ext::<Rc<ConnectionData>>()
}

impl ContextData {
    fn response(&self, socket: &Socket, conn: &Rc<ConnectionData>) -> HttpResponse {
        HttpResponse::new(socket.clone(), Rc::clone(conn), self.options.idle_timeout_secs)
    }

    /// A complete request head came off the parser.
    fn head_arrived(
        &self,
        socket: &Socket,
        conn: &Rc<ConnectionData>,
        mut req: HttpRequest,
    ) -> HeadVerdict {
        let idle = self.options.idle_timeout_secs;

        // the user owns the time budget until they respond
        socket.set_timeout(0);
        conn.set_write_offset(0);

        if conn.has(flags::RESPONSE_PENDING) {
            // pipelined head before the previous response completed
            socket.close();
            return HeadVerdict::Closed;
        }
        conn.begin_request();
        if !req.is_keep_alive() {
            conn.set(flags::CLOSE_AFTER_RESPONSE);
        }

        let res = self.response(socket, conn);
        for use_handler in self.use_handlers.borrow_mut().iter_mut() {
            use_handler(&res, &mut req);
        }

        let method = req.method().to_string();
        let url = req.url().to_string();
        let mut data = RouterData { res, req };
        let routed = {
            let mut router = self.router.borrow_mut();
            router.route(&method, &url, &mut data) || router.route("*", &url, &mut data)
        };
        if !routed {
            debug!("no route for {method} {url}, closing");
            socket.close();
            return HeadVerdict::Closed;
        }

        // an upgrade inside the handler surrendered the socket
        if let Some(new_socket) = self.upgraded.borrow_mut().take() {
            return HeadVerdict::Upgraded(new_socket);
        }
        if socket.is_closed() {
            return HeadVerdict::Closed;
        }
        if socket.is_shut_down() {
            return HeadVerdict::Closed;
        }

        if conn.has(flags::END_CALLED) && conn.has(flags::CLOSE_AFTER_RESPONSE) {
            // flush the corked response, then honour Connection: close
            let _ = socket.uncork();
            socket.close();
            return HeadVerdict::Closed;
        }

        if !conn.has(flags::END_CALLED) && conn.on_aborted.borrow().is_none() {
            self.misuse.set(self.misuse.get() + 1);
            error!(
                "request handler returned without responding or registering an abort handler"
            );
            debug_assert!(
                false,
                "request handler returned without responding or registering an abort handler"
            );
            socket.close();
            return HeadVerdict::Closed;
        }

        if !conn.has(flags::END_CALLED) && conn.in_stream.borrow().is_some() {
            // bound how long the client may take to deliver the body
            socket.set_timeout(idle);
        }
        HeadVerdict::Continue
    }

    /// A body chunk came off the parser; the final chunk may be empty.
    fn chunk_arrived(
        &self,
        socket: &Socket,
        conn: &Rc<ConnectionData>,
        chunk: &[u8],
        is_final: bool,
    ) -> ChunkVerdict {
        let taken = conn.in_stream.borrow_mut().take();
        let Some(mut handler) = taken else {
            return ChunkVerdict::Continue;
        };

        if is_final {
            socket.set_timeout(0);
        } else {
            socket.set_timeout(self.options.idle_timeout_secs);
        }

        // the handler may respond here; timeout must not change afterwards
        handler(chunk, is_final);

        if socket.is_closed() || socket.is_shut_down() {
            return ChunkVerdict::Closed;
        }

        // a consumed stream must not leak into the next request on this
        // socket; restore the handler only mid-body
        if !is_final && conn.in_stream.borrow().is_none() {
            *conn.in_stream.borrow_mut() = Some(handler);
        }
        ChunkVerdict::Continue
    }
}

impl SocketEvents for ContextData {
    fn on_open(&self, socket: &Socket) {
        // any connected socket times out until it carries a request
        socket.set_timeout(self.options.idle_timeout_secs);
        let conn = Rc::new(ConnectionData::new(self.options.max_head_size));
        socket.set_ext(Rc::clone(&conn));

        let res = self.response(socket, &conn);
        for filter in self.filters.borrow_mut().iter_mut() {
            filter(&res, 1);
        }
    }

    fn on_data(&self, socket: &Socket, data: &[u8]) -> DataVerdict {
        // no new work on a shut-down socket
        if socket.is_shut_down() {
            return DataVerdict::Keep;
        }
        let Some(conn) = conn_data(socket) else {
            return DataVerdict::Keep;
        };

        socket.cork();

        let outcome = {
            let mut parser = conn.parser.borrow_mut();
            let mut on_head = |req: HttpRequest| self.head_arrived(socket, &conn, req);
            let mut on_chunk =
                |chunk: &[u8], is_final: bool| self.chunk_arrived(socket, &conn, chunk, is_final);
            parser.consume(data, &mut on_head, &mut on_chunk)
        };

        match outcome {
            ParseOutcome::Continue => {
                let out = socket.uncork();
                if out.backpressure {
                    // the write completes under a writable event, bounded
                    // by the idle timer
                    socket.set_timeout(self.options.idle_timeout_secs);
                }
                DataVerdict::Keep
            }
            ParseOutcome::Upgraded(new_socket) => {
                let _ = new_socket.uncork();
                DataVerdict::Adopted(new_socket)
            }
            ParseOutcome::Closed => DataVerdict::Closed,
            ParseOutcome::Malformed(err) => {
                debug!("closing on parse error: {err}");
                socket.close();
                DataVerdict::Closed
            }
        }
    }

    fn on_writable(&self, socket: &Socket) {
        let Some(conn) = conn_data(socket) else {
            return;
        };
        let taken = conn.on_writable.borrow_mut().take();
        if let Some(mut handler) = taken {
            // the user owns timing while they drain
            socket.set_timeout(0);
            let progress = handler(conn.write_offset());
            if conn.has(flags::RESPONSE_PENDING) && conn.on_writable.borrow().is_none() {
                *conn.on_writable.borrow_mut() = Some(handler);
            }
            if !progress {
                // the user's write failed; do not drain further this turn
                return;
            }
        }
        // push buffered bytes and expect another writable event or request
        // within the timeout
        let _ = socket.drain();
        socket.set_timeout(self.options.idle_timeout_secs);
    }

    fn on_end(&self, socket: &Socket) {
        // half-closed sockets are not a thing in this core
        socket.close();
    }

    fn on_timeout(&self, socket: &Socket) {
        // force close rather than risk a half-delivered payload looking
        // complete to the client
        socket.close();
    }

    fn on_close(&self, socket: &Socket) {
        let Some(conn) = conn_data(socket) else {
            return;
        };
        let res = self.response(socket, &conn);
        for filter in self.filters.borrow_mut().iter_mut() {
            filter(&res, -1);
        }
        // signal the broken request only when one is pending; take the
        // handler out before calling so the slot is free during the call
        let aborted = conn.on_aborted.borrow_mut().take();
        if let Some(aborted) = aborted {
            aborted();
        }
    }
}
