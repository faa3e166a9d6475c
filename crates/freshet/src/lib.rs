//! Event-driven HTTP/1.1 server framework.
//!
//! freshet serves HTTP from a single-threaded, non-blocking event loop:
//! handlers run synchronously on the loop thread, responses write through a
//! corked socket with explicit backpressure, slow clients are evicted by a
//! per-connection idle timer, and a connection can upgrade to WebSocket
//! mid-request. Run one [`App`] per thread to scale horizontally.
//!
//! # Crate structure
//!
//! - [`freshet_loop`] — socket layer: event loop, transports, cork/uncork
//! - [`freshet_router`] — pattern router with cooperative yield
//! - [`freshet_http`] — the HTTP context core (parsing, response
//!   lifecycle, timeouts, upgrade bridge, middleware)
//! - this crate — the fluent [`App`] surface
//!
//! # Quick start
//!
//! ```no_run
//! use freshet::{App, Dispatch};
//!
//! App::new()?
//!     .get("/hello", |res, _req| {
//!         res.end(b"hello");
//!         Dispatch::Handled
//!     })
//!     .get("/:name", |res, req| {
//!         let mut greeting = b"hi ".to_vec();
//!         greeting.extend_from_slice(req.parameter(0).unwrap_or("?").as_bytes());
//!         res.end(&greeting);
//!         Dispatch::Handled
//!     })
//!     .listen("127.0.0.1", 3000)?
//!     .run()?;
//! # Ok::<(), std::io::Error>(())
//! ```

#![deny(unsafe_code)]

mod app;

pub use app::App;

pub use freshet_http::{
    upgrade, ContextOptions, Dispatch, Headers, HttpContext, HttpRequest, HttpResponse,
    HttpVersion, Params, HTTP_IDLE_TIMEOUT_S,
};
pub use freshet_loop::{
    ContextId, DataVerdict, EventLoop, Socket, SocketContextOptions, SocketEvents,
};

/// Convenient glob import for applications.
pub mod prelude {
    pub use crate::{App, ContextOptions, Dispatch, HttpRequest, HttpResponse};
}
