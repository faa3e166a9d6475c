//! HTTP/1.1 context core.
//!
//! This crate turns the byte stream of a non-blocking socket into routed
//! HTTP requests and manages the full response lifecycle: slow-client
//! eviction, backpressure-aware writing, abort notification, and in-band
//! upgrade to WebSocket.
//!
//! The center of gravity is [`HttpContext`]: created on an event loop, it
//! owns the route table and middleware lists and registers the socket event
//! handlers that drive every connection. [`HttpRequest`] is an ephemeral
//! view valid for one synchronous handler call; [`HttpResponse`] is an
//! alias over the connection that user code writes through.
//!
//! ```no_run
//! use freshet_http::{ContextOptions, HttpContext};
//! use freshet_loop::EventLoop;
//! use freshet_router::Dispatch;
//!
//! let event_loop = EventLoop::new().unwrap();
//! let context = HttpContext::create(&event_loop, ContextOptions::default());
//! context.on_http("GET", "/hello", |res, _req| {
//!     res.end(b"ok");
//!     Dispatch::Handled
//! });
//! context.listen("127.0.0.1", 3000).unwrap();
//! event_loop.run().unwrap();
//! ```

#![deny(unsafe_code)]

mod connection;
mod context;
mod parser;
mod request;
mod response;
pub mod upgrade;

pub use context::{ContextOptions, HttpContext, HTTP_IDLE_TIMEOUT_S};
pub use parser::{
    ChunkVerdict, HeadVerdict, ParseError, ParseOutcome, RequestParser, DEFAULT_MAX_HEAD_SIZE,
};
pub use request::{Headers, HttpRequest, HttpVersion};
pub use response::HttpResponse;

// the router's dispatch vocabulary is part of this crate's handler API
pub use freshet_router::{Dispatch, Params};
