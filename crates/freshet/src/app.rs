//! The fluent application builder.

use std::io;

use freshet_http::{ContextOptions, Dispatch, HttpContext, HttpRequest, HttpResponse};
use freshet_loop::EventLoop;
use log::info;

/// One HTTP application: an event loop plus the context serving on it.
///
/// ```no_run
/// use freshet::{App, Dispatch};
///
/// App::new()?
///     .get("/hello", |res, _req| {
///         res.end(b"hello");
///         Dispatch::Handled
///     })
///     .listen("127.0.0.1", 3000)?
///     .run()?;
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct App {
    event_loop: EventLoop,
    context: HttpContext,
}

impl App {
    /// Build an app with default options.
    pub fn new() -> io::Result<Self> {
        Self::with_options(ContextOptions::default())
    }

    /// Build an app with explicit context options (timeouts, head size,
    /// TLS material).
    pub fn with_options(options: ContextOptions) -> io::Result<Self> {
        let event_loop = EventLoop::new()?;
        let context = HttpContext::create(&event_loop, options);
        Ok(Self {
            event_loop,
            context,
        })
    }

    /// Register a handler for `method` + `pattern`.
    #[must_use]
    pub fn route(
        self,
        method: &str,
        pattern: &str,
        handler: impl FnMut(&HttpResponse, &mut HttpRequest) -> Dispatch + 'static,
    ) -> Self {
        self.context.on_http(method, pattern, handler);
        self
    }

    #[must_use]
    pub fn get(
        self,
        pattern: &str,
        handler: impl FnMut(&HttpResponse, &mut HttpRequest) -> Dispatch + 'static,
    ) -> Self {
        self.route("GET", pattern, handler)
    }

    #[must_use]
    pub fn post(
        self,
        pattern: &str,
        handler: impl FnMut(&HttpResponse, &mut HttpRequest) -> Dispatch + 'static,
    ) -> Self {
        self.route("POST", pattern, handler)
    }

    #[must_use]
    pub fn put(
        self,
        pattern: &str,
        handler: impl FnMut(&HttpResponse, &mut HttpRequest) -> Dispatch + 'static,
    ) -> Self {
        self.route("PUT", pattern, handler)
    }

    #[must_use]
    pub fn delete(
        self,
        pattern: &str,
        handler: impl FnMut(&HttpResponse, &mut HttpRequest) -> Dispatch + 'static,
    ) -> Self {
        self.route("DELETE", pattern, handler)
    }

    #[must_use]
    pub fn patch(
        self,
        pattern: &str,
        handler: impl FnMut(&HttpResponse, &mut HttpRequest) -> Dispatch + 'static,
    ) -> Self {
        self.route("PATCH", pattern, handler)
    }

    #[must_use]
    pub fn head(
        self,
        pattern: &str,
        handler: impl FnMut(&HttpResponse, &mut HttpRequest) -> Dispatch + 'static,
    ) -> Self {
        self.route("HEAD", pattern, handler)
    }

    #[must_use]
    pub fn options(
        self,
        pattern: &str,
        handler: impl FnMut(&HttpResponse, &mut HttpRequest) -> Dispatch + 'static,
    ) -> Self {
        self.route("OPTIONS", pattern, handler)
    }

    /// Match any method; tried after the method-specific routes fail.
    #[must_use]
    pub fn any(
        self,
        pattern: &str,
        handler: impl FnMut(&HttpResponse, &mut HttpRequest) -> Dispatch + 'static,
    ) -> Self {
        self.route("*", pattern, handler)
    }

    /// Register a connect/disconnect filter (`+1` on accept, `-1` on close).
    #[must_use]
    pub fn filter(self, handler: impl FnMut(&HttpResponse, i32) + 'static) -> Self {
        self.context.filter(handler);
        self
    }

    /// Register a pre-routing use-handler, run for every request head.
    #[must_use]
    pub fn use_handler(
        self,
        handler: impl FnMut(&HttpResponse, &mut HttpRequest) + 'static,
    ) -> Self {
        self.context.use_handler(handler);
        self
    }

    /// Bind a listener. Register all routes before listening.
    pub fn listen(self, host: &str, port: u16) -> io::Result<Self> {
        let addr = self.context.listen(host, port)?;
        info!("listening on {addr}");
        Ok(self)
    }

    /// Drive the event loop until it has nothing left to do.
    pub fn run(self) -> io::Result<()> {
        self.event_loop.run()
    }

    #[must_use]
    pub fn context(&self) -> &HttpContext {
        &self.context
    }

    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }
}
