//! The response side of a connection.
//!
//! [`HttpResponse`] is an alias over the connection: it holds the socket
//! handle and the shared [`ConnectionData`], and every operation mutates
//! that state and appends to the socket's outbound buffer. Handles are
//! cheap to clone and may be stashed by user code that finishes a response
//! later (from `on_writable`, after an async job, ...), as long as it obeys
//! the respond-or-register-abort contract.
//!
//! Wire format: `HTTP/1.1 <status>\r\n`, headers, then either a
//! `Content-Length`-framed body (`end`/`try_end`) or raw streamed bytes
//! (`write` followed by a bare `end`). A response that never wrote a status
//! gets `200 OK` implicitly.

use std::rc::Rc;

use freshet_loop::Socket;
use log::error;

use crate::connection::{flags, ConnectionData};

/// Handle for answering one request.
pub struct HttpResponse {
    socket: Socket,
    conn: Rc<ConnectionData>,
    idle_timeout: u32,
}

impl Clone for HttpResponse {
    fn clone(&self) -> Self {
        Self {
            socket: self.socket.clone(),
            conn: Rc::clone(&self.conn),
            idle_timeout: self.idle_timeout,
        }
    }
}

impl HttpResponse {
    pub(crate) fn new(socket: Socket, conn: Rc<ConnectionData>, idle_timeout: u32) -> Self {
        Self {
            socket,
            conn,
            idle_timeout,
        }
    }

    /// Write the status line, e.g. `res.write_status("404 Not Found")`.
    ///
    /// Must come before headers and body; calling it twice is a programmer
    /// error (asserted in debug builds, logged and ignored in release).
    pub fn write_status(&self, status: &str) -> &Self {
        if self.conn.has(flags::END_CALLED) {
            return self;
        }
        if self.conn.has(flags::HAS_WRITTEN_STATUS) {
            debug_assert!(false, "write_status called twice on one response");
            error!("write_status called twice on one response");
            return self;
        }
        self.conn.set(flags::HAS_WRITTEN_STATUS);
        self.socket.write(b"HTTP/1.1 ", true);
        self.socket.write(status.as_bytes(), true);
        self.socket.write(b"\r\n", true);
        self
    }

    /// Write one header. Implicitly writes `200 OK` first if no status was
    /// written. Headers cannot follow body bytes.
    pub fn write_header(&self, name: &str, value: &[u8]) -> &Self {
        if self.conn.has(flags::WRITE_CALLED) || self.conn.has(flags::END_CALLED) {
            debug_assert!(false, "write_header after body bytes");
            error!("write_header after body bytes is ignored");
            return self;
        }
        self.ensure_status();
        self.socket.write(name.as_bytes(), true);
        self.socket.write(b": ", true);
        self.socket.write(value, true);
        self.socket.write(b"\r\n", true);
        self
    }

    /// Stream raw body bytes without length framing.
    ///
    /// The first call terminates the header block; the response body then
    /// runs until [`end`](Self::end). Returns false when the bytes landed in
    /// the backpressure buffer — pair with [`on_writable`](Self::on_writable)
    /// to resume.
    pub fn write(&self, chunk: &[u8]) -> bool {
        if self.conn.has(flags::END_CALLED) {
            return true;
        }
        if !self.conn.has(flags::WRITE_CALLED) {
            self.ensure_status();
            self.socket.write(b"\r\n", true);
            self.conn.set(flags::WRITE_CALLED);
        }
        let out = self.socket.write(chunk, false);
        self.conn.add_write_offset(chunk.len() as u64);
        !out.backpressure
    }

    /// Complete the response with `chunk` as (the rest of) the body.
    ///
    /// When nothing was streamed yet this emits `Content-Length` framing;
    /// after [`write`](Self::write) it just appends and completes. Clears
    /// the pending state, drops the abort handler, and re-arms the idle
    /// timer. Returns false when bytes remain buffered.
    pub fn end(&self, chunk: &[u8]) -> bool {
        if self.conn.has(flags::END_CALLED) {
            return true;
        }
        let out = if self.conn.has(flags::WRITE_CALLED) {
            let out = self.socket.write(chunk, false);
            self.conn.add_write_offset(chunk.len() as u64);
            out
        } else {
            self.ensure_status();
            self.conn.set(flags::HAS_CONTENT_LENGTH);
            let framing = format!("Content-Length: {}\r\n\r\n", chunk.len());
            self.socket.write(framing.as_bytes(), true);
            let out = self.socket.write(chunk, false);
            self.conn.add_write_offset(chunk.len() as u64);
            out
        };
        self.finish();
        !out.backpressure
    }

    /// Try to make progress on a `Content-Length`-framed response of
    /// `total_size` body bytes without buffering beyond what the transport
    /// takes.
    ///
    /// Returns `(ok, done)`: `ok` is whether all of `chunk` was accepted,
    /// `done` whether the response completed. On partial acceptance the
    /// caller resumes from [`write_offset`](Self::write_offset) inside its
    /// `on_writable` callback.
    pub fn try_end(&self, chunk: &[u8], total_size: u64) -> (bool, bool) {
        if self.conn.has(flags::END_CALLED) {
            return (true, true);
        }
        if !self.conn.has(flags::HAS_CONTENT_LENGTH) {
            self.ensure_status();
            self.conn.set(flags::HAS_CONTENT_LENGTH);
            let framing = format!("Content-Length: {total_size}\r\n\r\n");
            self.socket.write(framing.as_bytes(), true);
        }
        let accepted = self.socket.try_write(chunk);
        self.conn.add_write_offset(accepted as u64);
        let done = self.conn.write_offset() >= total_size;
        if done {
            self.finish();
        }
        (accepted == chunk.len(), done)
    }

    /// Register the drain callback, invoked with the current write offset
    /// whenever the socket can take more bytes. Return false from it to
    /// report that no progress was made.
    pub fn on_writable(&self, handler: impl FnMut(u64) -> bool + 'static) -> &Self {
        *self.conn.on_writable.borrow_mut() = Some(Box::new(handler));
        self
    }

    /// Register the abort callback, fired exactly once if the peer goes
    /// away before the response completes — and never after it completed.
    pub fn on_aborted(&self, handler: impl FnOnce() + 'static) -> &Self {
        *self.conn.on_aborted.borrow_mut() = Some(Box::new(handler));
        self
    }

    /// Register the request-body stream. Chunks arrive in order; the final
    /// one has `is_final == true` and may be empty.
    pub fn on_data(&self, handler: impl FnMut(&[u8], bool) + 'static) -> &Self {
        *self.conn.in_stream.borrow_mut() = Some(Box::new(handler));
        self
    }

    /// True once [`end`](Self::end) (or a completing `try_end`) ran.
    #[must_use]
    pub fn has_responded(&self) -> bool {
        self.conn.has(flags::END_CALLED)
    }

    /// Body bytes the user has written so far.
    #[must_use]
    pub fn write_offset(&self) -> u64 {
        self.conn.write_offset()
    }

    /// Batch writes made inside `f` into one burst.
    ///
    /// Handlers already run corked by the ingest pipeline; this is for
    /// completing responses from other callbacks (`on_writable`, timers of
    /// the surrounding application, ...).
    pub fn cork(&self, f: impl FnOnce(&HttpResponse)) {
        if self.socket.is_corked() {
            f(self);
            return;
        }
        self.socket.cork();
        f(self);
        let out = self.socket.uncork();
        if out.backpressure {
            self.socket.set_timeout(self.idle_timeout);
        }
    }

    /// Close the connection without completing the response.
    pub fn close(&self) {
        self.socket.close();
    }

    /// The raw socket handle, for upgrade bridges.
    #[must_use]
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    fn ensure_status(&self) {
        if !self.conn.has(flags::HAS_WRITTEN_STATUS) {
            self.write_status("200 OK");
        }
    }

    /// Seal the response: flip the lifecycle flags, drop the callbacks that
    /// must never fire after completion, hand the time budget back to the
    /// idle timer.
    fn finish(&self) {
        self.conn.set(flags::END_CALLED);
        self.conn.clear(flags::RESPONSE_PENDING);
        *self.conn.on_writable.borrow_mut() = None;
        *self.conn.on_aborted.borrow_mut() = None;
        self.socket.set_timeout(self.idle_timeout);
        if self.conn.has(flags::CLOSE_AFTER_RESPONSE) && !self.socket.is_corked() {
            let _ = self.socket.drain();
            self.socket.close();
        }
    }
}
