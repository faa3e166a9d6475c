//! Per-connection extension data.
//!
//! One [`ConnectionData`] hangs off each accepted socket and carries the
//! response-lifecycle flags, the user's drain/abort/body callbacks, and the
//! parser residue. Everything is interior-mutable because the response
//! handle and the ingest pipeline both touch it within one turn.

use std::cell::{Cell, RefCell};

use crate::parser::RequestParser;

/// Response lifecycle flags.
pub(crate) mod flags {
    /// A request head was delivered and the response is not finished.
    pub const RESPONSE_PENDING: u8 = 1 << 0;
    /// A status line is on the wire.
    pub const HAS_WRITTEN_STATUS: u8 = 1 << 1;
    /// Raw body bytes follow the headers; no length framing is possible.
    pub const WRITE_CALLED: u8 = 1 << 2;
    /// The response is complete.
    pub const END_CALLED: u8 = 1 << 3;
    /// A Content-Length header frames the body.
    pub const HAS_CONTENT_LENGTH: u8 = 1 << 4;
    /// The request asked for the connection to close after the response.
    pub const CLOSE_AFTER_RESPONSE: u8 = 1 << 5;
}

pub(crate) type WritableHandler = Box<dyn FnMut(u64) -> bool>;
pub(crate) type AbortHandler = Box<dyn FnOnce()>;
pub(crate) type StreamHandler = Box<dyn FnMut(&[u8], bool)>;

pub(crate) struct ConnectionData {
    flags: Cell<u8>,
    write_offset: Cell<u64>,
    pub(crate) on_writable: RefCell<Option<WritableHandler>>,
    pub(crate) on_aborted: RefCell<Option<AbortHandler>>,
    pub(crate) in_stream: RefCell<Option<StreamHandler>>,
    pub(crate) parser: RefCell<RequestParser>,
}

impl ConnectionData {
    pub(crate) fn new(max_head_size: usize) -> Self {
        Self {
            flags: Cell::new(0),
            write_offset: Cell::new(0),
            on_writable: RefCell::new(None),
            on_aborted: RefCell::new(None),
            in_stream: RefCell::new(None),
            parser: RefCell::new(RequestParser::new(max_head_size)),
        }
    }

    pub(crate) fn has(&self, flag: u8) -> bool {
        self.flags.get() & flag != 0
    }

    pub(crate) fn set(&self, flag: u8) {
        self.flags.set(self.flags.get() | flag);
    }

    pub(crate) fn clear(&self, flag: u8) {
        self.flags.set(self.flags.get() & !flag);
    }

    /// Wholesale reset at a new request head: only `RESPONSE_PENDING`
    /// survives into the fresh exchange.
    pub(crate) fn begin_request(&self) {
        self.flags.set(flags::RESPONSE_PENDING);
    }

    pub(crate) fn write_offset(&self) -> u64 {
        self.write_offset.get()
    }

    pub(crate) fn set_write_offset(&self, offset: u64) {
        self.write_offset.set(offset);
    }

    pub(crate) fn add_write_offset(&self, bytes: u64) {
        self.write_offset.set(self.write_offset.get() + bytes);
    }
}
