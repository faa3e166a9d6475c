//! End-to-end connection lifecycle tests over the simulated transport.
//!
//! Each test plays a wire-level scenario against a real context: bytes in,
//! bytes out, timers expired by hand, peers resetting mid-response.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use freshet_http::{upgrade, ContextOptions, Dispatch, HttpContext};
use freshet_loop::{DataVerdict, EventLoop, Socket, SocketEvents};

fn http_context() -> (EventLoop, HttpContext) {
    let event_loop = EventLoop::new().unwrap();
    let context = HttpContext::create(&event_loop, ContextOptions::default());
    (event_loop, context)
}

#[test]
fn simple_get_keep_alive_pipelined() {
    let (event_loop, context) = http_context();
    context.on_http("GET", "/hello", |res, _req| {
        res.end(b"ok");
        Dispatch::Handled
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();

    peer.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\nGET /hello HTTP/1.1\r\nHost: x\r\n\r\n");

    let expected = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok\
                     HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    assert_eq!(peer.take_written(), expected.to_vec());
    assert!(!peer.is_closed());
    // keep-alive leaves the idle timer armed between requests
    assert!(peer.timer_armed());
}

#[test]
fn parameter_routing_populates_positional_params() {
    let (event_loop, context) = http_context();
    context.on_http("GET", "/:a/:b", |res, req| {
        assert_eq!(req.parameter(0), Some("x"));
        assert_eq!(req.parameter(1), Some("y"));
        assert_eq!(req.parameter(2), None);
        res.end(req.url().as_bytes());
        Dispatch::Handled
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();

    peer.send(b"GET /x/y HTTP/1.1\r\n\r\n");

    assert_eq!(
        peer.take_written(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\n/x/y".to_vec()
    );
}

#[test]
fn unknown_route_closes_without_response_bytes() {
    let (event_loop, context) = http_context();
    context.on_http("GET", "/known", |res, _req| {
        res.end(b"ok");
        Dispatch::Handled
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();

    peer.send(b"GET /nope HTTP/1.1\r\n\r\n");

    assert!(peer.is_closed());
    assert!(peer.take_written().is_empty());
}

#[test]
fn slow_loris_is_evicted_without_invoking_handlers() {
    let (event_loop, context) = http_context();
    let invoked = Rc::new(Cell::new(false));
    context.on_http("GET", "/h", {
        let invoked = invoked.clone();
        move |res, _req| {
            invoked.set(true);
            res.end(b"ok");
            Dispatch::Handled
        }
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();

    peer.send(b"GET /h");

    assert!(peer.timer_armed());
    assert!(peer.expire_timer());
    assert!(peer.is_closed());
    assert!(!invoked.get());
    assert!(peer.take_written().is_empty());
}

#[test]
fn abort_fires_exactly_once_on_peer_reset() {
    let (event_loop, context) = http_context();
    let aborted = Rc::new(Cell::new(0u32));
    context.on_http("GET", "/stream", {
        let aborted = aborted.clone();
        move |res, _req| {
            let aborted = aborted.clone();
            res.on_aborted(move || aborted.set(aborted.get() + 1));
            res.write(b"partial");
            Dispatch::Handled
        }
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();

    peer.send(b"GET /stream HTTP/1.1\r\n\r\n");
    let written = peer.take_written();
    assert!(written.ends_with(b"partial"));

    peer.reset();
    assert_eq!(aborted.get(), 1);
    // a second teardown must not re-fire it
    peer.reset();
    assert_eq!(aborted.get(), 1);
    assert!(peer.is_closed());
}

#[test]
fn abort_never_fires_after_a_completed_response() {
    let (event_loop, context) = http_context();
    let aborted = Rc::new(Cell::new(0u32));
    context.on_http("GET", "/done", {
        let aborted = aborted.clone();
        move |res, _req| {
            let aborted = aborted.clone();
            res.on_aborted(move || aborted.set(aborted.get() + 1));
            res.end(b"done");
            Dispatch::Handled
        }
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();

    peer.send(b"GET /done HTTP/1.1\r\n\r\n");
    peer.reset();

    assert_eq!(aborted.get(), 0);
}

/// Stand-in for the WebSocket framing layer: records raw bytes it is
/// handed after adoption.
struct WsLayer {
    received: RefCell<Vec<u8>>,
    closed: Cell<u32>,
}

impl SocketEvents for WsLayer {
    fn on_open(&self, _socket: &Socket) {}

    fn on_data(&self, _socket: &Socket, data: &[u8]) -> DataVerdict {
        self.received.borrow_mut().extend_from_slice(data);
        DataVerdict::Keep
    }

    fn on_writable(&self, socket: &Socket) {
        let _ = socket.drain();
    }

    fn on_end(&self, socket: &Socket) {
        socket.close();
    }

    fn on_timeout(&self, socket: &Socket) {
        socket.close();
    }

    fn on_close(&self, _socket: &Socket) {
        self.closed.set(self.closed.get() + 1);
    }
}

#[test]
fn upgrade_hands_the_socket_to_the_websocket_layer() {
    let (event_loop, context) = http_context();
    let ws_layer = Rc::new(WsLayer {
        received: RefCell::new(Vec::new()),
        closed: Cell::new(0),
    });
    let ws_ctx = event_loop.add_context(ws_layer.clone());

    let http_minus = Rc::new(Cell::new(0u32));
    context.filter({
        let http_minus = http_minus.clone();
        move |_res, delta| {
            if delta < 0 {
                http_minus.set(http_minus.get() + 1);
            }
        }
    });

    context.on_http("GET", "/ws", {
        let event_loop = event_loop.clone();
        let context = context.clone();
        move |res, req| {
            let key = upgrade::upgrade_request_key(req).unwrap();
            let ws_socket = event_loop.adopt_socket(res.socket(), ws_ctx, ());
            ws_socket.write(&upgrade::switching_protocols_response(&key), false);
            context.upgrade_to_websocket(ws_socket);
            Dispatch::Handled
        }
    });

    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(
        b"GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
          Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
    );

    let written = peer.take_written();
    let head = String::from_utf8(written).unwrap();
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

    // bytes after the handshake bypass the HTTP parser entirely
    peer.send(b"\x81\x05hello");
    assert_eq!(ws_layer.received.borrow().as_slice(), b"\x81\x05hello");

    // the close belongs to the websocket context, not the HTTP filters
    peer.reset();
    assert_eq!(ws_layer.closed.get(), 1);
    assert_eq!(http_minus.get(), 0);
}

#[test]
fn filters_observe_connect_and_disconnect_exactly_once() {
    let (event_loop, context) = http_context();
    let log = Rc::new(RefCell::new(Vec::new()));
    context.filter({
        let log = log.clone();
        move |_res, delta| log.borrow_mut().push(delta)
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    assert_eq!(*log.borrow(), [1]);
    peer.half_close();
    assert_eq!(*log.borrow(), [1, -1]);
    peer.reset();
    assert_eq!(*log.borrow(), [1, -1]);
}

#[test]
fn use_handlers_run_before_routing_in_insertion_order() {
    let (event_loop, context) = http_context();
    let order = Rc::new(RefCell::new(Vec::new()));
    for name in ["first", "second"] {
        let order = order.clone();
        context.use_handler(move |_res, _req| order.borrow_mut().push(name));
    }
    context.on_http("GET", "/", {
        let order = order.clone();
        move |res, _req| {
            order.borrow_mut().push("handler");
            res.end(b"ok");
            Dispatch::Handled
        }
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(b"GET / HTTP/1.1\r\n\r\n");
    assert_eq!(*order.borrow(), ["first", "second", "handler"]);
}

#[test]
fn pipelined_requests_are_answered_in_arrival_order() {
    let (event_loop, context) = http_context();
    let order = Rc::new(RefCell::new(Vec::new()));
    for route in ["/a", "/b"] {
        let order = order.clone();
        context.on_http("GET", route, move |res, req| {
            order.borrow_mut().push(req.url().to_string());
            res.end(req.url().as_bytes());
            Dispatch::Handled
        });
    }
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");
    assert_eq!(*order.borrow(), ["/a", "/b"]);
    let written = String::from_utf8(peer.take_written()).unwrap();
    let a = written.find("/a").unwrap();
    let b = written.find("/b").unwrap();
    assert!(a < b);
}

#[test]
fn pipelined_head_before_response_completes_closes_the_socket() {
    let (event_loop, context) = http_context();
    let aborted = Rc::new(Cell::new(0u32));
    context.on_http("GET", "/first", {
        let aborted = aborted.clone();
        move |res, _req| {
            let aborted = aborted.clone();
            res.on_aborted(move || aborted.set(aborted.get() + 1));
            Dispatch::Handled
        }
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(b"GET /first HTTP/1.1\r\n\r\nGET /first HTTP/1.1\r\n\r\n");
    assert!(peer.is_closed());
    // the pending request was broken by the forced close
    assert_eq!(aborted.get(), 1);
}

#[test]
fn request_body_streams_through_on_data() {
    let (event_loop, context) = http_context();
    let body = Rc::new(RefCell::new(Vec::new()));
    context.on_http("POST", "/up", {
        let body = body.clone();
        move |res, _req| {
            let body = body.clone();
            let res_done = res.clone();
            res.on_data(move |chunk, is_final| {
                body.borrow_mut().extend_from_slice(chunk);
                if is_final {
                    res_done.end(b"got");
                }
            });
            res.on_aborted(|| {});
            Dispatch::Handled
        }
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();

    peer.send(b"POST /up HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello");
    // mid-body: upload is bounded by the re-armed idle timer
    assert!(peer.timer_armed());
    assert!(peer.take_written().is_empty());

    peer.send(b" world");
    assert_eq!(body.borrow().as_slice(), b"hello world");
    assert_eq!(
        peer.take_written(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\ngot".to_vec()
    );
}

#[test]
fn chunked_request_body_is_decoded_for_on_data() {
    let (event_loop, context) = http_context();
    let body = Rc::new(RefCell::new(Vec::new()));
    context.on_http("POST", "/up", {
        let body = body.clone();
        move |res, _req| {
            let body = body.clone();
            let res_done = res.clone();
            res.on_data(move |chunk, is_final| {
                body.borrow_mut().extend_from_slice(chunk);
                if is_final {
                    res_done.end(b"ok");
                }
            });
            res.on_aborted(|| {});
            Dispatch::Handled
        }
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n");
    assert_eq!(body.borrow().as_slice(), b"Wikipedia");
    assert!(String::from_utf8(peer.take_written())
        .unwrap()
        .ends_with("ok"));
}

#[test]
fn connection_close_is_honoured_after_the_response() {
    let (event_loop, context) = http_context();
    context.on_http("GET", "/bye", |res, _req| {
        res.end(b"bye");
        Dispatch::Handled
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(b"GET /bye HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert_eq!(
        peer.take_written(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nbye".to_vec()
    );
    assert!(peer.is_closed());
}

#[test]
fn http10_defaults_to_close() {
    let (event_loop, context) = http_context();
    context.on_http("GET", "/old", |res, _req| {
        res.end(b"ok");
        Dispatch::Handled
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(b"GET /old HTTP/1.0\r\n\r\n");
    assert!(peer.is_closed());
    assert!(peer.take_written().ends_with(b"ok"));
}

#[test]
fn malformed_request_closes_the_socket() {
    let (event_loop, context) = http_context();
    context.on_http("GET", "/", |res, _req| {
        res.end(b"ok");
        Dispatch::Handled
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(b"NOT HTTP AT ALL\r\n\r\n");
    assert!(peer.is_closed());
    assert!(peer.take_written().is_empty());
}

#[test]
fn backpressured_response_drains_under_writable_events() {
    let (event_loop, context) = http_context();
    context.on_http("GET", "/big", |res, _req| {
        res.end(b"0123456789012345678901234567890123456789");
        Dispatch::Handled
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.set_write_capacity(8);

    peer.send(b"GET /big HTTP/1.1\r\n\r\n");
    // partial flush at uncork re-arms the idle timer
    assert!(peer.socket().has_pending());
    assert!(peer.timer_armed());

    let mut wire = peer.take_written();
    let mut rounds = 0;
    while peer.socket().has_pending() {
        peer.writable();
        wire.extend_from_slice(&peer.take_written());
        rounds += 1;
        assert!(rounds < 64, "drain did not converge");
    }
    let text = String::from_utf8(wire).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\nContent-Length: 40\r\n\r\n"));
    assert!(text.ends_with("0123456789012345678901234567890123456789"));
}

#[test]
fn try_end_resumes_from_the_write_offset() {
    const BODY: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    let (event_loop, context) = http_context();
    context.on_http("GET", "/slow", |res, _req| {
        let res_drain = res.clone();
        res.on_writable(move |offset| {
            let (ok, _done) = res_drain.try_end(&BODY[offset as usize..], BODY.len() as u64);
            ok
        });
        res.on_aborted(|| {});
        Dispatch::Handled
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.set_write_capacity(10);
    peer.send(b"GET /slow HTTP/1.1\r\n\r\n");

    let mut wire = Vec::new();
    let mut rounds = 0;
    while !wire.ends_with(b"xyz") {
        peer.writable();
        wire.extend_from_slice(&peer.take_written());
        rounds += 1;
        assert!(rounds < 64, "try_end did not converge");
    }
    let text = String::from_utf8(wire).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\nContent-Length: 26\r\n\r\n"));
    assert!(text.ends_with("abcdefghijklmnopqrstuvwxyz"));
}

#[test]
fn successful_drain_callback_rearms_the_idle_timer() {
    let (event_loop, context) = http_context();
    let verdict = Rc::new(Cell::new(true));
    context.on_http("GET", "/drip", {
        let verdict = verdict.clone();
        move |res, _req| {
            let verdict = verdict.clone();
            res.on_writable(move |_offset| verdict.get());
            res.on_aborted(|| {});
            Dispatch::Handled
        }
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(b"GET /drip HTTP/1.1\r\n\r\n");
    // the user owns the time budget while the response is pending
    assert!(!peer.timer_armed());

    // a successful drain callback still gets the zero-byte drain write and
    // the idle timer back, so a stalled peer cannot sit forever
    peer.writable();
    assert!(peer.timer_armed());

    // a failed one skips draining and leaves timing with the user
    verdict.set(false);
    peer.writable();
    assert!(!peer.timer_armed());
}

#[test]
fn yielding_handler_falls_through_to_the_next_route() {
    let (event_loop, context) = http_context();
    context.on_http("GET", "/pick", |_res, req| {
        if req.header("x-take").is_some() {
            unreachable!("guarded by yield below");
        }
        Dispatch::Yielded
    });
    context.on_http("GET", "/pick", |res, _req| {
        res.end(b"fallback");
        Dispatch::Handled
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(b"GET /pick HTTP/1.1\r\n\r\n");
    assert!(peer.take_written().ends_with(b"fallback"));
}

#[test]
fn wildcard_method_routes_as_second_pass() {
    let (event_loop, context) = http_context();
    context.on_http("*", "/*", |res, req| {
        let mut reply = Vec::from(&b"any:"[..]);
        reply.extend_from_slice(req.method().as_bytes());
        res.end(&reply);
        Dispatch::Handled
    });
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(b"DELETE /whatever HTTP/1.1\r\n\r\n");
    assert!(peer.take_written().ends_with(b"any:DELETE"));
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "without responding")]
fn handler_returning_without_responding_is_loud() {
    let (event_loop, context) = http_context();
    context.on_http("GET", "/bad", |_res, _req| Dispatch::Handled);
    let peer = event_loop.open_simulated(context.context_id()).unwrap();
    peer.send(b"GET /bad HTTP/1.1\r\n\r\n");
}
