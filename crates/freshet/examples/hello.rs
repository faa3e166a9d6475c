//! Minimal routed server: parameters, method routing, catch-all.
//!
//! Run with `cargo run --example hello`, then try:
//!
//! ```text
//! curl http://127.0.0.1:3000/hello
//! curl -X POST http://127.0.0.1:3000/hello
//! curl http://127.0.0.1:3000/a/b
//! curl http://127.0.0.1:3000/anything/else/at/all
//! ```

use freshet::prelude::*;

fn main() -> std::io::Result<()> {
    env_logger::init();

    App::new()?
        .get("/:param1/:param2", |res, req| {
            res.write(b"GET /:param1/:param2 = ");
            res.end(req.url().as_bytes());
            Dispatch::Handled
        })
        .post("/hello", |res, _req| {
            res.end(b"POST /hello");
            Dispatch::Handled
        })
        .get("/hello", |res, _req| {
            res.end(b"GET /hello");
            Dispatch::Handled
        })
        .any("/*", |res, _req| {
            res.end(b"Here's nothing for you to see!");
            Dispatch::Handled
        })
        .listen("127.0.0.1", 3000)?
        .run()
}
