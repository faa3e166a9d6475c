//! Streaming upload echo: collects the request body chunk by chunk, then
//! answers with it. Shows the respond-or-register-abort contract for
//! handlers that finish asynchronously.
//!
//! ```text
//! curl --data-binary @some-file http://127.0.0.1:3000/echo
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use freshet::prelude::*;

fn main() -> std::io::Result<()> {
    env_logger::init();

    App::new()?
        .post("/echo", |res, _req| {
            let collected = Rc::new(RefCell::new(Vec::new()));
            let res_done = res.clone();
            res.on_data(move |chunk, is_final| {
                collected.borrow_mut().extend_from_slice(chunk);
                if is_final {
                    res_done.end(&collected.borrow());
                }
            });
            res.on_aborted(|| log::debug!("upload aborted by the peer"));
            Dispatch::Handled
        })
        .listen("127.0.0.1", 3000)?
        .run()
}
