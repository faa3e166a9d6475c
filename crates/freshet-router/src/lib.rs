//! Method + URL-pattern router.
//!
//! Patterns are slash-separated segments of three kinds:
//!
//! - literal (`/hello`) — must match exactly
//! - parameter (`/:name`) — captures one segment, in pattern order
//! - trailing wildcard (`/*`) — matches any remainder, including none
//!
//! Routes are tried in registration order. A handler may decline a request
//! it structurally matched by returning [`Dispatch::Yielded`]; the scan then
//! resumes with the next matching route. That keeps "can I handle this?"
//! decisions (header inspection, content negotiation) inside handlers
//! without pre-filtering machinery.
//!
//! The router stores no HTTP types: handlers receive a caller-supplied
//! user value `U` plus the captured [`Params`].

#![deny(unsafe_code)]

/// What a handler did with a matched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The handler took the request; matching stops.
    Handled,
    /// The handler declined; matching resumes with later routes.
    Yielded,
}

/// Positional parameter captures, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: Vec<String>,
}

impl Params {
    /// The capture at `index`, counting `:name` segments left to right.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }
}

enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

type Handler<U> = Box<dyn FnMut(&mut U, &Params) -> Dispatch>;

struct Route<U> {
    method: String,
    segments: Vec<Segment>,
    handler: Handler<U>,
}

/// Registration-order router generic over the per-dispatch user value.
pub struct HttpRouter<U> {
    routes: Vec<Route<U>>,
}

impl<U> Default for HttpRouter<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> HttpRouter<U> {
    #[must_use]
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register `handler` for `method` (uppercased; `"*"` matches only when
    /// routed with `"*"`) and `pattern`.
    pub fn add(
        &mut self,
        method: &str,
        pattern: &str,
        handler: impl FnMut(&mut U, &Params) -> Dispatch + 'static,
    ) {
        self.routes.push(Route {
            method: method.to_ascii_uppercase(),
            segments: parse_pattern(pattern),
            handler: Box::new(handler),
        });
    }

    /// Try routes registered for exactly `method` against `url`, in
    /// registration order, until one handles the request.
    ///
    /// Returns whether any handler took it.
    pub fn route(&mut self, method: &str, url: &str, user: &mut U) -> bool {
        for route in &mut self.routes {
            if !route.method.eq_ignore_ascii_case(method) {
                continue;
            }
            let Some(params) = match_segments(&route.segments, url) else {
                continue;
            };
            match (route.handler)(user, &params) {
                Dispatch::Handled => return true,
                Dispatch::Yielded => {}
            }
        }
        false
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s == "*" {
                Segment::Wildcard
            } else if let Some(name) = s.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(s.to_string())
            }
        })
        .collect()
}

fn match_segments(segments: &[Segment], url: &str) -> Option<Params> {
    let mut parts = url.split('/').filter(|s| !s.is_empty());
    let mut values = Vec::new();
    for segment in segments {
        match segment {
            Segment::Wildcard => return Some(Params { values }),
            Segment::Literal(lit) => {
                if parts.next()? != lit {
                    return None;
                }
            }
            Segment::Param(_) => {
                values.push(parts.next()?.to_string());
            }
        }
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Params { values })
}
