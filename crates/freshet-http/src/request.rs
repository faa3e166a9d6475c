//! HTTP request view types.
//!
//! A [`HttpRequest`] is valid only for the synchronous handler call it is
//! delivered to; nothing here outlives the `on_data` turn that parsed it.

use std::collections::HashMap;
use std::fmt;

use freshet_router::Params;

/// HTTP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpVersion {
    /// HTTP/1.0
    Http10,
    /// HTTP/1.1 (default)
    #[default]
    Http11,
}

impl HttpVersion {
    /// Parse an HTTP version token.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Self::Http10),
            "HTTP/1.1" => Some(Self::Http11),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive header collection, first value wins.
#[derive(Debug, Default)]
pub struct Headers {
    inner: HashMap<String, Vec<u8>>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a header value by name (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    /// Get a header value as UTF-8, when it is.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Insert a header; repeated names keep the first value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.inner
            .entry(name.into().to_ascii_lowercase())
            .or_insert_with(|| value.into());
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterate all headers as (name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.inner
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Ephemeral view over one parsed request.
#[derive(Debug)]
pub struct HttpRequest {
    method: String,
    path: String,
    query: Option<String>,
    version: HttpVersion,
    headers: Headers,
    params: Params,
}

impl HttpRequest {
    pub(crate) fn new(
        method: String,
        path: String,
        query: Option<String>,
        version: HttpVersion,
        headers: Headers,
    ) -> Self {
        Self {
            method,
            path,
            query,
            version,
            headers,
            params: Params::default(),
        }
    }

    /// The request method, uppercase as received (`GET`, `POST`, ...).
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request path, without the query string.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.path
    }

    /// The query string after `?`, if any.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    #[must_use]
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// Header lookup, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.get(name)
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// URL parameter captured by the matched pattern, by position.
    #[must_use]
    pub fn parameter(&self, index: usize) -> Option<&str> {
        self.params.get(index)
    }

    pub(crate) fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    /// Whether the connection outlives this exchange.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close`;
    /// HTTP/1.0 defaults to close unless `Connection: keep-alive`.
    /// `close` wins when both tokens appear.
    #[must_use]
    pub fn is_keep_alive(&self) -> bool {
        let mut keep = matches!(self.version, HttpVersion::Http11);
        if let Some(value) = self.headers.get_str("connection") {
            for token in value.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("close") {
                    return false;
                }
                if token.eq_ignore_ascii_case("keep-alive") {
                    keep = true;
                }
            }
        }
        keep
    }
}
