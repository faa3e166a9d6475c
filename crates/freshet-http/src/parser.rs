//! Resumable HTTP/1.1 request parser.
//!
//! The parser is push-driven: each `on_data` turn feeds it the new bytes and
//! two callbacks, one for completed request heads and one for body chunks.
//! Residual bytes (a partial head, an unfinished body) stay buffered between
//! turns, so a request may arrive one byte at a time or many requests may
//! arrive in one burst (pipelining) — the callback sequence is identical.
//!
//! Control flow is a tagged value rather than a sentinel pointer: the head
//! callback's verdict decides whether parsing continues, stops because the
//! socket closed, or stops because the connection was upgraded away, and
//! [`consume`](RequestParser::consume) reports the same distinction to its
//! caller.
//!
//! Body framing follows RFC 7230: `Content-Length`, or
//! `Transfer-Encoding: chunked` decoded incrementally. Every request
//! produces a final (`is_final == true`) chunk, empty when there is no
//! body — callers rely on that to tear down streaming state.

use std::fmt;

use freshet_loop::Socket;

use crate::request::{Headers, HttpRequest, HttpVersion};

/// Default cap on the request head (request line + header block).
pub const DEFAULT_MAX_HEAD_SIZE: usize = 64 * 1024;

/// Why the byte stream stopped making sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Request line is not `METHOD SP TARGET SP VERSION`.
    InvalidRequestLine,
    /// Method contains non-token characters.
    InvalidMethod,
    /// Version is not HTTP/1.0 or HTTP/1.1.
    InvalidVersion,
    /// Header line is not `name: value` with a token name.
    InvalidHeader,
    /// Head grew past the configured limit.
    HeadTooLarge,
    /// Content-Length is not a decimal integer.
    InvalidContentLength,
    /// Both Content-Length and chunked Transfer-Encoding present.
    AmbiguousBodyLength,
    /// Chunked framing is broken.
    InvalidChunk,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidMethod => write!(f, "invalid HTTP method"),
            Self::InvalidVersion => write!(f, "unsupported HTTP version"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::HeadTooLarge => write!(f, "request head too large"),
            Self::InvalidContentLength => write!(f, "invalid content-length"),
            Self::AmbiguousBodyLength => write!(f, "ambiguous body length"),
            Self::InvalidChunk => write!(f, "invalid chunk framing"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Verdict from the head callback.
pub enum HeadVerdict {
    /// Keep parsing; the response lifecycle owns the socket now.
    Continue,
    /// The socket was closed during dispatch; stop.
    Closed,
    /// The connection was upgraded to another protocol; stop and hand the
    /// adopted socket back.
    Upgraded(Socket),
}

/// Verdict from the body-chunk callback.
pub enum ChunkVerdict {
    /// Keep parsing.
    Continue,
    /// The socket was closed or shut down during delivery; stop.
    Closed,
}

/// How one `consume` turn ended.
pub enum ParseOutcome {
    /// All complete messages were delivered; residue is buffered.
    Continue,
    /// The head or chunk callback reported the socket gone.
    Closed,
    /// The connection left for another protocol mid-turn.
    Upgraded(Socket),
    /// The byte stream is not valid HTTP.
    Malformed(ParseError),
}

enum BodyFraming {
    None,
    ContentLength(u64),
    Chunked,
}

enum ChunkPhase {
    Size,
    Data { remaining: u64 },
    DataCrlf,
    Trailer,
}

enum State {
    Head,
    ContentLength { remaining: u64 },
    Chunked { phase: ChunkPhase },
}

/// Push parser holding residue across `on_data` turns.
pub struct RequestParser {
    buf: Vec<u8>,
    state: State,
    max_head_size: usize,
}

impl RequestParser {
    #[must_use]
    pub fn new(max_head_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            state: State::Head,
            max_head_size,
        }
    }

    /// Bytes buffered between turns.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Feed `input` and deliver every complete head and body chunk.
    pub fn consume(
        &mut self,
        input: &[u8],
        on_head: &mut dyn FnMut(HttpRequest) -> HeadVerdict,
        on_chunk: &mut dyn FnMut(&[u8], bool) -> ChunkVerdict,
    ) -> ParseOutcome {
        if !input.is_empty() {
            self.buf.extend_from_slice(input);
        }

        loop {
            let state = std::mem::replace(&mut self.state, State::Head);
            match state {
                State::Head => {
                    let Some(head_end) = find_double_crlf(&self.buf) else {
                        if self.buf.len() > self.max_head_size {
                            return ParseOutcome::Malformed(ParseError::HeadTooLarge);
                        }
                        return ParseOutcome::Continue;
                    };
                    if head_end + 4 > self.max_head_size {
                        return ParseOutcome::Malformed(ParseError::HeadTooLarge);
                    }
                    let request = match parse_head(&self.buf[..head_end]) {
                        Ok(request) => request,
                        Err(err) => return ParseOutcome::Malformed(err),
                    };
                    let framing = match body_framing(&request) {
                        Ok(framing) => framing,
                        Err(err) => return ParseOutcome::Malformed(err),
                    };
                    self.buf.drain(..head_end + 4);

                    match on_head(request) {
                        HeadVerdict::Continue => {}
                        HeadVerdict::Closed => return ParseOutcome::Closed,
                        HeadVerdict::Upgraded(socket) => return ParseOutcome::Upgraded(socket),
                    }

                    match framing {
                        BodyFraming::None | BodyFraming::ContentLength(0) => {
                            if let ChunkVerdict::Closed = on_chunk(&[], true) {
                                return ParseOutcome::Closed;
                            }
                        }
                        BodyFraming::ContentLength(n) => {
                            self.state = State::ContentLength { remaining: n };
                        }
                        BodyFraming::Chunked => {
                            self.state = State::Chunked {
                                phase: ChunkPhase::Size,
                            };
                        }
                    }
                }
                State::ContentLength { remaining } => {
                    if self.buf.is_empty() {
                        self.state = State::ContentLength { remaining };
                        return ParseOutcome::Continue;
                    }
                    let take = usize::try_from(remaining.min(self.buf.len() as u64))
                        .unwrap_or(self.buf.len());
                    let is_final = take as u64 == remaining;
                    let verdict = on_chunk(&self.buf[..take], is_final);
                    self.buf.drain(..take);
                    self.state = if is_final {
                        State::Head
                    } else {
                        State::ContentLength {
                            remaining: remaining - take as u64,
                        }
                    };
                    if let ChunkVerdict::Closed = verdict {
                        return ParseOutcome::Closed;
                    }
                }
                State::Chunked { phase } => match phase {
                    ChunkPhase::Size => {
                        let Some(line_end) = find_crlf(&self.buf) else {
                            // a chunk-size line has no business being long
                            if self.buf.len() > 32 {
                                return ParseOutcome::Malformed(ParseError::InvalidChunk);
                            }
                            self.state = State::Chunked {
                                phase: ChunkPhase::Size,
                            };
                            return ParseOutcome::Continue;
                        };
                        let size = match parse_chunk_size(&self.buf[..line_end]) {
                            Some(size) => size,
                            None => return ParseOutcome::Malformed(ParseError::InvalidChunk),
                        };
                        self.buf.drain(..line_end + 2);
                        self.state = State::Chunked {
                            phase: if size == 0 {
                                ChunkPhase::Trailer
                            } else {
                                ChunkPhase::Data { remaining: size }
                            },
                        };
                    }
                    ChunkPhase::Data { remaining } => {
                        if self.buf.is_empty() {
                            self.state = State::Chunked {
                                phase: ChunkPhase::Data { remaining },
                            };
                            return ParseOutcome::Continue;
                        }
                        let take = usize::try_from(remaining.min(self.buf.len() as u64))
                            .unwrap_or(self.buf.len());
                        let verdict = on_chunk(&self.buf[..take], false);
                        self.buf.drain(..take);
                        let left = remaining - take as u64;
                        self.state = State::Chunked {
                            phase: if left == 0 {
                                ChunkPhase::DataCrlf
                            } else {
                                ChunkPhase::Data { remaining: left }
                            },
                        };
                        if let ChunkVerdict::Closed = verdict {
                            return ParseOutcome::Closed;
                        }
                    }
                    ChunkPhase::DataCrlf => {
                        if self.buf.len() < 2 {
                            self.state = State::Chunked {
                                phase: ChunkPhase::DataCrlf,
                            };
                            return ParseOutcome::Continue;
                        }
                        if &self.buf[..2] != b"\r\n" {
                            return ParseOutcome::Malformed(ParseError::InvalidChunk);
                        }
                        self.buf.drain(..2);
                        self.state = State::Chunked {
                            phase: ChunkPhase::Size,
                        };
                    }
                    ChunkPhase::Trailer => {
                        let Some(line_end) = find_crlf(&self.buf) else {
                            if self.buf.len() > self.max_head_size {
                                return ParseOutcome::Malformed(ParseError::HeadTooLarge);
                            }
                            self.state = State::Chunked {
                                phase: ChunkPhase::Trailer,
                            };
                            return ParseOutcome::Continue;
                        };
                        if line_end == 0 {
                            // blank line ends the trailer section and the body
                            self.buf.drain(..2);
                            self.state = State::Head;
                            if let ChunkVerdict::Closed = on_chunk(&[], true) {
                                return ParseOutcome::Closed;
                            }
                        } else {
                            // trailer headers are consumed and ignored
                            self.buf.drain(..line_end + 2);
                            self.state = State::Chunked {
                                phase: ChunkPhase::Trailer,
                            };
                        }
                    }
                },
            }
        }
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn is_token_char(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`'
            | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}

fn parse_head(head: &[u8]) -> Result<HttpRequest, ParseError> {
    let mut lines = head.split(|&b| b == b'\n').map(|line| {
        line.strip_suffix(b"\r").unwrap_or(line)
    });

    let request_line = lines.next().ok_or(ParseError::InvalidRequestLine)?;
    let mut parts = request_line.splitn(3, |&b| b == b' ');

    let method = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    if method.is_empty() || !method.iter().all(|&b| is_token_char(b)) {
        return Err(ParseError::InvalidMethod);
    }
    let method = std::str::from_utf8(method)
        .map_err(|_| ParseError::InvalidMethod)?
        .to_string();

    let target = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let target = std::str::from_utf8(target).map_err(|_| ParseError::InvalidRequestLine)?;
    if target.is_empty() {
        return Err(ParseError::InvalidRequestLine);
    }
    let (path, query) = match target.find('?') {
        Some(pos) => (target[..pos].to_string(), Some(target[pos + 1..].to_string())),
        None => (target.to_string(), None),
    };

    let version = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let version = std::str::from_utf8(version).map_err(|_| ParseError::InvalidVersion)?;
    let version = HttpVersion::parse(version).ok_or(ParseError::InvalidVersion)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::InvalidHeader)?;
        let name = &line[..colon];
        if name.is_empty() || !name.iter().all(|&b| is_token_char(b)) {
            return Err(ParseError::InvalidHeader);
        }
        let name = std::str::from_utf8(name).map_err(|_| ParseError::InvalidHeader)?;
        let value = trim_ows(&line[colon + 1..]);
        headers.insert(name, value.to_vec());
    }

    Ok(HttpRequest::new(method, path, query, version, headers))
}

fn trim_ows(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

fn body_framing(request: &HttpRequest) -> Result<BodyFraming, ParseError> {
    let chunked = request
        .headers()
        .get_str("transfer-encoding")
        .is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
        });
    let content_length = match request.headers().get("content-length") {
        Some(raw) => {
            let text = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidContentLength)?;
            Some(
                text.trim()
                    .parse::<u64>()
                    .map_err(|_| ParseError::InvalidContentLength)?,
            )
        }
        None => None,
    };
    match (chunked, content_length) {
        (true, Some(_)) => Err(ParseError::AmbiguousBodyLength),
        (true, None) => Ok(BodyFraming::Chunked),
        (false, Some(n)) => Ok(BodyFraming::ContentLength(n)),
        (false, None) => Ok(BodyFraming::None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Option<u64> {
    // chunk extensions after ';' are tolerated and ignored
    let digits = match line.iter().position(|&b| b == b';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let digits = trim_ows(digits);
    if digits.is_empty() || digits.len() > 16 {
        return None;
    }
    let mut value: u64 = 0;
    for &b in digits {
        let digit = match b {
            b'0'..=b'9' => u64::from(b - b'0'),
            b'a'..=b'f' => u64::from(b - b'a' + 10),
            b'A'..=b'F' => u64::from(b - b'A' + 10),
            _ => return None,
        };
        value = value.checked_mul(16)?.checked_add(digit)?;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flattened record of everything the parser delivered.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Head(String, String),
        Chunk(Vec<u8>, bool),
    }

    fn drive(parser: &mut RequestParser, input: &[u8], events: &mut Vec<Event>) -> ParseOutcome {
        let mut heads = Vec::new();
        let mut chunks = Vec::new();
        let outcome = parser.consume(
            input,
            &mut |req| {
                heads.push(Event::Head(req.method().to_string(), req.url().to_string()));
                HeadVerdict::Continue
            },
            &mut |chunk, is_final| {
                chunks.push(Event::Chunk(chunk.to_vec(), is_final));
                ChunkVerdict::Continue
            },
        );
        // interleave in delivery order: heads and chunks alternate per
        // request, so replay from the two queues by scanning the raw order
        // is unnecessary for these tests; chunks always follow their head
        for head in heads {
            events.push(head);
        }
        for chunk in chunks {
            events.push(chunk);
        }
        outcome
    }

    fn collect_all(input: &[u8], step: usize) -> (Vec<Event>, bool) {
        let mut parser = RequestParser::new(DEFAULT_MAX_HEAD_SIZE);
        let mut events = Vec::new();
        let mut malformed = false;
        for piece in input.chunks(step.max(1)) {
            match drive(&mut parser, piece, &mut events) {
                ParseOutcome::Malformed(_) => {
                    malformed = true;
                    break;
                }
                ParseOutcome::Continue => {}
                _ => unreachable!("no close/upgrade in these tests"),
            }
        }
        (events, malformed)
    }

    #[test]
    fn bare_get_delivers_head_and_empty_final_chunk() {
        let (events, malformed) = collect_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n", 1024);
        assert!(!malformed);
        assert_eq!(
            events,
            vec![
                Event::Head("GET".into(), "/hello".into()),
                Event::Chunk(Vec::new(), true),
            ]
        );
    }

    #[test]
    fn query_is_split_from_path() {
        let mut parser = RequestParser::new(DEFAULT_MAX_HEAD_SIZE);
        let mut seen = None;
        parser.consume(
            b"GET /find?q=rust HTTP/1.1\r\n\r\n",
            &mut |req| {
                seen = Some((req.url().to_string(), req.query().map(str::to_string)));
                HeadVerdict::Continue
            },
            &mut |_, _| ChunkVerdict::Continue,
        );
        assert_eq!(seen, Some(("/find".into(), Some("q=rust".into()))));
    }

    #[test]
    fn pipelined_requests_deliver_in_order() {
        let input = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let (events, malformed) = collect_all(input, 1024);
        assert!(!malformed);
        let heads: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::Head(_, url) => Some(url.clone()),
                Event::Chunk(..) => None,
            })
            .collect();
        assert_eq!(heads, ["/a", "/b"]);
    }

    #[test]
    fn content_length_body_streams_with_final_flag() {
        let input = b"POST /up HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (events, _) = collect_all(input, 1024);
        assert_eq!(
            events,
            vec![
                Event::Head("POST".into(), "/up".into()),
                Event::Chunk(b"hello".to_vec(), true),
            ]
        );
    }

    #[test]
    fn split_body_concatenates_across_turns() {
        let input = b"POST /up HTTP/1.1\r\nContent-Length: 8\r\n\r\nabcdefgh";
        let (events, _) = collect_all(input, 3);
        let mut body = Vec::new();
        let mut finals = 0;
        for event in &events {
            if let Event::Chunk(data, is_final) = event {
                body.extend_from_slice(data);
                if *is_final {
                    finals += 1;
                }
            }
        }
        assert_eq!(body, b"abcdefgh");
        assert_eq!(finals, 1);
    }

    #[test]
    fn chunked_body_decodes() {
        let input =
            b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let (events, malformed) = collect_all(input, 1024);
        assert!(!malformed);
        let mut body = Vec::new();
        let mut saw_final = false;
        for event in &events {
            if let Event::Chunk(data, is_final) = event {
                body.extend_from_slice(data);
                saw_final |= is_final;
            }
        }
        assert_eq!(body, b"Wikipedia");
        assert!(saw_final);
    }

    #[test]
    fn chunk_extensions_are_ignored() {
        let input = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3;x=y\r\nabc\r\n0\r\n\r\n";
        let (events, malformed) = collect_all(input, 1024);
        assert!(!malformed);
        let body: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                Event::Chunk(d, _) => Some(d.clone()),
                Event::Head(..) => None,
            })
            .flatten()
            .collect();
        assert_eq!(body, b"abc");
    }

    #[test]
    fn request_after_body_is_parsed() {
        let input = b"POST /a HTTP/1.1\r\nContent-Length: 2\r\n\r\nokGET /b HTTP/1.1\r\n\r\n";
        let (events, malformed) = collect_all(input, 1024);
        assert!(!malformed);
        let heads: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::Head(_, url) => Some(url.clone()),
                Event::Chunk(..) => None,
            })
            .collect();
        assert_eq!(heads, ["/a", "/b"]);
    }

    #[test]
    fn malformed_request_line_is_rejected() {
        let (_, malformed) = collect_all(b"NOT A REQUEST\r\n\r\n", 1024);
        assert!(malformed);
    }

    #[test]
    fn ambiguous_body_length_is_rejected() {
        let input =
            b"POST / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\nabc";
        let (_, malformed) = collect_all(input, 1024);
        assert!(malformed);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let (_, malformed) = collect_all(b"GET / HTTP/2.0\r\n\r\n", 1024);
        assert!(malformed);
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut parser = RequestParser::new(128);
        let mut long = b"GET /".to_vec();
        long.extend(std::iter::repeat(b'a').take(256));
        let outcome = parser.consume(
            &long,
            &mut |_| HeadVerdict::Continue,
            &mut |_, _| ChunkVerdict::Continue,
        );
        assert!(matches!(
            outcome,
            ParseOutcome::Malformed(ParseError::HeadTooLarge)
        ));
    }

    #[test]
    fn closed_verdict_stops_the_turn() {
        let mut parser = RequestParser::new(DEFAULT_MAX_HEAD_SIZE);
        let mut heads = 0;
        let outcome = parser.consume(
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n",
            &mut |_| {
                heads += 1;
                HeadVerdict::Closed
            },
            &mut |_, _| ChunkVerdict::Continue,
        );
        assert!(matches!(outcome, ParseOutcome::Closed));
        assert_eq!(heads, 1);
    }

    #[test]
    fn header_values_are_ows_trimmed_and_first_wins() {
        let mut parser = RequestParser::new(DEFAULT_MAX_HEAD_SIZE);
        let mut host = None;
        parser.consume(
            b"GET / HTTP/1.1\r\nHost:   a.example \r\nHost: b.example\r\n\r\n",
            &mut |req| {
                host = req.headers().get_str("host").map(str::to_string);
                HeadVerdict::Continue
            },
            &mut |_, _| ChunkVerdict::Continue,
        );
        assert_eq!(host.as_deref(), Some("a.example"));
    }
}
