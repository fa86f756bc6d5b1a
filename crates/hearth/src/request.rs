use std::fmt;

use crate::{Constraints, HeaderMap};

/// Parse progress of a request. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    GotNothing,
    GotLine,
    GotHeaders,
    GotAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// Match a request line method token, exactly and case-sensitively.
    pub fn from_token(token: &[u8]) -> Option<Self> {
        let method = match token {
            b"GET" => Method::Get,
            b"HEAD" => Method::Head,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"CONNECT" => Method::Connect,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"PATCH" => Method::Patch,
            _ => return None,
        };

        Some(method)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }

    /// Whether requests with this method may carry a body.
    pub fn has_body(self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }

    /// Whether HTTP/1.0 requests may use this method.
    pub fn allowed_in_http10(self) -> bool {
        matches!(self, Method::Get | Method::Head | Method::Post)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"HTTP/1.0" => Some(Version::Http10),
            b"HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the end of a request body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyTermination {
    /// No body.
    None,
    /// Body of exactly this many bytes.
    Length(usize),
    /// Body in chunked transfer coding.
    Chunked,
}

/// Position inside a chunked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Chunk {
    /// Expecting a chunk-size line.
    Size,
    /// This many data bytes of the current chunk are still to come.
    Data(usize),
    /// Chunk data complete, expecting its CRLF.
    DataEnd,
}

/// An HTTP request, filled in incrementally by [`crate::parse`].
pub struct Request {
    pub(crate) state: State,
    pub(crate) method: Method,
    pub(crate) uri: String,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) header_lines: usize,
    pub(crate) body_termination: BodyTermination,
    pub(crate) termination_overridden: bool,
    pub(crate) chunk: Chunk,
    pub(crate) body: Vec<u8>,
}

impl Request {
    pub fn new(constraints: &Constraints) -> Self {
        Self {
            state: State::GotNothing,
            method: Method::Get,
            uri: String::with_capacity(constraints.max_uri_len),
            version: Version::Http11,
            headers: HeaderMap::new(),
            header_lines: 0,
            body_termination: BodyTermination::None,
            termination_overridden: false,
            chunk: Chunk::Size,
            body: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::GotAll
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_termination(&self) -> BodyTermination {
        self.body_termination
    }

    /// Override how the body is delimited.
    ///
    /// Only has an effect before any of the body is parsed. Once set, the parser no longer
    /// derives the termination from `Content-Length` and `Transfer-Encoding`.
    pub fn set_body_termination(&mut self, termination: BodyTermination) {
        let body_started = !self.body.is_empty() || self.chunk != Chunk::Size;
        if self.state > State::GotHeaders || body_started {
            return;
        }

        self.body_termination = termination;
        self.termination_overridden = true;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether the client expects the connection to be closed after this request.
    pub fn wants_close(&self) -> bool {
        let close = self.headers.get("Connection").map_or(false, |values| {
            values
                .iter()
                .flat_map(|value| value.split(','))
                .any(|option| option.trim().eq_ignore_ascii_case("close"))
        });

        close || self.version == Version::Http10
    }

    /// Clear the request for the next one on the same connection.
    ///
    /// Header storage and buffers are kept for reuse.
    pub fn reset(&mut self) {
        self.state = State::GotNothing;
        self.method = Method::Get;
        self.uri.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.header_lines = 0;
        self.body_termination = BodyTermination::None;
        self.termination_overridden = false;
        self.chunk = Chunk::Size;
        self.body.clear();
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("state", &self.state)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body_termination", &self.body_termination)
            .field("body_len", &self.body.len())
            .finish()
    }
}
