use thiserror::Error;
use tracing::{event, Level};

use crate::{
    request::Chunk, BodyTermination, Constraints, HeaderError, HeaderMap, Method, RecvBuffer,
    Request, State, Version,
};

/// Longest accepted chunk-size, in hex digits.
const MAX_CHUNK_DIGITS: usize = 7;

/// Request could not be parsed, the request is not recoverable.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("request line is malformed")]
    MalformedLine,
    #[error("unknown method")]
    UnknownMethod,
    #[error("request target must be an absolute path")]
    InvalidUri,
    #[error("request target contains '..'")]
    UriTraversal,
    #[error("request target longer than {max} bytes")]
    UriTooLong { max: usize },
    #[error("unsupported HTTP version")]
    UnsupportedVersion,
    #[error("method {0} not allowed in HTTP/1.0")]
    MethodNotAllowed(Method),
    #[error("header line is malformed")]
    MalformedHeader,
    #[error("more than {max} headers")]
    TooManyHeaders { max: usize },
    #[error("header longer than {max} bytes")]
    HeaderTooLong { max: usize },
    #[error("invalid content-length")]
    InvalidContentLength,
    #[error("unsupported transfer-encoding")]
    UnsupportedTransferEncoding,
    #[error("body of {len} bytes is not below the limit of {max}")]
    BodyTooLong { len: usize, max: usize },
    #[error("chunk size line is malformed")]
    MalformedChunkSize,
    #[error("chunk data not followed by CRLF")]
    MalformedChunkEnd,
    #[error("receive buffer full without a complete line")]
    BufferFull,
    #[error("failed to store header")]
    Header(#[from] HeaderError),
}

impl ParseError {
    /// Whether the end of the rejected request can no longer be found.
    ///
    /// Past a body framing error, or a line too long to buffer, whatever follows on the stream is
    /// the rest of the rejected request and can't be parsed as a new one.
    pub fn loses_framing(&self) -> bool {
        matches!(
            self,
            ParseError::InvalidContentLength
                | ParseError::UnsupportedTransferEncoding
                | ParseError::BodyTooLong { .. }
                | ParseError::MalformedChunkSize
                | ParseError::MalformedChunkEnd
                | ParseError::BufferFull
        )
    }
}

/// Parse as much of `buffer` into `request` as is available.
///
/// Can be called again as more data arrives, parsing continues where it left off. Consumed bytes
/// are removed from `buffer`, anything not yet parseable (an incomplete line, or bytes past the
/// end of this request) is left at its start.
///
/// Returning `Ok` doesn't mean the request is complete, check [`Request::is_complete`].
pub fn parse(
    request: &mut Request,
    buffer: &mut RecvBuffer,
    constraints: &Constraints,
) -> Result<(), ParseError> {
    let start = request.state;

    let mut consumed = 0;
    let result = parse_input(request, buffer.filled(), &mut consumed, constraints);
    buffer.consume(consumed);

    event!(
        Level::TRACE,
        ?start,
        state = ?request.state,
        consumed,
        leftover = buffer.len(),
        "parsed"
    );
    result?;

    // Nothing more can be received, so this request can't make progress
    if buffer.is_full() && !request.is_complete() {
        return Err(ParseError::BufferFull);
    }

    Ok(())
}

fn parse_input(
    request: &mut Request,
    input: &[u8],
    consumed: &mut usize,
    constraints: &Constraints,
) -> Result<(), ParseError> {
    loop {
        let rest = &input[*consumed..];

        // Every step either consumes input or moves the state forward, or waits
        let step = match request.state {
            State::GotNothing => parse_request_line(request, rest, constraints)?,
            State::GotLine => parse_header_line(request, rest, constraints)?,
            State::GotHeaders => parse_body(request, rest, constraints)?,
            State::GotAll => None,
        };

        match step {
            Some(count) => *consumed += count,
            None => return Ok(()),
        }
    }
}

fn parse_request_line(
    request: &mut Request,
    input: &[u8],
    constraints: &Constraints,
) -> Result<Option<usize>, ParseError> {
    // Empty lines ahead of a request line are ignored, this also skips the CRLF left after a
    // chunked body on reused connections
    if input.starts_with(b"\r\n") {
        return Ok(Some(2));
    }

    let Some(end) = find_crlf(input) else {
        return Ok(None);
    };
    let line = &input[..end];

    let mut tokens = line.splitn(3, |b| *b == b' ');
    let (Some(method), Some(uri), Some(version)) = (tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(ParseError::MalformedLine);
    };

    let method = Method::from_token(method).ok_or(ParseError::UnknownMethod)?;

    if !uri.starts_with(b"/") {
        return Err(ParseError::InvalidUri);
    }
    if uri.len() > constraints.max_uri_len {
        return Err(ParseError::UriTooLong {
            max: constraints.max_uri_len,
        });
    }
    if uri.windows(2).any(|w| w == b"..") {
        return Err(ParseError::UriTraversal);
    }
    let uri = std::str::from_utf8(uri).map_err(|_| ParseError::InvalidUri)?;

    let version = Version::from_token(version).ok_or(ParseError::UnsupportedVersion)?;
    if version == Version::Http10 && !method.allowed_in_http10() {
        return Err(ParseError::MethodNotAllowed(method));
    }

    request.method = method;
    request.uri.clear();
    request.uri.push_str(uri);
    request.version = version;
    request.state = State::GotLine;

    Ok(Some(end + 2))
}

fn parse_header_line(
    request: &mut Request,
    input: &[u8],
    constraints: &Constraints,
) -> Result<Option<usize>, ParseError> {
    let Some(end) = find_crlf(input) else {
        return Ok(None);
    };

    // Empty line ends the header block
    if end == 0 {
        if !request.termination_overridden {
            request.body_termination = body_termination(&request.headers)?;
        }
        request.state = State::GotHeaders;

        return Ok(Some(2));
    }

    if request.header_lines == constraints.max_headers {
        return Err(ParseError::TooManyHeaders {
            max: constraints.max_headers,
        });
    }

    let line = &input[..end];
    let colon = line
        .iter()
        .position(|b| *b == b':')
        .ok_or(ParseError::MalformedHeader)?;

    let key = &line[..colon];
    if key.is_empty() || key.iter().any(|b| *b == b'\r' || *b == b'\n') {
        return Err(ParseError::MalformedHeader);
    }

    let value = &line[colon + 1..];
    let skip = value
        .iter()
        .take_while(|b| **b == b' ' || **b == b'\t')
        .count();
    let value = &value[skip..];

    if key.len() + value.len() > constraints.max_header_len {
        return Err(ParseError::HeaderTooLong {
            max: constraints.max_header_len,
        });
    }

    let key = std::str::from_utf8(key).map_err(|_| ParseError::MalformedHeader)?;
    let value = std::str::from_utf8(value).map_err(|_| ParseError::MalformedHeader)?;

    request.headers.set(key, value)?;
    request.header_lines += 1;

    Ok(Some(end + 2))
}

fn parse_body(
    request: &mut Request,
    input: &[u8],
    constraints: &Constraints,
) -> Result<Option<usize>, ParseError> {
    if !request.method.has_body() {
        request.state = State::GotAll;
        return Ok(Some(0));
    }

    match request.body_termination {
        BodyTermination::None => {
            request.state = State::GotAll;
            Ok(Some(0))
        }
        BodyTermination::Length(length) => parse_length_body(request, input, length, constraints),
        BodyTermination::Chunked => parse_chunked_body(request, input, constraints),
    }
}

fn parse_length_body(
    request: &mut Request,
    input: &[u8],
    length: usize,
    constraints: &Constraints,
) -> Result<Option<usize>, ParseError> {
    if length >= constraints.max_body_len {
        return Err(ParseError::BodyTooLong {
            len: length,
            max: constraints.max_body_len,
        });
    }

    let take = length.saturating_sub(request.body.len()).min(input.len());
    request.body.extend_from_slice(&input[..take]);

    if request.body.len() >= length {
        request.state = State::GotAll;
        return Ok(Some(take));
    }

    Ok((take != 0).then_some(take))
}

fn parse_chunked_body(
    request: &mut Request,
    input: &[u8],
    constraints: &Constraints,
) -> Result<Option<usize>, ParseError> {
    match request.chunk {
        Chunk::Size => {
            let Some(end) = find_crlf(input) else {
                // A valid size line would have ended by now
                if input.len() >= MAX_CHUNK_DIGITS + 2 {
                    return Err(ParseError::MalformedChunkSize);
                }
                return Ok(None);
            };

            let size = parse_chunk_size(&input[..end])?;
            if size == 0 {
                request.state = State::GotAll;
                return Ok(Some(end + 2));
            }

            let len = request.body.len() + size;
            if len >= constraints.max_body_len {
                return Err(ParseError::BodyTooLong {
                    len,
                    max: constraints.max_body_len,
                });
            }

            request.chunk = Chunk::Data(size);
            Ok(Some(end + 2))
        }
        Chunk::Data(remaining) => {
            let take = remaining.min(input.len());
            if take == 0 {
                return Ok(None);
            }

            request.body.extend_from_slice(&input[..take]);
            request.chunk = if take == remaining {
                Chunk::DataEnd
            } else {
                Chunk::Data(remaining - take)
            };

            Ok(Some(take))
        }
        Chunk::DataEnd => {
            if input.len() < 2 {
                return Ok(None);
            }
            if &input[..2] != b"\r\n" {
                return Err(ParseError::MalformedChunkEnd);
            }

            request.chunk = Chunk::Size;
            Ok(Some(2))
        }
    }
}

fn parse_chunk_size(digits: &[u8]) -> Result<usize, ParseError> {
    if digits.is_empty() || digits.len() > MAX_CHUNK_DIGITS {
        return Err(ParseError::MalformedChunkSize);
    }

    let mut size = 0;
    for digit in digits {
        let value = (*digit as char)
            .to_digit(16)
            .ok_or(ParseError::MalformedChunkSize)?;
        size = size * 16 + value as usize;
    }

    Ok(size)
}

/// Derive how the body ends from the received headers.
fn body_termination(headers: &HeaderMap) -> Result<BodyTermination, ParseError> {
    if let Some(encoding) = headers.get_first("Transfer-Encoding") {
        // Only chunked as the final coding is understood
        let last = encoding.rsplit(',').next().unwrap_or_default().trim();
        if !last.eq_ignore_ascii_case("chunked") {
            return Err(ParseError::UnsupportedTransferEncoding);
        }

        return Ok(BodyTermination::Chunked);
    }

    let Some(values) = headers.get("Content-Length") else {
        return Ok(BodyTermination::None);
    };

    // Repeated values are allowed as long as they all agree
    let mut length = None;
    for part in values.iter().flat_map(|v| v.split(',')) {
        let value = parse_decimal(part.trim()).ok_or(ParseError::InvalidContentLength)?;
        if length.map_or(false, |l| l != value) {
            return Err(ParseError::InvalidContentLength);
        }
        length = Some(value);
    }

    length
        .map(BodyTermination::Length)
        .ok_or(ParseError::InvalidContentLength)
}

fn parse_decimal(value: &str) -> Option<usize> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    value.parse().ok()
}

fn find_crlf(input: &[u8]) -> Option<usize> {
    input.windows(2).position(|w| w == b"\r\n")
}
