use anyhow::{bail, Error};
use hearth::{parse, Constraints, ParseError, RecvBuffer, Request};

pub struct Parsing {
    pub request: Request,
    pub buffer: RecvBuffer,
    pub constraints: Constraints,
}

pub fn given_parser(constraints: Constraints) -> Parsing {
    Parsing {
        request: Request::new(&constraints),
        buffer: RecvBuffer::new(512),
        constraints,
    }
}

/// Feed `data` in pieces of `step` bytes, parsing after every piece.
pub fn when_fed_in_steps(parsing: &mut Parsing, data: &[u8], step: usize) -> Result<(), Error> {
    for piece in data.chunks(step) {
        if parsing.buffer.extend(piece) != piece.len() {
            bail!("receive buffer overflowed");
        }

        parse(&mut parsing.request, &mut parsing.buffer, &parsing.constraints)?;
    }

    Ok(())
}

pub fn when_fed(parsing: &mut Parsing, data: &[u8]) -> Result<(), Error> {
    if parsing.buffer.extend(data) != data.len() {
        bail!("receive buffer overflowed");
    }

    parse(&mut parsing.request, &mut parsing.buffer, &parsing.constraints)?;

    Ok(())
}

pub fn then_rejected(parsing: &mut Parsing, data: &[u8]) -> ParseError {
    parsing.buffer.extend(data);

    match parse(&mut parsing.request, &mut parsing.buffer, &parsing.constraints) {
        Ok(()) => panic!("request was not rejected: {:?}", parsing.request),
        Err(error) => error,
    }
}

pub fn header_values(request: &Request, key: &str) -> Vec<String> {
    request
        .headers()
        .get(key)
        .map(|v| v.iter().map(str::to_string).collect())
        .unwrap_or_default()
}
