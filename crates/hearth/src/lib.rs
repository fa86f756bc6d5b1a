//! Incremental HTTP/1.x request parsing.
//!
//! Requests are parsed from a [`RecvBuffer`] by [`parse`], which can be called again every time
//! more bytes arrive. Headers are stored in a [`HeaderMap`], a case-insensitive multi-value map.
//! Nothing in this crate performs I/O, see `hearth-mio` for a server.

mod buffer;
mod constraints;
mod hash;
pub mod headers;
mod parser;
mod request;
mod response;

pub use self::{
    buffer::RecvBuffer,
    constraints::Constraints,
    headers::{HeaderError, HeaderMap, HeaderValues},
    parser::{parse, ParseError},
    request::{BodyTermination, Method, Request, State, Version},
    response::{reason, Response},
};
