//! Single-threaded HTTP/1.x server, built on mio.
//!
//! A [`Server`] listens on one address and serves every connection from the calling thread.
//! Parsing is done by `hearth`, requests are answered by a [`Handler`].

mod config;
mod connection;
mod handler;
mod net;
mod pool;
mod server;

pub use self::{
    config::{line_capacity, ServerConfig},
    connection::Connection,
    handler::{BadRequest, Handler},
    pool::{ConnectionId, ConnectionPool, PoolError, INITIAL_SLOTS},
    server::Server,
};
