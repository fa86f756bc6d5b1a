use std::{
    io::{ErrorKind, Read, Write},
    net::SocketAddr,
    time::Instant,
};

use bytes::{Buf, BytesMut};
use hearth::{parse, Constraints, ParseError, RecvBuffer, Request, Response};
use mio::Token;
use tracing::{event, Level};

/// State of a single client connection.
///
/// Owns the socket, the receive buffer, and the request and response being worked on. Both the
/// request and the response are reused for every request on the connection.
pub struct Connection<S> {
    socket: S,
    peer: SocketAddr,
    token: Token,
    recv: RecvBuffer,
    request: Request,
    response: Response,
    send: BytesMut,
    write_interest: bool,
    closing: bool,
    last_active: Instant,
}

/// What happened while receiving from a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Received {
    /// Ran out of data for now.
    Idle,
    /// The peer closed its side.
    Closed,
}

impl<S> Connection<S> {
    pub(crate) fn new(
        socket: S,
        peer: SocketAddr,
        token: Token,
        recv_buffer_len: usize,
        constraints: &Constraints,
    ) -> Self {
        Self {
            socket,
            peer,
            token,
            recv: RecvBuffer::new(recv_buffer_len),
            request: Request::new(constraints),
            response: Response::new(),
            send: BytesMut::new(),
            write_interest: false,
            closing: false,
            last_active: Instant::now(),
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn recv_buffer(&self) -> &RecvBuffer {
        &self.recv
    }

    pub fn recv_buffer_mut(&mut self) -> &mut RecvBuffer {
        &mut self.recv
    }

    /// Bytes of serialized responses not yet written to the socket.
    pub fn pending_send(&self) -> usize {
        self.send.len()
    }

    /// Whether the connection will be closed once its pending responses are written.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub(crate) fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub(crate) fn write_interest(&self) -> bool {
        self.write_interest
    }

    pub(crate) fn set_write_interest(&mut self, value: bool) {
        self.write_interest = value;
    }

    /// Continue parsing the current request from the receive buffer.
    pub fn parse(&mut self, constraints: &Constraints) -> Result<(), ParseError> {
        parse(&mut self.request, &mut self.recv, constraints)
    }

    /// Run `handler` for the current request and queue the response it produced.
    pub(crate) fn respond<F>(&mut self, handler: F)
    where
        F: FnOnce(&Request, &mut Response),
    {
        handler(&self.request, &mut self.response);

        self.response
            .write_to(self.request.method(), self.request.version(), &mut self.send);
        event!(
            Level::DEBUG,
            peer = ?self.peer,
            status = self.response.status(),
            "queued response"
        );
    }

    /// Prepare for the next request, keeping any bytes already received for it.
    pub(crate) fn next_request(&mut self) {
        self.request.reset();
        self.response.reset();
    }

    /// Drop everything received, used after a request failed to parse.
    pub(crate) fn discard_input(&mut self) {
        self.recv.clear();
        self.next_request();
    }

    pub(crate) fn close_after_send(&mut self) {
        self.closing = true;
    }
}

impl<S> Connection<S>
where
    S: Read,
{
    /// Read into the receive buffer until the socket has nothing more, calling `on_data` after
    /// every successful read.
    pub(crate) fn receive<F>(&mut self, mut on_data: F) -> Result<Received, std::io::Error>
    where
        F: FnMut(&mut Self),
    {
        loop {
            // Once closing, nothing else received is answered
            if self.closing || self.recv.is_full() {
                return Ok(Received::Idle);
            }

            match self.socket.read(self.recv.spare_mut()) {
                Ok(0) => return Ok(Received::Closed),
                Ok(count) => {
                    event!(Level::TRACE, peer = ?self.peer, count, "received data");
                    self.recv.advance(count);
                    self.touch();
                    on_data(self);
                }
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock => return Ok(Received::Idle),
                    ErrorKind::Interrupted => continue,
                    _ => return Err(error),
                },
            }
        }
    }
}

impl<S> Connection<S>
where
    S: Write,
{
    /// Write as much of the pending responses as the socket accepts.
    ///
    /// Returns `true` if everything was written.
    pub(crate) fn flush(&mut self) -> Result<bool, std::io::Error> {
        while !self.send.is_empty() {
            match self.socket.write(&self.send) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(count) => {
                    event!(Level::TRACE, peer = ?self.peer, count, "sent data");
                    self.send.advance(count);
                    self.touch();
                }
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock => return Ok(false),
                    ErrorKind::Interrupted => continue,
                    _ => return Err(error),
                },
            }
        }

        Ok(true)
    }
}
