use std::{
    collections::HashMap,
    io::ErrorKind,
    mem,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

use anyhow::{Context as _, Error};
use mio::{
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token,
};
use tracing::{event, instrument, Level};

use crate::{
    connection::Received, net::check_io, BadRequest, Connection, ConnectionId, ConnectionPool,
    Handler, ServerConfig,
};

const LISTENER: Token = Token(0);

/// Readiness reported for a connection during one poll.
#[derive(Default, Debug, Clone, Copy)]
struct Ready {
    readable: bool,
    writable: bool,
}

/// Single-threaded HTTP/1.x server.
///
/// Every connection is served from one thread, driven by readiness events. Requests are parsed
/// incrementally as data arrives, complete requests are passed to the request handler, and
/// requests that fail to parse to the error handler. Either way the handler's response is sent
/// back on the same connection.
pub struct Server<H, E = BadRequest> {
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,

    config: ServerConfig,
    pool: ConnectionPool<TcpStream>,
    ready: HashMap<Token, Ready>,
    scratch: Vec<ConnectionId>,

    request_handler: H,
    error_handler: E,
}

impl<H> Server<H>
where
    H: Handler,
{
    /// Resolve `addr` to an IPv4 address, and start listening on it.
    #[instrument("Server::bind", skip_all)]
    pub fn bind(addr: &str, config: ServerConfig, request_handler: H) -> Result<Self, Error> {
        let addr = addr
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve {:?}", addr))?
            .find(SocketAddr::is_ipv4)
            .with_context(|| format!("no IPv4 address for {:?}", addr))?;

        event!(Level::DEBUG, ?addr, "binding");

        let poll = Poll::new().context("failed to create poll")?;
        let mut listener =
            TcpListener::bind(addr).with_context(|| format!("failed to bind {}", addr))?;
        let local_addr = listener.local_addr()?;

        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .context("failed to register listener")?;

        event!(Level::INFO, ?local_addr, "listening");

        let pool = ConnectionPool::new(
            LISTENER.0 + 1,
            config.recv_buffer_len,
            config.constraints,
        );

        let this = Self {
            poll,
            events: Events::with_capacity(config.max_events),
            listener: Some(listener),
            local_addr,

            config,
            pool,
            ready: HashMap::new(),
            scratch: Vec::new(),

            request_handler,
            error_handler: BadRequest,
        };
        Ok(this)
    }
}

impl<H, E> Server<H, E>
where
    H: Handler,
    E: Handler,
{
    /// Replace the handler invoked for requests that fail to parse.
    pub fn with_error_handler<E2>(self, error_handler: E2) -> Server<H, E2>
    where
        E2: Handler,
    {
        Server {
            poll: self.poll,
            events: self.events,
            listener: self.listener,
            local_addr: self.local_addr,

            config: self.config,
            pool: self.pool,
            ready: self.ready,
            scratch: self.scratch,

            request_handler: self.request_handler,
            error_handler,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionPool<TcpStream> {
        &self.pool
    }

    /// Whether the server still accepts connections.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Serve connections until a fatal error occurs.
    ///
    /// On a fatal error the listener is closed before the error is returned.
    #[instrument("Server::run", skip_all)]
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            let timeout = self.config.poll_timeout;
            if let Err(error) = self.turn(timeout) {
                event!(Level::ERROR, "fatal error in event loop: {:#}", error);
                self.close();
                return Err(error);
            }
        }
    }

    /// Run a single iteration of the event loop, waiting at most `timeout` for readiness.
    pub fn turn(&mut self, timeout: Duration) -> Result<(), Error> {
        if self.listener.is_none() {
            anyhow::bail!("server is closed");
        }

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            // Interrupted by a signal, try again next turn
            Err(error) if error.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(error) => return Err(Error::new(error).context("failed to poll")),
        }

        // Collect readiness, multiple events for one token are merged
        let mut accept = false;
        self.ready.clear();
        for event in self.events.iter() {
            if event.token() == LISTENER {
                accept = true;
                continue;
            }

            let ready = self.ready.entry(event.token()).or_default();
            ready.readable |= event.is_readable() || event.is_read_closed();
            ready.writable |= event.is_writable() || event.is_write_closed();
        }

        if accept {
            self.accept()?;
        }

        // Service ready connections in slot order
        let mut ids = mem::take(&mut self.scratch);
        ids.clear();
        ids.extend(self.pool.ids());
        for id in ids.iter().copied() {
            self.service(id);
        }
        self.scratch = ids;

        self.sweep_idle();

        Ok(())
    }

    /// Stop listening, and close every connection.
    pub fn close(&mut self) {
        let Some(mut listener) = self.listener.take() else {
            return;
        };

        event!(Level::INFO, local_addr = ?self.local_addr, "closing");

        if let Err(error) = self.poll.registry().deregister(&mut listener) {
            event!(Level::WARN, ?error, "failed to deregister listener");
        }

        let ids: Vec<_> = self.pool.ids().collect();
        for id in ids {
            self.drop_connection(id);
        }
    }

    fn accept(&mut self) -> Result<(), Error> {
        let Some(listener) = &self.listener else {
            return Ok(());
        };

        // Readiness is edge-triggered, so accept until there's nothing left
        loop {
            let (mut stream, peer) = match check_io(listener.accept()) {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Err(Error::new(error).context("failed to accept")),
            };

            event!(Level::DEBUG, ?peer, "accepted connection");

            // The pool picks the token, register before handing the stream over
            let token = self.pool.next_token();
            self.poll
                .registry()
                .register(&mut stream, token, Interest::READABLE)
                .context("failed to register connection")?;

            self.pool.add(stream, peer)?;
        }

        Ok(())
    }

    fn service(&mut self, id: ConnectionId) {
        let Some(connection) = self.pool.get_mut(id) else {
            return;
        };
        let Some(ready) = self.ready.get(&connection.token()).copied() else {
            return;
        };

        let result = serve(
            connection,
            ready,
            &self.config,
            &mut self.request_handler,
            &mut self.error_handler,
        );

        let close = match result {
            Ok(Flow::Open) => false,
            Ok(Flow::Close) => true,
            Err(error) => {
                event!(Level::DEBUG, peer = ?connection.peer(), ?error, "connection failed");
                true
            }
        };

        if close {
            self.drop_connection(id);
            return;
        }

        // Only wait for writability while there's something to write
        let wants_write = connection.pending_send() > 0;
        if wants_write != connection.write_interest() {
            let interest = if wants_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            let token = connection.token();

            let result = self
                .poll
                .registry()
                .reregister(connection.socket_mut(), token, interest);
            match result {
                Ok(()) => connection.set_write_interest(wants_write),
                Err(error) => {
                    event!(Level::WARN, ?error, "failed to reregister connection");
                    self.drop_connection(id);
                }
            }
        }
    }

    fn sweep_idle(&mut self) {
        let Some(idle_timeout) = self.config.idle_timeout else {
            return;
        };

        let mut expired = mem::take(&mut self.scratch);
        expired.clear();
        self.pool.for_each_used(|id, connection| {
            if connection.last_active().elapsed() >= idle_timeout {
                expired.push(id);
            }
        });

        for id in expired.iter().copied() {
            event!(Level::DEBUG, "closing idle connection");
            self.drop_connection(id);
        }
        self.scratch = expired;
    }

    fn drop_connection(&mut self, id: ConnectionId) {
        let Some(mut connection) = self.pool.remove(id) else {
            return;
        };

        if let Err(error) = self.poll.registry().deregister(connection.socket_mut()) {
            event!(Level::WARN, ?error, "failed to deregister connection");
        }

        event!(Level::DEBUG, peer = ?connection.peer(), "closed connection");
    }
}

/// Whether a connection stays open after being serviced.
enum Flow {
    Open,
    Close,
}

fn serve<H, E>(
    connection: &mut Connection<TcpStream>,
    ready: Ready,
    config: &ServerConfig,
    request_handler: &mut H,
    error_handler: &mut E,
) -> Result<Flow, std::io::Error>
where
    H: Handler,
    E: Handler,
{
    if ready.writable {
        connection.flush()?;
    }

    let mut received = Received::Idle;
    if ready.readable {
        received = connection.receive(|connection| {
            dispatch(connection, config, request_handler, error_handler)
        })?;
    }

    // Send what the handlers produced right away, anything left waits for writability
    let flushed = connection.flush()?;

    if received == Received::Closed {
        event!(Level::DEBUG, peer = ?connection.peer(), "peer closed connection");
        return Ok(Flow::Close);
    }

    if flushed && connection.is_closing() {
        return Ok(Flow::Close);
    }

    Ok(Flow::Open)
}

/// Parse whatever is buffered, answering every request completed by it.
fn dispatch<H, E>(
    connection: &mut Connection<TcpStream>,
    config: &ServerConfig,
    request_handler: &mut H,
    error_handler: &mut E,
) where
    H: Handler,
    E: Handler,
{
    loop {
        if let Err(error) = connection.parse(&config.constraints) {
            event!(Level::WARN, peer = ?connection.peer(), %error, "bad request");

            connection.respond(|request, response| error_handler.handle(request, response));
            if error.loses_framing() {
                connection.close_after_send();
                return;
            }

            connection.discard_input();
            return;
        }

        if !connection.request().is_complete() {
            return;
        }

        let request = connection.request();
        event!(
            Level::DEBUG,
            peer = ?connection.peer(),
            method = %request.method(),
            uri = request.uri(),
            "handling request"
        );

        connection.respond(|request, response| request_handler.handle(request, response));

        if connection.request().wants_close() {
            connection.close_after_send();
            return;
        }

        connection.next_request();

        // Pipelined requests may already be buffered
        if connection.recv_buffer().is_empty() {
            return;
        }
    }
}
