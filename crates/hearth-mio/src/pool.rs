use std::{collections::TryReserveError, net::SocketAddr};

use hearth::Constraints;
use mio::Token;
use thiserror::Error;
use thunderdome::{Arena, Index};
use tracing::{event, Level};

use crate::Connection;

/// Slots allocated the first time the pool grows.
pub const INITIAL_SLOTS: usize = 8;

/// Handle to a connection in a [`ConnectionPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Index);

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to grow connection pool to {capacity} slots")]
    Grow {
        capacity: usize,
        #[source]
        source: TryReserveError,
    },
}

/// Growable set of live connections.
///
/// Connections are handed out in slot order. A slot is reused as soon as its connection is
/// removed, new connections take the first free slot. When every slot is in use the slot table
/// doubles, compacting the live connections to its front in their existing order.
pub struct ConnectionPool<S> {
    connections: Arena<Connection<S>>,
    slots: Vec<Option<Index>>,
    len: usize,
    next_token: usize,

    recv_buffer_len: usize,
    constraints: Constraints,
}

impl<S> ConnectionPool<S> {
    /// Create an empty pool, connections get tokens starting at `first_token`.
    pub fn new(first_token: usize, recv_buffer_len: usize, constraints: Constraints) -> Self {
        Self {
            connections: Arena::new(),
            slots: Vec::new(),
            len: 0,
            next_token: first_token,

            recv_buffer_len,
            constraints,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots, used or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Token the next added connection will get.
    pub fn next_token(&self) -> Token {
        Token(self.next_token)
    }

    /// Take ownership of a newly accepted socket.
    pub fn add(&mut self, socket: S, peer: SocketAddr) -> Result<ConnectionId, PoolError> {
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                // After growing, live connections fill exactly the front of the table
                self.grow()?;
                self.len
            }
        };

        let token = self.next_token();
        self.next_token = self.next_token.wrapping_add(1);

        let connection = Connection::new(
            socket,
            peer,
            token,
            self.recv_buffer_len,
            &self.constraints,
        );
        let index = self.connections.insert(connection);
        self.slots[slot] = Some(index);
        self.len += 1;

        event!(Level::DEBUG, ?peer, slot, len = self.len, "added connection");

        Ok(ConnectionId(index))
    }

    /// Remove a connection, returning it.
    ///
    /// Dropping the returned connection closes its socket.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection<S>> {
        let slot = self.slot_of(id)?;
        self.slots[slot] = None;
        self.len -= 1;

        let connection = self.connections.remove(id.0)?;
        event!(Level::DEBUG, peer = ?connection.peer(), slot, len = self.len, "removed connection");

        Some(connection)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection<S>> {
        self.connections.get(id.0)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id.0)
    }

    /// Slot currently holding the connection.
    pub fn slot_of(&self, id: ConnectionId) -> Option<usize> {
        self.slots.iter().position(|slot| *slot == Some(id.0))
    }

    /// Live connections, in slot order.
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.slots.iter().flatten().map(|index| ConnectionId(*index))
    }

    /// Visit every live connection in slot order.
    pub fn for_each_used<F>(&mut self, mut f: F)
    where
        F: FnMut(ConnectionId, &mut Connection<S>),
    {
        for index in self.slots.iter().flatten() {
            if let Some(connection) = self.connections.get_mut(*index) {
                f(ConnectionId(*index), connection);
            }
        }
    }

    fn grow(&mut self) -> Result<(), PoolError> {
        let capacity = if self.slots.is_empty() {
            INITIAL_SLOTS
        } else {
            self.slots.len() * 2
        };

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|source| PoolError::Grow { capacity, source })?;

        // Only live connections move over, so the new table is compacted
        slots.extend(self.slots.iter().flatten().map(|index| Some(*index)));
        slots.resize(capacity, None);
        self.slots = slots;

        event!(Level::DEBUG, capacity, len = self.len, "grew connection pool");

        Ok(())
    }
}
