//! Client connections and the registry that owns them.
//!
//! Each connection owns its socket, the bytes of a line still being
//! received, and the bytes still waiting to be written to it.

use crate::error::{ChatError, Result};
use crate::protocol::LineBuffer;
use crate::runtime::buffer::{FlushStatus, OutboundQueue};
use bytes::Bytes;
use mio::net::TcpStream;
use slab::Slab;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// Identifier of a registered connection (its slab key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub usize);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-connection buffer bounds.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// Bytes that may be queued for a client before it counts as stalled.
    pub outbound_limit: usize,
    /// Longest line accepted before it is force-split.
    pub max_line_length: usize,
}

/// What one read pass over a readable socket produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes appended to the line buffer.
    pub bytes: usize,
    /// Peer closed its side.
    pub eof: bool,
    /// Stopped at the byte budget; the socket may still hold data.
    pub more: bool,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    stream: S,
    peer: SocketAddr,
    inbound: LineBuffer,
    outbound: OutboundQueue,
    alive: bool,
    /// Write readiness is currently requested from the poller.
    write_interest: bool,
}

impl<S> Connection<S> {
    /// Wrap an accepted socket.
    pub fn new(stream: S, peer: SocketAddr, limits: ConnectionLimits) -> Self {
        Self {
            stream,
            peer,
            inbound: LineBuffer::new(limits.max_line_length),
            outbound: OutboundQueue::new(limits.outbound_limit),
            alive: true,
            write_interest: false,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn inbound_mut(&mut self) -> &mut LineBuffer {
        &mut self.inbound
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Flag the connection for removal at the end of the current pass.
    pub fn mark_dead(&mut self) {
        self.alive = false;
    }

    pub(crate) fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn write_interest(&self) -> bool {
        self.write_interest
    }

    pub fn set_write_interest(&mut self, on: bool) {
        self.write_interest = on;
    }
}

impl<S: Read> Connection<S> {
    /// Read until the socket would block or `budget` bytes were taken,
    /// feeding the line buffer.
    ///
    /// A sender that writes faster than we read can otherwise keep this
    /// loop going forever, so the caller must come back for the rest when
    /// `more` is set; an edge-triggered poller will not report it again.
    pub fn read_available(
        &mut self,
        scratch: &mut [u8],
        budget: usize,
    ) -> io::Result<ReadOutcome> {
        let mut bytes = 0;
        while bytes < budget {
            let want = scratch.len().min(budget - bytes);
            match self.stream.read(&mut scratch[..want]) {
                Ok(0) => {
                    return Ok(ReadOutcome {
                        bytes,
                        eof: true,
                        more: false,
                    })
                }
                Ok(n) => {
                    self.inbound.push(&scratch[..n]);
                    bytes += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome {
                        bytes,
                        eof: false,
                        more: false,
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(ReadOutcome {
            bytes,
            eof: false,
            more: true,
        })
    }
}

impl<S: Write> Connection<S> {
    /// Queue `payload` behind anything already pending and write as much as
    /// the socket takes right now.
    pub fn send(&mut self, payload: Bytes) -> Result<FlushStatus> {
        self.outbound.push(payload)?;
        Ok(self.flush()?)
    }

    /// Write queued bytes until drained or the socket would block.
    pub fn flush(&mut self) -> io::Result<FlushStatus> {
        self.outbound.flush(&mut self.stream)
    }
}

/// Registry of live client connections using slab allocation.
///
/// The listener and the operator console are polled alongside these but
/// are never stored here, so they can never be chosen as recipients.
#[derive(Debug)]
pub struct ConnectionRegistry<S = TcpStream> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
}

impl<S> ConnectionRegistry<S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Add a newly accepted connection.
    ///
    /// Fails with `ResourceExhausted` if the registry is at capacity; the
    /// connection is dropped (and its socket closed) in that case.
    pub fn register(&mut self, conn: Connection<S>) -> Result<ConnId> {
        if self.connections.len() >= self.max_connections {
            return Err(ChatError::ResourceExhausted {
                limit: self.max_connections,
            });
        }
        Ok(ConnId(self.connections.insert(conn)))
    }

    /// Remove a connection. Removing an absent id is a no-op.
    pub fn deregister(&mut self, id: ConnId) -> Option<Connection<S>> {
        self.connections.try_remove(id.0)
    }

    /// Snapshot of the current ids.
    ///
    /// The snapshot stays valid to iterate while the registry changes; ids
    /// removed in the meantime simply fail to resolve.
    pub fn all(&self) -> Vec<ConnId> {
        self.connections.iter().map(|(key, _)| ConnId(key)).collect()
    }

    /// Number of live client connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection<S>> {
        self.connections.get(id.0)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id.0)
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.connections.contains(id.0)
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Remove every connection, yielding each one.
    pub fn drain(&mut self) -> impl Iterator<Item = Connection<S>> + '_ {
        self.connections.drain()
    }
}
