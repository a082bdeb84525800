//! Documents and deferred-reply handles.
//!
//! # Responsibilities
//! - Carry an opaque payload from a worker to the sink
//! - Carry at most one live socket awaiting a reply (`PendingReply`)
//!
//! # Design Decisions
//! - `PendingReply` is not `Clone`; taking it out of a document is the only
//!   way to use it, so a socket is reused at most once
//! - Dropping an unused `PendingReply` closes the socket

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::exchange::registry::ConnectionId;

/// Correlation ID for a document, carried through logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque document moving through the exchange.
#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    payload: Bytes,
    pending_reply: Option<PendingReply>,
}

impl Document {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: DocumentId::new(),
            payload: payload.into(),
            pending_reply: None,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Attach the socket a later send should answer on.
    pub fn with_pending_reply(mut self, pending: PendingReply) -> Self {
        self.pending_reply = Some(pending);
        self
    }

    pub fn has_pending_reply(&self) -> bool {
        self.pending_reply.is_some()
    }

    pub fn pending_reply(&self) -> Option<&PendingReply> {
        self.pending_reply.as_ref()
    }

    /// Remove and return the pending reply, if any.
    pub fn take_pending_reply(&mut self) -> Option<PendingReply> {
        self.pending_reply.take()
    }

    /// Build a reply carrying `payload` that answers on this document's socket.
    pub fn reply_with(mut self, payload: impl Into<Bytes>) -> Document {
        let reply = Document::new(payload);
        match self.take_pending_reply() {
            Some(pending) => reply.with_pending_reply(pending),
            None => reply,
        }
    }
}

/// A live inbound socket handed downstream instead of being acknowledged.
pub struct PendingReply {
    stream: TcpStream,
    peer: SocketAddr,
    connection: ConnectionId,
}

impl PendingReply {
    pub fn new(stream: TcpStream, peer: SocketAddr, connection: ConnectionId) -> Self {
        Self {
            stream,
            peer,
            connection,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Take ownership of the socket.
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("peer", &self.peer)
            .field("connection", &self.connection)
            .finish()
    }
}
