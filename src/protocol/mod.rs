//! Wire-protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Config (protocol name)
//!     → registry.rs (name → constructor, resolved once)
//!     → ProtocolFactory::bind(TcpStream)
//!     → Box<dyn ProtocolSession> (one socket, one exchange)
//!
//! Receive side:  receive → received → signal_success | signal_error
//! Send side:     send → send_succeeded → read_reply
//! ```
//!
//! # Design Decisions
//! - Framing is variant-specific; the trait only fixes the exchange shape
//! - state.rs enforces call order so misuse is an error, never a silent no-op
//! - A session is never reused: it is consumed by `into_stream`

pub mod length_prefixed;
pub mod line;
pub mod registry;
pub mod state;

use std::io;

use async_trait::async_trait;
use bytes::buf::Reader;
use bytes::{Buf, Bytes};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

pub use registry::{ProtocolFactory, ProtocolRegistry};

/// Errors raised while driving a protocol session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{operation} is only valid after {required}")]
    OutOfOrder {
        operation: &'static str,
        required: &'static str,
    },

    #[error("receipt has already been signaled")]
    AlreadySignaled,

    #[error("peer closed the connection before a complete message arrived")]
    ConnectionClosed,

    #[error("peer rejected the document")]
    Rejected,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown protocol '{0}'")]
    Unknown(String),
}

/// One bound use of a wire-protocol variant.
///
/// A session owns its socket for exactly one exchange: either it sends a
/// document (and optionally reads a reply), or it receives one (and
/// optionally signals the outcome). Sessions are `Send` so they can move into
/// a worker task, but they are never shared; every method takes `&mut self`
/// or consumes the session.
#[async_trait]
pub trait ProtocolSession: Send {
    /// Registered name of the variant, for logging.
    fn name(&self) -> &'static str;

    /// Write a document to the peer.
    async fn send(&mut self, document: &[u8]) -> Result<(), ProtocolError>;

    /// Whether the last send reached the wire completely.
    fn send_succeeded(&self) -> Result<bool, ProtocolError>;

    /// Block for the peer's reply to the document sent earlier.
    async fn read_reply(&mut self) -> Result<Bytes, ProtocolError>;

    /// Reply as a reader, for callers that consume it incrementally.
    async fn reply_reader(&mut self) -> Result<Reader<Bytes>, ProtocolError> {
        Ok(self.read_reply().await?.reader())
    }

    /// Read one document from the peer.
    async fn receive(&mut self) -> Result<(), ProtocolError>;

    /// The document read by `receive`.
    fn received(&self) -> Result<&Bytes, ProtocolError>;

    fn received_reader(&self) -> Result<Reader<Bytes>, ProtocolError> {
        Ok(self.received()?.clone().reader())
    }

    /// Acknowledge the received document on the wire.
    async fn signal_success(&mut self) -> Result<(), ProtocolError>;

    /// Report a failure to process the received document on the wire.
    async fn signal_error(&mut self) -> Result<(), ProtocolError>;

    /// End the session and hand back the socket.
    fn into_stream(self: Box<Self>) -> TcpStream;
}

/// Unwrap a framed socket for hand-off or close.
///
/// Bytes already buffered but not yet decoded stay behind; a session carries
/// one exchange, so anything after it is logged and dropped.
pub(crate) fn release<C>(framed: Framed<TcpStream, C>, protocol: &'static str) -> TcpStream {
    let parts = framed.into_parts();
    if !parts.read_buf.is_empty() {
        tracing::debug!(
            protocol,
            discarded = parts.read_buf.len(),
            "Dropping unread bytes with released socket"
        );
    }
    parts.io
}

/// End a session and shut its socket down.
///
/// Shutdown errors are logged, not returned: the socket is dropped either way.
pub async fn close(session: Box<dyn ProtocolSession>) {
    let name = session.name();
    let mut stream = session.into_stream();
    if let Err(e) = stream.shutdown().await {
        tracing::debug!(protocol = name, error = %e, "Socket shutdown failed");
    }
}
