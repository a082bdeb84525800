//! Outbound document sender.
//!
//! # Flow
//! ```text
//! take pending reply from document (always)
//!     → open socket (reuse pending, else connect within timeout)
//!     → bind protocol → send → check send_succeeded
//!     → optionally read reply within the reply timeout
//!     → close socket (always, exactly once)
//! ```

use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;

use crate::config::SenderConfig;
use crate::exchange::document::Document;
use crate::net::outbound::{Destination, OutboundEndpoint};
use crate::observability::metrics;
use crate::protocol::{self, ProtocolError, ProtocolFactory, ProtocolRegistry, ProtocolSession};

/// Failures surfaced to the caller of a send.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to open connection to {destination}: {source}")]
    Connect {
        destination: Destination,
        source: io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("document was not fully written to the wire")]
    NotSent,

    #[error("send did not complete within {0:?}")]
    SendTimeout(Duration),

    #[error("no reply within {0:?}")]
    ReplyTimeout(Duration),
}

impl SendError {
    fn label(&self) -> &'static str {
        match self {
            SendError::Connect { .. } => "connect_error",
            SendError::Protocol(_) => "protocol_error",
            SendError::NotSent => "not_sent",
            SendError::SendTimeout(_) => "send_timeout",
            SendError::ReplyTimeout(_) => "reply_timeout",
        }
    }
}

/// Result of a completed send.
#[derive(Debug)]
pub struct SendOutcome {
    /// The socket came from the document's pending reply.
    pub reused_connection: bool,
    /// Reply bytes, when one was requested.
    pub reply: Option<Bytes>,
}

/// Pushes documents to remote peers.
#[derive(Debug, Clone)]
pub struct Sender {
    protocol: ProtocolFactory,
    timeout: Duration,
    reply_timeout: Duration,
}

impl Sender {
    pub fn new(config: &SenderConfig, protocol: ProtocolFactory) -> Self {
        Self {
            protocol,
            timeout: config.timeout(),
            reply_timeout: config.reply_timeout(),
        }
    }

    /// Resolve the configured protocol name and build a sender.
    pub fn from_config(
        config: &SenderConfig,
        registry: &ProtocolRegistry,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(config, registry.resolve(&config.protocol)?))
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Send without waiting for a reply.
    pub async fn send(
        &self,
        destination: &Destination,
        document: &mut Document,
    ) -> Result<SendOutcome, SendError> {
        self.dispatch(destination, document, None).await
    }

    /// Send and wait for a reply, up to `reply_timeout` or the configured default.
    pub async fn request(
        &self,
        destination: &Destination,
        document: &mut Document,
        reply_timeout: Option<Duration>,
    ) -> Result<SendOutcome, SendError> {
        let wait = reply_timeout.unwrap_or(self.reply_timeout);
        self.dispatch(destination, document, Some(wait)).await
    }

    async fn dispatch(
        &self,
        destination: &Destination,
        document: &mut Document,
        reply_wait: Option<Duration>,
    ) -> Result<SendOutcome, SendError> {
        let start = Instant::now();
        // removed up front so every exit path leaves the document without it
        let pending = document.take_pending_reply();
        let reused = pending.is_some();

        let endpoint = OutboundEndpoint::new(destination.clone(), self.timeout);
        let socket = match endpoint.open(pending).await {
            Ok(socket) => socket,
            Err(source) => {
                let err = SendError::Connect {
                    destination: destination.clone(),
                    source,
                };
                return Err(self.failed(err, reused, start));
            }
        };

        let mut session = match self.protocol.bind(socket.stream) {
            Ok(session) => session,
            Err(e) => return Err(self.failed(e.into(), reused, start)),
        };

        let result = self
            .exchange(session.as_mut(), document.payload(), reply_wait)
            .await;
        protocol::close(session).await;

        match result {
            Ok(reply) => {
                metrics::record_send("ok", reused, start);
                tracing::debug!(
                    document_id = %document.id(),
                    peer_addr = %socket.peer,
                    reused,
                    reply_bytes = reply.as_ref().map(Bytes::len),
                    "Document sent"
                );
                Ok(SendOutcome {
                    reused_connection: reused,
                    reply,
                })
            }
            Err(e) => Err(self.failed(e, reused, start)),
        }
    }

    async fn exchange(
        &self,
        session: &mut dyn ProtocolSession,
        payload: &[u8],
        reply_wait: Option<Duration>,
    ) -> Result<Option<Bytes>, SendError> {
        tokio::time::timeout(self.timeout, session.send(payload))
            .await
            .map_err(|_| SendError::SendTimeout(self.timeout))??;
        if !session.send_succeeded()? {
            return Err(SendError::NotSent);
        }

        let Some(wait) = reply_wait else {
            return Ok(None);
        };
        let reply = tokio::time::timeout(wait, session.read_reply())
            .await
            .map_err(|_| SendError::ReplyTimeout(wait))??;
        Ok(Some(reply))
    }

    fn failed(&self, err: SendError, reused: bool, start: Instant) -> SendError {
        metrics::record_send(err.label(), reused, start);
        tracing::warn!(error = %err, reused, "Send failed");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::document::PendingReply;
    use crate::exchange::registry::ConnectionId;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    fn sender(timeout_ms: u64, reply_timeout_ms: u64) -> Sender {
        let config = SenderConfig {
            timeout_ms,
            reply_timeout_ms,
            ..SenderConfig::default()
        };
        Sender::from_config(&config, &ProtocolRegistry::builtin()).unwrap()
    }

    async fn drain_to_eof(mut stream: TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .expect("sender never closed its socket")
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn fire_and_forget_closes_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let destination: Destination = listener.local_addr().unwrap().into();

        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drain_to_eof(stream).await
        });

        let mut document = Document::new("hello");
        let outcome = sender(5_000, 5_000).send(&destination, &mut document).await.unwrap();
        assert!(!outcome.reused_connection);
        assert!(outcome.reply.is_none());

        let bytes = peer.await.unwrap();
        // 4-byte length, DATA tag, body
        assert_eq!(&bytes[..], &[0, 0, 0, 6, 0x01, b'h', b'e', b'l', b'l', b'o']);
    }

    #[tokio::test]
    async fn reply_timeout_fails_and_still_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let destination: Destination = listener.local_addr().unwrap().into();
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drain_to_eof(stream).await
        });

        let started = Instant::now();
        let mut document = Document::new("anyone there?");
        let err = sender(5_000, 60_000)
            .request(&destination, &mut document, Some(Duration::from_millis(150)))
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::ReplyTimeout(d) if d == Duration::from_millis(150)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!peer.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_still_consumes_pending_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (stream, peer) = accepted.unwrap();

        let mut document = Document::new("reply")
            .with_pending_reply(PendingReply::new(stream, peer, ConnectionId::new()));
        let err = sender(5_000, 5_000)
            .request(&Destination::from(addr), &mut document, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::ReplyTimeout(_)));
        assert!(!document.has_pending_reply());
        assert!(!drain_to_eof(client.unwrap()).await.is_empty());
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let mut document = Document::new("nobody home");
        let err = sender(1_000, 1_000)
            .send(&Destination::from(addr), &mut document)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Connect { .. }));
    }

    #[tokio::test]
    async fn unsendable_document_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let destination: Destination = listener.local_addr().unwrap().into();
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drain_to_eof(stream).await
        });

        let config = SenderConfig {
            protocol: "line".into(),
            ..SenderConfig::default()
        };
        let sender = Sender::from_config(&config, &ProtocolRegistry::builtin()).unwrap();
        let mut document = Document::new("two\nlines");
        let err = sender.send(&destination, &mut document).await.unwrap_err();

        assert!(matches!(err, SendError::Protocol(ProtocolError::Malformed(_))));
        assert!(peer.await.unwrap().is_empty());
    }
}
