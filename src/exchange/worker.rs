//! Per-connection worker.
//!
//! # Flow
//! ```text
//! bind protocol → receive (bounded by read timeout)
//!     immediate: deliver → signal success | error → close
//!     deferred:  attach socket as PendingReply → deliver (no signal, no close)
//! ```
//!
//! # Design Decisions
//! - Every failure stays inside this worker; the listener never sees it
//! - A failure before delivery closes the socket in both modes, since nothing
//!   downstream holds it yet
//! - Deferred-mode delivery failures are logged at warn with no wire signal:
//!   the socket already belongs to the sink, which decides whether to reply
//!   on it or drop it

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::Instrument;

use crate::config::ListenerConfig;
use crate::exchange::document::{Document, PendingReply};
use crate::exchange::registry::ConnectionId;
use crate::exchange::sink::{SharedSink, SinkError};
use crate::net::listener::WorkerPermit;
use crate::observability::metrics;
use crate::protocol::{self, ProtocolError, ProtocolFactory, ProtocolSession};

/// Errors that end one worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("no document received within {0:?}")]
    ReceiveTimeout(Duration),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Settings shared by every worker of one listener.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub protocol: ProtocolFactory,
    pub immediate_reply: bool,
    pub read_timeout: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &ListenerConfig, protocol: ProtocolFactory) -> Self {
        Self {
            protocol,
            immediate_reply: config.immediate_reply,
            read_timeout: config.read_timeout(),
        }
    }

    fn mode(&self) -> &'static str {
        if self.immediate_reply {
            "immediate"
        } else {
            "deferred"
        }
    }
}

/// Drives one protocol session for one accepted socket.
pub struct ConnectionWorker {
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    settings: WorkerSettings,
    sink: SharedSink,
    permit: Option<WorkerPermit>,
}

impl ConnectionWorker {
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        settings: WorkerSettings,
        sink: SharedSink,
    ) -> Self {
        Self {
            id,
            stream,
            peer,
            settings,
            sink,
            permit: None,
        }
    }

    /// Hold an admission slot for as long as this worker runs.
    pub fn with_permit(mut self, permit: WorkerPermit) -> Self {
        self.permit = Some(permit);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Run the exchange to completion, logging the outcome.
    pub async fn run(self) {
        let span = tracing::info_span!(
            "worker",
            connection_id = %self.id,
            peer_addr = %self.peer,
            protocol = self.settings.protocol.name(),
        );
        async move {
            metrics::worker_started();
            let deferred = !self.settings.immediate_reply;
            match self.exchange().await {
                Ok(()) => tracing::debug!("Exchange complete"),
                Err(WorkerError::Sink(e)) if deferred => {
                    tracing::warn!(
                        error = %e,
                        "Sink failed on deferred document, no wire signal sent"
                    )
                }
                Err(e) => tracing::error!(error = %e, "Exchange failed"),
            }
            metrics::worker_finished();
        }
        .instrument(span)
        .await
    }

    async fn exchange(self) -> Result<(), WorkerError> {
        let ConnectionWorker {
            id,
            stream,
            peer,
            settings,
            sink,
            permit: _permit,
        } = self;
        let mode = settings.mode();

        let mut session = match settings.protocol.bind(stream) {
            Ok(session) => session,
            Err(e) => {
                metrics::record_document(mode, "protocol_error");
                return Err(e.into());
            }
        };

        let payload = match receive(session.as_mut(), settings.read_timeout).await {
            Ok(payload) => payload,
            Err(e) => {
                metrics::record_document(mode, "protocol_error");
                protocol::close(session).await;
                return Err(e);
            }
        };
        tracing::debug!(bytes = payload.len(), "Document received");

        if settings.immediate_reply {
            let delivered = deliver(&sink, Document::new(payload)).await;
            let signaled = match delivered {
                Ok(()) => session.signal_success().await,
                Err(_) => session.signal_error().await,
            };
            if let Err(e) = signaled {
                tracing::warn!(error = %e, "Failed to signal receipt");
            }
            protocol::close(session).await;
            metrics::record_document(mode, outcome(&delivered));
            delivered.map_err(WorkerError::from)
        } else {
            let pending = PendingReply::new(session.into_stream(), peer, id);
            let document = Document::new(payload).with_pending_reply(pending);
            tracing::debug!(
                document_id = %document.id(),
                "Handing connection downstream for deferred reply"
            );
            let delivered = deliver(&sink, document).await;
            metrics::record_document(mode, outcome(&delivered));
            delivered.map_err(WorkerError::from)
        }
    }
}

async fn receive(
    session: &mut dyn ProtocolSession,
    limit: Duration,
) -> Result<Bytes, WorkerError> {
    tokio::time::timeout(limit, session.receive())
        .await
        .map_err(|_| WorkerError::ReceiveTimeout(limit))??;
    Ok(session.received()?.clone())
}

/// Deliveries are serialized across all workers by the sink's lock.
async fn deliver(sink: &SharedSink, document: Document) -> Result<(), SinkError> {
    let mut sink = sink.lock().await;
    sink.deliver(document).await
}

fn outcome(delivered: &Result<(), SinkError>) -> &'static str {
    if delivered.is_ok() {
        "delivered"
    } else {
        "sink_error"
    }
}
