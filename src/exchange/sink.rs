//! Downstream message sinks.
//!
//! # Responsibilities
//! - Define the boundary to the message-processing pipeline
//! - Serialize deliveries across all connection workers
//!
//! # Design Decisions
//! - `deliver` takes `&mut self`; the shared handle wraps the sink in a
//!   `tokio::sync::Mutex`, so at most one delivery runs at a time
//! - The sink owns the delivered document, including any `PendingReply`

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::exchange::document::Document;

/// Failure reported by a sink for one document.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink is closed")]
    Closed,

    #[error("document rejected: {0}")]
    Rejected(String),
}

/// Receives documents from connection workers.
#[async_trait]
pub trait MessageSink: Send {
    async fn deliver(&mut self, document: Document) -> Result<(), SinkError>;
}

/// Sink shared by every worker of an accept loop.
pub type SharedSink = Arc<Mutex<dyn MessageSink>>;

/// Wrap a sink for sharing across workers.
pub fn shared<S: MessageSink + 'static>(sink: S) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Forwards documents into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Document>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Document>) -> Self {
        Self { tx }
    }

    /// A sink and the receiving half of a bounded channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Document>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn deliver(&mut self, document: Document) -> Result<(), SinkError> {
        self.tx.send(document).await.map_err(|_| SinkError::Closed)
    }
}

/// Logs each document and discards it.
#[derive(Debug, Default)]
pub struct LogSink {
    delivered: u64,
}

impl LogSink {
    const PREVIEW_BYTES: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

#[async_trait]
impl MessageSink for LogSink {
    async fn deliver(&mut self, document: Document) -> Result<(), SinkError> {
        self.delivered += 1;
        let payload = document.payload();
        let preview = String::from_utf8_lossy(&payload[..payload.len().min(Self::PREVIEW_BYTES)]);
        tracing::info!(
            document_id = %document.id(),
            bytes = payload.len(),
            deferred = document.has_pending_reply(),
            preview = %preview,
            "Document received"
        );
        Ok(())
    }
}
