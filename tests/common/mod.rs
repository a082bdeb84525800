//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use tcp_exchange::config::ExchangeConfig;
use tcp_exchange::exchange::sink::{shared, ChannelSink};
use tcp_exchange::lifecycle::{startup, Shutdown};
use tcp_exchange::protocol::state::SessionState;
use tcp_exchange::protocol::ProtocolError;
use tcp_exchange::{AcceptLoopHandle, Document, ProtocolRegistry, ProtocolSession};

/// Stub variant: a document is everything up to the sender's write shutdown,
/// and receipt signals always succeed without touching the wire.
pub const UNTIL_EOF: &str = "until-eof";

/// Stub variant whose constructor refuses every socket.
pub const FAILING: &str = "failing";

/// Built-in variants plus the stubs.
#[allow(dead_code)]
pub fn stub_registry() -> ProtocolRegistry {
    ProtocolRegistry::builtin()
        .with(UNTIL_EOF, until_eof_bind)
        .with(FAILING, failing_bind)
}

fn until_eof_bind(stream: TcpStream) -> Result<Box<dyn ProtocolSession>, ProtocolError> {
    Ok(Box::new(UntilEofSession {
        stream,
        state: SessionState::new(),
        received: None,
    }))
}

fn failing_bind(_stream: TcpStream) -> Result<Box<dyn ProtocolSession>, ProtocolError> {
    Err(ProtocolError::Malformed("stub refuses every socket".into()))
}

struct UntilEofSession {
    stream: TcpStream,
    state: SessionState,
    received: Option<Bytes>,
}

async fn write_and_shutdown(stream: &mut TcpStream, document: &[u8]) -> std::io::Result<()> {
    stream.write_all(document).await?;
    stream.shutdown().await
}

async fn read_until_eof(stream: &mut TcpStream) -> Result<Bytes, ProtocolError> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

#[async_trait]
impl ProtocolSession for UntilEofSession {
    fn name(&self) -> &'static str {
        UNTIL_EOF
    }

    async fn send(&mut self, document: &[u8]) -> Result<(), ProtocolError> {
        self.state.begin_send()?;
        let result = write_and_shutdown(&mut self.stream, document).await;
        self.state.finish_send(result.is_ok());
        Ok(result?)
    }

    fn send_succeeded(&self) -> Result<bool, ProtocolError> {
        self.state.send_succeeded()
    }

    async fn read_reply(&mut self) -> Result<Bytes, ProtocolError> {
        self.state.require_sent("read_reply")?;
        read_until_eof(&mut self.stream).await
    }

    async fn receive(&mut self) -> Result<(), ProtocolError> {
        self.state.begin_receive()?;
        self.received = Some(read_until_eof(&mut self.stream).await?);
        self.state.finish_receive();
        Ok(())
    }

    fn received(&self) -> Result<&Bytes, ProtocolError> {
        self.state.require_received("received")?;
        self.received.as_ref().ok_or(ProtocolError::OutOfOrder {
            operation: "received",
            required: "receive",
        })
    }

    async fn signal_success(&mut self) -> Result<(), ProtocolError> {
        self.state.signal("signal_success")
    }

    async fn signal_error(&mut self) -> Result<(), ProtocolError> {
        self.state.signal("signal_error")
    }

    fn into_stream(self: Box<Self>) -> TcpStream {
        self.stream
    }
}

/// Loopback config on an ephemeral port with short timeouts.
pub fn local_config(immediate_reply: bool) -> ExchangeConfig {
    let mut config = ExchangeConfig::default();
    config.listener.bind_host = "127.0.0.1".into();
    config.listener.port = 0;
    config.listener.accept_timeout_ms = 50;
    config.listener.read_timeout_ms = 2_000;
    config.listener.immediate_reply = immediate_reply;
    config.sender.timeout_ms = 2_000;
    config.sender.reply_timeout_ms = 2_000;
    config
}

/// A running listener whose sink forwards into a channel.
pub struct Harness {
    pub handle: AcceptLoopHandle,
    pub documents: mpsc::Receiver<Document>,
    pub shutdown: Shutdown,
}

impl Harness {
    pub async fn start(config: &ExchangeConfig) -> Self {
        Self::start_with(config, &ProtocolRegistry::builtin()).await
    }

    pub async fn start_with(config: &ExchangeConfig, registry: &ProtocolRegistry) -> Self {
        let (sink, documents) = ChannelSink::channel(64);
        let shutdown = Shutdown::new();
        let handle = startup::start_listener(config, registry, shared(sink), &shutdown)
            .await
            .expect("listener failed to start");
        Self {
            handle,
            documents,
            shutdown,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub async fn next_document(&mut self) -> Document {
        tokio::time::timeout(Duration::from_secs(5), self.documents.recv())
            .await
            .expect("no document delivered")
            .expect("sink channel closed")
    }
}

/// Connect and bind a client session of the given protocol.
#[allow(dead_code)]
pub async fn client(addr: SocketAddr, protocol: &str) -> Box<dyn ProtocolSession> {
    let stream = TcpStream::connect(addr).await.unwrap();
    ProtocolRegistry::builtin()
        .resolve(protocol)
        .unwrap()
        .bind(stream)
        .unwrap()
}

/// Read until the peer closes; panics if it stays open.
#[allow(dead_code)]
pub async fn read_to_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .expect("peer never closed the connection")
        .unwrap();
    buf
}

/// Poll `condition` until it holds or a few seconds pass.
#[allow(dead_code)]
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
